//! Canonical JSON encoding for hashing.
//!
//! `serde_json::Value` without the `preserve_order` feature stores object
//! keys in a `BTreeMap`, so serializing it already yields a key-sorted,
//! whitespace-free byte sequence — no separate canonicalization pass.

pub fn canonical_bytes(value: &serde_json::Value) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_encoding() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_bytes(&a).unwrap(), canonical_bytes(&b).unwrap());
    }
}
