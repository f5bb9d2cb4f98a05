//! Hash-chained append-only audit log.
//!
//! Every governance decision is written here before the caller sees a
//! result. Chains are partitioned per tenant so one customer's volume
//! never head-of-line blocks another's writes.

mod canon;

pub use canon::canonical_bytes;

use agentgov_core::ids::{AuditChainId, CorrelationId};
use agentgov_core::{GovernanceError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub correlation_id: CorrelationId,
    pub actor: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: CorrelationId,
    pub actor: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub prev_hash: String,
    pub hash: String,
}

impl AuditEntry {
    /// The bytes that get hashed: everything except `hash` itself.
    fn hashable(&self) -> serde_json::Value {
        serde_json::json!({
            "seq": self.seq,
            "timestamp": self.timestamp,
            "correlation_id": self.correlation_id,
            "actor": self.actor,
            "event_type": self.event_type,
            "payload": self.payload,
            "prev_hash": self.prev_hash,
        })
    }
}

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000";

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, bytes);
    digest.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Ok,
    TamperAt(u64),
}

struct ChainState {
    entries: Vec<AuditEntry>,
    lock: Mutex<()>,
}

impl ChainState {
    fn new() -> Self {
        Self { entries: Vec::new(), lock: Mutex::new(()) }
    }
}

/// A single tenant's append-only, hash-chained event log, held in memory.
///
/// Durability is out of scope here — no external WAL; a real
/// deployment would fsync each append before returning. The chain's
/// integrity guarantee — detect tampering, never silently accept a broken
/// link — holds regardless of the backing store.
pub struct AuditLog {
    chains: DashMap<AuditChainId, Arc<Mutex<ChainState>>>,
    quarantined: DashMap<AuditChainId, bool>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self { chains: DashMap::new(), quarantined: DashMap::new() }
    }

    fn chain_for(&self, chain_id: &AuditChainId) -> Arc<Mutex<ChainState>> {
        self.chains
            .entry(chain_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ChainState::new())))
            .clone()
    }

    pub fn is_quarantined(&self, chain_id: &AuditChainId) -> bool {
        self.quarantined.get(chain_id).map(|v| *v).unwrap_or(false)
    }

    /// Count of chains currently refusing writes, for the liveness probe.
    pub fn quarantined_count(&self) -> usize {
        self.quarantined.iter().filter(|kv| *kv.value()).count()
    }

    fn quarantine(&self, chain_id: &AuditChainId) {
        self.quarantined.insert(chain_id.clone(), true);
    }

    /// Append an event, returning the assigned sequence number.
    pub async fn append(
        &self,
        chain_id: &AuditChainId,
        event: AuditEvent,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        if self.is_quarantined(chain_id) {
            return Err(GovernanceError::AuditDurability(format!(
                "chain {chain_id} is quarantined after a prior integrity failure"
            )));
        }

        let chain = self.chain_for(chain_id);
        let mut state = chain.lock().await;

        let seq = state.entries.len() as u64;
        let prev_hash = state
            .entries
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let mut entry = AuditEntry {
            seq,
            timestamp: now,
            correlation_id: event.correlation_id,
            actor: event.actor,
            event_type: event.event_type,
            payload: event.payload,
            prev_hash,
            hash: String::new(),
        };
        let canonical = canonical_bytes(&entry.hashable())
            .map_err(|e| GovernanceError::AuditDurability(e.to_string()))?;
        entry.hash = sha256_hex(&canonical);

        state.entries.push(entry);
        Ok(seq)
    }

    /// Verify the full chain (or a `[start, end)` range). Returns the first
    /// tampered sequence number, if any, and quarantines the chain so
    /// subsequent appends are refused rather than extending a broken link.
    pub async fn verify(
        &self,
        chain_id: &AuditChainId,
        range: Option<(u64, u64)>,
    ) -> Result<VerifyOutcome> {
        let chain = self.chain_for(chain_id);
        let state = chain.lock().await;

        let (start, end) = range.unwrap_or((0, state.entries.len() as u64));
        let mut expected_prev = if start == 0 {
            GENESIS_HASH.to_string()
        } else {
            state
                .entries
                .get((start - 1) as usize)
                .map(|e| e.hash.clone())
                .ok_or_else(|| GovernanceError::NotFound(format!("seq {}", start - 1)))?
        };

        for seq in start..end {
            let entry = state
                .entries
                .get(seq as usize)
                .ok_or_else(|| GovernanceError::NotFound(format!("seq {seq}")))?;

            if entry.prev_hash != expected_prev {
                drop(state);
                self.quarantine(chain_id);
                return Ok(VerifyOutcome::TamperAt(seq));
            }
            let canonical = canonical_bytes(&entry.hashable())
                .map_err(|e| GovernanceError::AuditDurability(e.to_string()))?;
            let recomputed = sha256_hex(&canonical);
            if recomputed != entry.hash {
                drop(state);
                self.quarantine(chain_id);
                return Ok(VerifyOutcome::TamperAt(seq));
            }
            expected_prev = entry.hash.clone();
        }

        Ok(VerifyOutcome::Ok)
    }

    pub async fn entries(&self, chain_id: &AuditChainId) -> Vec<AuditEntry> {
        let chain = self.chain_for(chain_id);
        let state = chain.lock().await;
        state.entries.clone()
    }

    pub async fn len(&self, chain_id: &AuditChainId) -> usize {
        let chain = self.chain_for(chain_id);
        let state = chain.lock().await;
        state.entries.len()
    }

    pub async fn is_empty(&self, chain_id: &AuditChainId) -> bool {
        self.len(chain_id).await == 0
    }

    /// Aggregate counters across a chain, for the `/v1/audit/stats` surface.
    pub async fn statistics(&self, chain_id: &AuditChainId) -> AuditStatistics {
        let chain = self.chain_for(chain_id);
        let state = chain.lock().await;

        let mut by_event_type: std::collections::BTreeMap<String, u64> = Default::default();
        for entry in &state.entries {
            *by_event_type.entry(entry.event_type.clone()).or_default() += 1;
        }

        AuditStatistics { total_entries: state.entries.len() as u64, by_event_type }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStatistics {
    pub total_entries: u64,
    pub by_event_type: std::collections::BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(event_type: &str) -> AuditEvent {
        AuditEvent {
            correlation_id: CorrelationId::generate(),
            actor: "test-actor".to_string(),
            event_type: event_type.to_string(),
            payload: serde_json::json!({"k": "v"}),
        }
    }

    #[tokio::test]
    async fn appends_form_a_valid_chain() {
        let log = AuditLog::new();
        let chain_id = AuditChainId::new("tenant-a");
        let now = Utc::now();

        for i in 0..5 {
            let seq = log.append(&chain_id, ev(&format!("EVENT_{i}")), now).await.unwrap();
            assert_eq!(seq, i);
        }

        let outcome = log.verify(&chain_id, None).await.unwrap();
        assert_eq!(outcome, VerifyOutcome::Ok);
        assert!(!log.is_quarantined(&chain_id));
    }

    #[tokio::test]
    async fn tampering_is_detected_and_quarantines_the_chain() {
        let log = AuditLog::new();
        let chain_id = AuditChainId::new("tenant-b");
        let now = Utc::now();

        for i in 0..3 {
            log.append(&chain_id, ev(&format!("EVENT_{i}")), now).await.unwrap();
        }

        {
            let chain = log.chain_for(&chain_id);
            let mut state = chain.lock().await;
            state.entries[1].payload = serde_json::json!({"tampered": true});
        }

        let outcome = log.verify(&chain_id, None).await.unwrap();
        assert_eq!(outcome, VerifyOutcome::TamperAt(1));
        assert!(log.is_quarantined(&chain_id));

        let err = log.append(&chain_id, ev("SHOULD_FAIL"), now).await.unwrap_err();
        assert!(matches!(err, GovernanceError::AuditDurability(_)));
    }

    #[tokio::test]
    async fn separate_tenants_do_not_share_sequence_numbers() {
        let log = AuditLog::new();
        let now = Utc::now();
        let a = AuditChainId::new("tenant-a");
        let b = AuditChainId::new("tenant-b");

        log.append(&a, ev("A1"), now).await.unwrap();
        let seq_b = log.append(&b, ev("B1"), now).await.unwrap();
        assert_eq!(seq_b, 0);
    }

    #[tokio::test]
    async fn statistics_count_by_event_type() {
        let log = AuditLog::new();
        let chain_id = AuditChainId::new("tenant-c");
        let now = Utc::now();

        log.append(&chain_id, ev("PolicyDecisionRecorded"), now).await.unwrap();
        log.append(&chain_id, ev("PolicyDecisionRecorded"), now).await.unwrap();
        log.append(&chain_id, ev("BudgetDebited"), now).await.unwrap();

        let stats = log.statistics(&chain_id).await;
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.by_event_type.get("PolicyDecisionRecorded"), Some(&2));
    }
}
