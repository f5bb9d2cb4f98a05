//! Exponential backoff with jitter for retryable tool errors. The
//! cancellation-aware wait shape races the sleep against a cancel signal
//! with `tokio::select!` so a retry never outlives a cancelled goal.

use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const BASE_DELAY_MS: u64 = 200;
const MAX_DELAY_MS: u64 = 10_000;

pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(10));
    let capped = exp.min(MAX_DELAY_MS);
    let jitter = rand::thread_rng().gen_range(0..=capped / 4 + 1);
    Duration::from_millis(capped + jitter)
}

/// Sleep for the backoff duration, returning `false` if cancelled first.
pub async fn wait_or_cancel(attempt: u32, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(backoff_delay(attempt)) => true,
        _ = cancel.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_with_attempt_and_stays_capped() {
        let d0 = backoff_delay(0);
        let d5 = backoff_delay(5);
        let d20 = backoff_delay(20);
        assert!(d0.as_millis() >= BASE_DELAY_MS as u128);
        assert!(d5 > d0);
        assert!(d20.as_millis() as u64 <= MAX_DELAY_MS + MAX_DELAY_MS / 4 + 1);
    }
}
