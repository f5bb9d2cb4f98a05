//! Background task driving the precedent learner against the live
//! approval trail. Runs independently of any single request so drafting
//! keeps happening even on a quiet HTTP surface.

use crate::state::AppState;
use agentgov_core::ids::CorrelationId;
use chrono::Duration;
use std::sync::Arc;
use std::time::Duration as StdDuration;

/// How often `run_once` re-scans the approval trail.
const SCAN_INTERVAL: StdDuration = StdDuration::from_secs(300);
/// Lookback window handed to `run_once` for each scan.
const LOOKBACK_HOURS: i64 = 24;

/// Spawns the periodic scan as a detached task. The caller holds no handle
/// because the loop runs for the lifetime of the process — there is
/// nothing to join, only the process exit to stop it.
pub fn spawn(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SCAN_INTERVAL);
        loop {
            ticker.tick().await;
            let approvals = state.approvals.approved_snapshot();
            if approvals.is_empty() {
                continue;
            }
            let correlation_id = CorrelationId::generate();
            match state.learner.run_once(&approvals, Duration::hours(LOOKBACK_HOURS), correlation_id).await {
                Ok(drafted) if !drafted.is_empty() => {
                    tracing::info!(count = drafted.len(), "precedent learner drafted seeds");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "precedent learner scan failed"),
            }
        }
    });
}
