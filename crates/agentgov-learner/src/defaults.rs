//! Reference `Compensator`. A deployment with real tool side effects swaps
//! this out for one that actually undoes what the adapter did; this exists
//! so a veto path has something to call until that's wired.

use crate::Compensator;
use agentgov_core::types::ApprovalRequest;
use agentgov_core::Result;
use async_trait::async_trait;
use tracing::warn;

/// Logs the veto and returns `Ok`. Standing in for a real undo until a
/// tool-specific compensator exists for the action being reversed.
pub struct NoopCompensator;

#[async_trait]
impl Compensator for NoopCompensator {
    async fn compensate(&self, approval: &ApprovalRequest) -> Result<()> {
        warn!(
            approval_id = %approval.approval_id,
            action = %approval.action,
            "no compensator wired for this action; veto recorded without an undo"
        );
        Ok(())
    }
}
