//! Reference capability implementations. A production deployment plugs in
//! its own `ToolAdapter`/`KnowledgeLookup` against real systems; these
//! exist so the gateway has something to wire by default.

use crate::traits::{KnowledgeLookup, ToolAdapter};
use agentgov_core::ids::{CorrelationId, StepId};
use agentgov_core::types::PlanStep;
use agentgov_core::Result;
use async_trait::async_trait;

/// Echoes its inputs back as the step output. Stands in for a real tool
/// integration until one is wired.
pub struct EchoToolAdapter;

#[async_trait]
impl ToolAdapter for EchoToolAdapter {
    async fn invoke(
        &self,
        _correlation_id: CorrelationId,
        _step_id: StepId,
        step: &PlanStep,
        inputs: serde_json::Value,
    ) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"step_key": step.step_key, "echo": inputs}))
    }
}

/// Always misses. Knowledge lookups fall through to this until a
/// precedent cache and a domain adapter are wired in.
pub struct NullKnowledgeLookup;

#[async_trait]
impl KnowledgeLookup for NullKnowledgeLookup {
    async fn lookup_precedent(&self, _query: &str) -> Option<serde_json::Value> {
        None
    }

    async fn lookup_domain(&self, _query: &str) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }
}
