//! Capability interfaces the execution engine calls out through: plain
//! `#[async_trait]`s, no inheritance.

use agentgov_core::ids::{CorrelationId, StepId};
use agentgov_core::types::{AgentInstance, Goal, PlanStep};
use agentgov_core::Result;
use async_trait::async_trait;

/// The single point of egress for a skill's Act phase. Must be idempotent
/// on `(correlation_id, step_id)`.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    async fn invoke(
        &self,
        correlation_id: CorrelationId,
        step_id: StepId,
        step: &PlanStep,
        inputs: serde_json::Value,
    ) -> Result<serde_json::Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupClass {
    Constitutional,
    Domain,
    Ambiguous,
}

/// Classify a query before dispatch: constitutional (authority/approval
/// wording) goes to precedent; domain (facts, terminology) goes to the
/// industry adapter; ambiguous tries precedent first, then domain.
pub fn classify_query(query: &str) -> LookupClass {
    let lower = query.to_lowercase();
    let constitutional_markers = ["may i", "am i authorized", "is this approved", "policy", "allowed to"];
    let domain_markers = ["definition", "what is", "current price", "regulation code"];

    let is_constitutional = constitutional_markers.iter().any(|m| lower.contains(m));
    let is_domain = domain_markers.iter().any(|m| lower.contains(m));

    match (is_constitutional, is_domain) {
        (true, false) => LookupClass::Constitutional,
        (false, true) => LookupClass::Domain,
        _ => LookupClass::Ambiguous,
    }
}

#[async_trait]
pub trait KnowledgeLookup: Send + Sync {
    /// Consult the precedent cache; `None` on a miss.
    async fn lookup_precedent(&self, query: &str) -> Option<serde_json::Value>;

    /// Consult the external industry knowledge adapter.
    async fn lookup_domain(&self, query: &str) -> Result<serde_json::Value>;
}

#[async_trait]
pub trait Planner: Send + Sync {
    /// Resolve the goal template from the Agent Type Definition into a
    /// concrete DAG of plan steps.
    async fn plan(&self, instance: &AgentInstance, goal: &Goal) -> Result<Vec<PlanStep>>;
}
