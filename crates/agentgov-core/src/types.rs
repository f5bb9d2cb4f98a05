//! Data model entities. Persistence is opaque to this crate — these are
//! the semantic types every component agrees on.

use crate::ids::{
    AgentTypeId, ApprovalId, CorrelationId, CustomerId, GoalId, InstanceId, JobRoleId, SeedId,
    SkillId, StepId, SubscriptionId,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Certification registry entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificationStatus {
    Certified,
    Deprecated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub skill_id: SkillId,
    pub skill_key: String,
    pub name: String,
    pub industry_code: String,
    #[serde(default)]
    pub compliance_tags: Vec<String>,
    pub tools: Vec<String>,
    pub io_schemas: serde_json::Value,
    pub status: CertificationStatus,
    pub supersedes: Option<SkillId>,
    pub created_at: DateTime<Utc>,
}

impl Skill {
    /// The tuple uniqueness key for collision detection.
    pub fn collision_key(&self) -> (String, String, Vec<String>) {
        let mut tools = self.tools.clone();
        tools.sort();
        (self.industry_code.clone(), self.name.clone(), tools)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRole {
    pub job_role_id: JobRoleId,
    pub name: String,
    pub seniority: String,
    pub required_skill_keys: Vec<String>,
    pub status: CertificationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementDefaults {
    pub approval_required: bool,
    pub deterministic: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStepTemplate {
    pub step_key: String,
    pub skill_key: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub external_effect: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalTemplate {
    pub goal_template_id: String,
    pub name: String,
    pub steps: Vec<PlanStepTemplate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTypeStatus {
    Draft,
    Published,
    MigrationRequired,
    Deprecated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTypeDefinition {
    pub agent_type_id: AgentTypeId,
    pub version: u32,
    pub config_schema: serde_json::Value,
    pub required_skill_keys: Vec<String>,
    pub goal_templates: Vec<GoalTemplate>,
    pub enforcement_defaults: EnforcementDefaults,
    pub status: AgentTypeStatus,
}

// ---------------------------------------------------------------------------
// Customer / subscription / instance entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerTier {
    Starter,
    Pro,
    Enterprise,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanLimits {
    pub max_instances: u32,
    pub daily_budget_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: CustomerId,
    pub tier: CustomerTier,
    pub plan_limits: PlanLimits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    TrialActive,
    Active,
    Suspended,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: SubscriptionId,
    pub customer_id: CustomerId,
    pub agent_type_id: AgentTypeId,
    pub status: SubscriptionStatus,
    pub trial_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Instance lifecycle state machine:
/// `draft -> provisioned -> active <-> interrupted -> retired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Draft,
    Provisioned,
    Active,
    Interrupted,
    Retired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Configure,
    Activate,
    Interrupt,
    Resume,
    Retire,
}

impl Lifecycle {
    /// Validate a transition without mutating anything. Illegal transitions
    /// are precondition failures, not policy denials.
    pub fn transition(self, event: LifecycleEvent) -> Result<Lifecycle, String> {
        use Lifecycle::*;
        use LifecycleEvent::*;
        match (self, event) {
            (Draft, Configure) => Ok(Provisioned),
            (Provisioned, Activate) => Ok(Active),
            (Active, Interrupt) => Ok(Interrupted),
            (Interrupted, Resume) => Ok(Active),
            (Active, Retire) | (Interrupted, Retire) | (Provisioned, Retire) => Ok(Retired),
            (from, ev) => Err(format!("illegal transition {:?} on state {:?}", ev, from)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalFrequency {
    OneShot,
    Daily,
    Weekly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub goal_instance_id: GoalId,
    pub hired_instance_id: InstanceId,
    pub goal_template_id: String,
    pub frequency: GoalFrequency,
    #[serde(default)]
    pub settings: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInstance {
    pub hired_instance_id: InstanceId,
    pub subscription_id: SubscriptionId,
    pub agent_id: String,
    pub agent_type_id: AgentTypeId,
    pub config: serde_json::Value,
    pub goals: Vec<Goal>,
    pub trial_status: bool,
    pub workspace_ref: String,
    pub lifecycle: Lifecycle,
    pub configured: bool,
    pub budget_daily_usd: f64,
    /// Agent Type version this instance was last configured against;
    /// `resume` re-validates when this no longer matches the current
    /// definition's version.
    pub configured_agent_type_version: u32,
}

// ---------------------------------------------------------------------------
// Execution-time entities (ephemeral)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: StepId,
    pub skill_id: SkillId,
    pub step_key: String,
    pub inputs: serde_json::Value,
    pub depends_on: Vec<StepId>,
    pub external_effect: bool,
    /// Per-step approval deadline override; the engine clamps this to the
    /// platform default of 24h.
    pub sla_hours: Option<i64>,
    pub estimated_cost_usd: f64,
    pub max_retries: u32,
}

// ---------------------------------------------------------------------------
// Approval workflow entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Denied,
    Deferred,
    Escalated,
    Expired,
}

impl ApprovalState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Denied | Self::Expired)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalContext {
    pub think: String,
    pub act: String,
    pub observe: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub approval_id: ApprovalId,
    pub customer_id: String,
    pub agent_id: String,
    pub agent_type_id: AgentTypeId,
    pub action: String,
    pub risk: RiskLevel,
    pub context: ApprovalContext,
    pub deadline: DateTime<Utc>,
    pub state: ApprovalState,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
    pub reason: Option<String>,
    /// The deciding reviewer's stated confidence, 0.0-1.0. Feeds the
    /// precedent learner's mean-confidence threshold.
    pub confidence: Option<f64>,
    /// Set when this approval was auto-granted by a precedent seed.
    pub seed_id: Option<SeedId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Deny,
    Defer,
    Escalate,
}

// ---------------------------------------------------------------------------
// Policy engine entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDenialRecord {
    pub correlation_id: CorrelationId,
    pub decision_id: crate::ids::DecisionId,
    pub action: String,
    pub reason: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Budget ledger entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetLedgerEntry {
    pub instance_id: InstanceId,
    pub day: NaiveDate,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
    pub event_type: String,
}

// ---------------------------------------------------------------------------
// Audit entities
// ---------------------------------------------------------------------------

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

// ---------------------------------------------------------------------------
// Precedent seed entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedStatus {
    Draft,
    Approved,
    Rejected,
    Revised,
    Deferred,
    Deprecated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecedentSeed {
    pub seed_id: SeedId,
    pub seed_type: String,
    pub principle: String,
    pub rationale: String,
    pub example: ApprovalContext,
    pub applies_to: Vec<String>,
    pub status: SeedStatus,
    pub approved_at: Option<DateTime<Utc>>,
    pub false_positive_count: u32,
}
