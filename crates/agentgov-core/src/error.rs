//! Error taxonomy shared by every component.
//!
//! One enum, reused everywhere, because every component's failure must be
//! mappable to a stable HTTP `reason` string by the gateway without each
//! crate inventing its own vocabulary.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum GovernanceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not authorized: {0}")]
    Authz(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("policy denied: {reason} ({detail})")]
    PolicyDeny { reason: PolicyDenyReason, detail: String },

    #[error("budget exceeded: {0}")]
    Budget(String),

    #[error("approval expired: {0}")]
    ApprovalExpired(String),

    #[error("tool error (retryable): {0}")]
    ToolTransient(String),

    #[error("tool error (permanent): {0}")]
    ToolPermanent(String),

    #[error("plan deadlock: {0}")]
    PlanDeadlock(String),

    #[error("audit durability failure: {0}")]
    AuditDurability(String),

    #[error("integrity violation at seq {seq}: {detail}")]
    Integrity { seq: u64, detail: String },

    #[error("not found: {0}")]
    NotFound(String),
}

/// The stable deny-reason vocabulary, plus the extra values the HTTP
/// surface adds (`conflict`, `not_configured`, `version_upgrade_required`,
/// `seed_vetoed`). These strings are returned verbatim in problem
/// documents; the UI selects messaging from `reason`, never by parsing
/// `detail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDenyReason {
    ApprovalRequired,
    BudgetExceeded,
    TrialRestriction,
    ScopeOutOfBounds,
    ToolNotAuthorized,
    InstanceSuspended,
    SkillDeprecated,
    Conflict,
    NotConfigured,
    VersionUpgradeRequired,
    SeedVetoed,
}

impl PolicyDenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApprovalRequired => "approval_required",
            Self::BudgetExceeded => "budget_exceeded",
            Self::TrialRestriction => "trial_restriction",
            Self::ScopeOutOfBounds => "scope_out_of_bounds",
            Self::ToolNotAuthorized => "tool_not_authorized",
            Self::InstanceSuspended => "instance_suspended",
            Self::SkillDeprecated => "skill_deprecated",
            Self::Conflict => "conflict",
            Self::NotConfigured => "not_configured",
            Self::VersionUpgradeRequired => "version_upgrade_required",
            Self::SeedVetoed => "seed_vetoed",
        }
    }
}

impl std::fmt::Display for PolicyDenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GovernanceError {
    pub fn policy_deny(reason: PolicyDenyReason, detail: impl Into<String>) -> Self {
        Self::PolicyDeny { reason, detail: detail.into() }
    }

    pub fn integrity(seq: u64, detail: impl Into<String>) -> Self {
        Self::Integrity { seq, detail: detail.into() }
    }

    /// The stable `reason` string the HTTP gateway serializes into problem
    /// documents. Never derived by parsing `detail`.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Authz(_) => "unauthorized",
            Self::Conflict(_) => "conflict",
            Self::Precondition(_) => "not_configured",
            Self::PolicyDeny { reason, .. } => reason.as_str(),
            Self::Budget(_) => "budget_exceeded",
            Self::ApprovalExpired(_) => "approval_expired",
            Self::ToolTransient(_) => "tool_transient",
            Self::ToolPermanent(_) => "tool_permanent",
            Self::PlanDeadlock(_) => "plan_deadlock",
            Self::AuditDurability(_) => "audit_durability",
            Self::Integrity { .. } => "integrity",
            Self::NotFound(_) => "not_found",
        }
    }

    /// Whether the originating component should retry internally before
    /// bubbling out.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ToolTransient(_))
    }
}

pub type Result<T> = std::result::Result<T, GovernanceError>;
