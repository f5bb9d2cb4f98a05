//! Shared application state, wired once at boot and handed to every route.

use agentgov_approval::ApprovalService;
use agentgov_audit::AuditLog;
use agentgov_budget::{BudgetLedger, WarnEmissionTracker};
use agentgov_core::ids::{AuditChainId, GoalId, InstanceId, StepId};
use agentgov_core::{GovernanceConfig, PolicyDenyReason, SharedClock, SystemClock};
use agentgov_execution::{EchoToolAdapter, GoalExecutor, NullKnowledgeLookup, OutputEvent, TemplatePlanner};
use agentgov_instances::InstanceStore;
use agentgov_learner::PrecedentLearner;
use agentgov_policy::{actions, Effect, LayerRules, Obligation, PolicyEngine, PolicyRule, PolicySet};
use agentgov_registry::CertificationAuthority;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

use crate::auth::ResolvedAuth;

/// The audit chain carrying the cross-tenant governance surface — skill
/// and job-role certification, agent type publication, approval decisions,
/// precedent seed review. Goal execution partitions further, one chain per
/// subscription, so one tenant's volume never head-of-line blocks another's.
pub const PLATFORM_CHAIN: &str = "platform";

pub struct AppState {
    pub config: GovernanceConfig,
    pub auth: ResolvedAuth,
    pub clock: SharedClock,
    pub audit: Arc<AuditLog>,
    pub registry: Arc<CertificationAuthority>,
    pub instances: Arc<InstanceStore>,
    pub budget: Arc<BudgetLedger>,
    pub warn_tracker: Arc<WarnEmissionTracker>,
    pub approvals: Arc<ApprovalService>,
    pub learner: Arc<PrecedentLearner>,
    pub policies: PolicySet,
    pub executor: Arc<GoalExecutor>,
    /// Deliverables produced by completed goal runs, keyed by the owning
    /// instance so `GET /v1/deliverables?hired_instance_id=…` can answer
    /// without a secondary index. `POST /v1/goals` dispatches the run in
    /// the background and appends here as each goal finishes.
    pub deliverables: DashMap<InstanceId, Vec<(GoalId, StepId, serde_json::Value)>>,
    pub output_tx: broadcast::Sender<OutputEvent>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: GovernanceConfig) -> Arc<Self> {
        let clock: SharedClock = Arc::new(SystemClock);
        let audit = Arc::new(AuditLog::new());
        let platform_chain = AuditChainId::new(PLATFORM_CHAIN);
        let registry = Arc::new(CertificationAuthority::new());
        let instances = Arc::new(InstanceStore::new());
        let budget = Arc::new(BudgetLedger::new(config.budget_warn_ratio, config.budget_approval_ratio));
        let warn_tracker = Arc::new(WarnEmissionTracker::new());
        let approvals = Arc::new(ApprovalService::new(audit.clone(), platform_chain.clone(), clock.clone()));
        let learner = Arc::new(PrecedentLearner::new(audit.clone(), platform_chain, clock.clone()));

        let executor = Arc::new(GoalExecutor {
            policy_engine: PolicyEngine::new(),
            approvals: approvals.clone(),
            budget: budget.clone(),
            warn_tracker: warn_tracker.clone(),
            audit: audit.clone(),
            instances: instances.clone(),
            tool_adapter: Arc::new(EchoToolAdapter),
            knowledge: Arc::new(NullKnowledgeLookup),
            planner: Arc::new(TemplatePlanner::new(registry.clone())),
            clock: clock.clone(),
        });

        let (output_tx, _rx) = broadcast::channel(1024);
        let auth = ResolvedAuth::from_config(&config.auth, std::env::var("AGENTGOV_TOKEN").ok());

        Arc::new(Self {
            config,
            auth,
            clock,
            audit,
            registry,
            instances,
            budget,
            warn_tracker,
            approvals,
            learner,
            policies: default_policies(),
            executor,
            deliverables: DashMap::new(),
            output_tx,
            started_at: Instant::now(),
        })
    }

    /// One audit chain per subscription, so goal execution for one customer
    /// never contends the lock another customer's goals are writing under.
    pub fn chain_for_subscription(&self, subscription_id: &str) -> AuditChainId {
        AuditChainId::new(subscription_id)
    }
}

/// The platform's baked-in default posture: every `tool.invoke` requires a
/// human approval until a more specific layer loosens it (e.g. a seed the
/// learner has drafted and a reviewer has approved). Nothing in this
/// surface exposes a way to author additional layers — that's future
/// scope — so this default is the whole policy a fresh deployment runs.
fn default_policies() -> PolicySet {
    let mut policies = PolicySet::default();
    policies.l0_platform = LayerRules {
        rules: vec![PolicyRule {
            action: actions::TOOL_INVOKE.to_string(),
            effect: Effect::Deny,
            reason: Some(PolicyDenyReason::ApprovalRequired),
            obligations: vec![Obligation::RequireApproval { risk: "medium".to_string() }],
        }],
    };
    policies
}
