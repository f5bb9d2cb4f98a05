//! End-to-end goal runs through `GoalExecutor`, exercising the same
//! collaborators (`agentgov-audit`, `agentgov-budget`, `agentgov-approval`,
//! `agentgov-instances`) a real deployment wires together, rather than
//! exercising each in isolation.

use agentgov_audit::AuditLog;
use agentgov_budget::{BudgetLedger, WarnEmissionTracker};
use agentgov_core::ids::{AgentTypeId, AuditChainId, CorrelationId, GoalId, InstanceId, SkillId, SubscriptionId};
use agentgov_core::types::{AgentInstance, Decision, Goal, GoalFrequency, Lifecycle, PlanStep};
use agentgov_core::{PolicyDenyReason, SharedClock, TestClock};
use agentgov_execution::{
    EchoToolAdapter, GoalExecutor, GoalOutcome, NullKnowledgeLookup, OutputEvent, Planner,
};
use agentgov_instances::InstanceStore;
use agentgov_policy::{actions, Effect, LayerRules, Obligation, PolicyEngine, PolicyRule, PolicySet};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

struct FixedPlan(Vec<PlanStep>);

#[async_trait]
impl Planner for FixedPlan {
    async fn plan(&self, _instance: &AgentInstance, _goal: &Goal) -> agentgov_core::Result<Vec<PlanStep>> {
        Ok(self.0.clone())
    }
}

fn instance() -> AgentInstance {
    AgentInstance {
        hired_instance_id: InstanceId::generate(),
        subscription_id: SubscriptionId::generate(),
        agent_id: "news-desk-bot".to_string(),
        agent_type_id: AgentTypeId::generate(),
        config: serde_json::json!({}),
        goals: vec![],
        trial_status: false,
        workspace_ref: "ws-1".to_string(),
        lifecycle: Lifecycle::Active,
        configured: true,
        budget_daily_usd: 50.0,
        configured_agent_type_version: 1,
    }
}

fn goal(instance_id: &InstanceId) -> Goal {
    Goal {
        goal_instance_id: GoalId::generate(),
        hired_instance_id: instance_id.clone(),
        goal_template_id: "publish-article".to_string(),
        frequency: GoalFrequency::OneShot,
        settings: serde_json::json!({}),
    }
}

fn step(key: &str, external_effect: bool, depends_on: Vec<agentgov_core::ids::StepId>) -> PlanStep {
    PlanStep {
        step_id: agentgov_core::ids::StepId::generate(),
        skill_id: SkillId::generate(),
        step_key: key.to_string(),
        inputs: serde_json::json!({}),
        depends_on,
        external_effect,
        sla_hours: Some(1),
        estimated_cost_usd: 1.0,
        max_retries: 0,
    }
}

fn executor(plan: Vec<PlanStep>, clock: SharedClock, audit: Arc<AuditLog>) -> GoalExecutor {
    let chain_id = AuditChainId::new("tenant");
    GoalExecutor {
        policy_engine: PolicyEngine::new(),
        approvals: Arc::new(agentgov_approval::ApprovalService::new(audit.clone(), chain_id, clock.clone())),
        budget: Arc::new(BudgetLedger::new(0.8, 0.95)),
        warn_tracker: Arc::new(WarnEmissionTracker::new()),
        audit,
        instances: Arc::new(InstanceStore::new()),
        tool_adapter: Arc::new(EchoToolAdapter),
        knowledge: Arc::new(NullKnowledgeLookup),
        planner: Arc::new(FixedPlan(plan)),
        clock,
    }
}

fn approval_required_policy() -> PolicySet {
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

#[tokio::test]
async fn approved_publish_step_completes_the_goal() {
    let clock: SharedClock = Arc::new(TestClock::at(Utc::now()));
    let audit = Arc::new(AuditLog::new());
    let gov_instance = instance();
    let gov_goal = goal(&gov_instance.hired_instance_id);
    let draft = step("draft_article", false, vec![]);
    let publish = step("publish_article", true, vec![draft.step_id.clone()]);
    let exec = Arc::new(executor(vec![draft, publish], clock, audit.clone()));

    let chain_id = AuditChainId::new("tenant");
    let (tx, mut rx) = broadcast::channel(16);

    let exec_clone = exec.clone();
    let instance_clone = gov_instance.clone();
    let goal_clone = gov_goal.clone();
    let chain_clone = chain_id.clone();
    let policies = approval_required_policy();
    let run = tokio::spawn(async move {
        exec_clone
            .run_goal(
                &instance_clone,
                &goal_clone,
                &policies,
                &chain_clone,
                CorrelationId::generate(),
                CancellationToken::new(),
                tx,
            )
            .await
    });

    let approval_id = loop {
        match rx.recv().await.unwrap() {
            OutputEvent::ApprovalRequested { approval_id, .. } => break approval_id,
            _ => continue,
        }
    };

    exec.approvals
        .decide(&approval_id, Decision::Approve, "editor-1".to_string(), None, Some(0.9), CorrelationId::generate())
        .await
        .unwrap();

    let outcome: GoalOutcome = run.await.unwrap().unwrap();
    assert_eq!(outcome.deliverables.len(), 2);

    let entries = audit.entries(&chain_id).await;
    assert!(entries.iter().any(|e| e.event_type == "GOAL_COMPLETED"));
    assert!(!entries.iter().any(|e| e.event_type == "GOAL_FAILED"));
}

#[tokio::test]
async fn denied_publish_step_fails_the_goal_but_keeps_the_draft_auditable() {
    let clock: SharedClock = Arc::new(TestClock::at(Utc::now()));
    let audit = Arc::new(AuditLog::new());
    let gov_instance = instance();
    let gov_goal = goal(&gov_instance.hired_instance_id);
    let draft = step("draft_article", false, vec![]);
    let draft_id = draft.step_id.clone();
    let publish = step("publish_article", true, vec![draft.step_id.clone()]);
    let exec = Arc::new(executor(vec![draft, publish], clock, audit.clone()));

    let chain_id = AuditChainId::new("tenant");
    let (tx, mut rx) = broadcast::channel(16);

    let exec_clone = exec.clone();
    let instance_clone = gov_instance.clone();
    let goal_clone = gov_goal.clone();
    let chain_clone = chain_id.clone();
    let policies = approval_required_policy();
    let run = tokio::spawn(async move {
        exec_clone
            .run_goal(
                &instance_clone,
                &goal_clone,
                &policies,
                &chain_clone,
                CorrelationId::generate(),
                CancellationToken::new(),
                tx,
            )
            .await
    });

    let approval_id = loop {
        match rx.recv().await.unwrap() {
            OutputEvent::ApprovalRequested { approval_id, .. } => break approval_id,
            _ => continue,
        }
    };

    exec.approvals
        .decide(&approval_id, Decision::Deny, "editor-1".to_string(), Some("not ready".to_string()), None, CorrelationId::generate())
        .await
        .unwrap();

    let goal_failed = loop {
        match rx.recv().await.unwrap() {
            OutputEvent::GoalFailed { reason } => break reason,
            OutputEvent::GoalCompleted => panic!("goal should not have completed"),
            _ => continue,
        }
    };
    assert!(goal_failed.contains("not approved"));

    run.await.unwrap().unwrap_err();

    let entries = audit.entries(&chain_id).await;
    assert!(entries.iter().any(|e| e.event_type == "GOAL_FAILED"));
    assert!(!entries.iter().any(|e| e.event_type == "GOAL_COMPLETED"));

    let draft_entry = entries
        .iter()
        .find(|e| e.event_type == "STEP_COMPLETED" && e.payload["step_id"] == draft_id.to_string())
        .expect("the draft step's output is still in the audit trail even though the goal failed");
    assert_eq!(draft_entry.payload["output"]["step_key"], "draft_article");
}
