//! The goal executor — plans, then runs Think -> Act -> Observe per step,
//! gating external effects through policy and approval, debiting budget,
//! and recording everything to the audit chain.

use crate::arena::{classify_cycle, CycleClass, PlanArena};
use crate::queue::OutputEvent;
use crate::retry::wait_or_cancel;
use crate::traits::{classify_query, KnowledgeLookup, LookupClass, Planner, ToolAdapter};
use agentgov_audit::{AuditEvent, AuditLog};
use agentgov_budget::{BudgetGate, BudgetLedger, WarnEmissionTracker};
use agentgov_core::ids::{AgentTypeId, ApprovalId, AuditChainId, CorrelationId, InstanceId};
use agentgov_core::types::{
    AgentInstance, ApprovalContext, ApprovalState, Decision, Goal, PlanStep, RiskLevel,
};
use agentgov_core::{Clock, GovernanceError, PolicyDenyReason, Result, SharedClock};
use agentgov_instances::InstanceStore;
use agentgov_policy::{actions, Effect, PolicyEngine, PolicySet, PolicySubject};
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const DEFAULT_APPROVAL_SLA_HOURS: i64 = 24;
const APPROVAL_POLL_INTERVAL_MS: u64 = 50;

#[derive(Debug, Clone)]
pub struct GoalOutcome {
    pub deliverables: Vec<(agentgov_core::ids::StepId, serde_json::Value)>,
}

pub struct GoalExecutor {
    pub policy_engine: PolicyEngine,
    pub approvals: Arc<agentgov_approval::ApprovalService>,
    pub budget: Arc<BudgetLedger>,
    pub warn_tracker: Arc<WarnEmissionTracker>,
    pub audit: Arc<AuditLog>,
    pub instances: Arc<InstanceStore>,
    pub tool_adapter: Arc<dyn ToolAdapter>,
    pub knowledge: Arc<dyn KnowledgeLookup>,
    pub planner: Arc<dyn Planner>,
    pub clock: SharedClock,
}

impl GoalExecutor {
    pub async fn run_goal(
        &self,
        instance: &AgentInstance,
        goal: &Goal,
        policies: &PolicySet,
        chain_id: &AuditChainId,
        correlation_id: CorrelationId,
        cancel: CancellationToken,
        events: broadcast::Sender<OutputEvent>,
    ) -> Result<GoalOutcome> {
        let plan_steps = self.planner.plan(instance, goal).await?;
        let arena = PlanArena::new(plan_steps);
        if arena.is_empty() {
            return Ok(GoalOutcome { deliverables: vec![] });
        }

        self.reject_deadlocked_cycles(&arena).await?;

        let mut deliverables = Vec::new();
        let mut outstanding_approvals: Vec<ApprovalId> = Vec::new();
        let day = self.clock.now().date_naive();

        for level in arena.levels() {
            if cancel.is_cancelled() {
                self.cancel_goal(instance, &outstanding_approvals, correlation_id.clone()).await?;
                let _ = events.send(OutputEvent::GoalCancelled);
                return Err(GovernanceError::Precondition("goal cancelled".to_string()));
            }

            let mut futs = Vec::with_capacity(level.len());
            for index in level {
                let step = arena.steps[index].clone();
                futs.push(self.run_step(
                    instance,
                    step,
                    policies,
                    chain_id,
                    correlation_id.clone(),
                    day,
                    cancel.clone(),
                    events.clone(),
                ));
            }

            for result in futures::future::join_all(futs).await {
                match result {
                    Ok((step_id, output, mut raised_approvals)) => {
                        deliverables.push((step_id, output));
                        outstanding_approvals.append(&mut raised_approvals);
                    }
                    Err(e) => {
                        self.fail_goal(chain_id, correlation_id.clone(), &e, &events).await?;
                        return Err(e);
                    }
                }
            }
        }

        self.audit
            .append(
                chain_id,
                AuditEvent {
                    correlation_id,
                    actor: "agentgov-execution".to_string(),
                    event_type: "GOAL_COMPLETED".to_string(),
                    payload: serde_json::json!({"goal_instance_id": goal.goal_instance_id.to_string()}),
                },
                self.clock.now(),
            )
            .await?;
        let _ = events.send(OutputEvent::GoalCompleted);

        Ok(GoalOutcome { deliverables })
    }

    /// Planning-time deadlock gate: for each cycle, compare the first
    /// step's think-phase output across two passes. Identical outputs mean
    /// the cycle never converges.
    async fn reject_deadlocked_cycles(&self, arena: &PlanArena) -> Result<()> {
        for scc in arena.strongly_connected_components() {
            if scc.len() <= 1 {
                continue;
            }
            let probe = &arena.steps[scc[0]];
            let first = self.think(probe).await?;
            let second = self.think(probe).await?;
            if classify_cycle(&first, &second) == CycleClass::Deadlock {
                return Err(GovernanceError::PlanDeadlock(format!(
                    "cycle containing step `{}` never converges",
                    probe.step_key
                )));
            }
        }
        Ok(())
    }

    /// Pure planning of sub-actions; no external effect.
    async fn think(&self, step: &PlanStep) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"step_key": step.step_key, "inputs": step.inputs}))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        &self,
        instance: &AgentInstance,
        step: PlanStep,
        policies: &PolicySet,
        chain_id: &AuditChainId,
        correlation_id: CorrelationId,
        day: chrono::NaiveDate,
        cancel: CancellationToken,
        events: broadcast::Sender<OutputEvent>,
    ) -> Result<(agentgov_core::ids::StepId, serde_json::Value, Vec<ApprovalId>)> {
        let _ = events.send(OutputEvent::StepStarted { step_id: step.step_id.clone() });
        let mut raised_approvals: Vec<ApprovalId> = Vec::new();

        self.debit_with_gate(instance, &step, chain_id, correlation_id.clone(), day).await?;

        let knowledge = match classify_query(&step.step_key) {
            LookupClass::Constitutional => self.knowledge.lookup_precedent(&step.step_key).await,
            LookupClass::Domain => self.knowledge.lookup_domain(&step.step_key).await.ok(),
            LookupClass::Ambiguous => match self.knowledge.lookup_precedent(&step.step_key).await {
                Some(v) => Some(v),
                None => self.knowledge.lookup_domain(&step.step_key).await.ok(),
            },
        };

        let think_output = self.think(&step).await?;

        let output = if step.external_effect {
            let allowed = self
                .gate_external_effect(
                    instance,
                    &step,
                    policies,
                    chain_id,
                    correlation_id.clone(),
                    &think_output,
                    cancel.clone(),
                    events.clone(),
                    &mut raised_approvals,
                )
                .await
                .map_err(|e| {
                    let _ = events.send(OutputEvent::StepFailed {
                        step_id: step.step_id.clone(),
                        detail: e.to_string(),
                    });
                    e
                })?;

            if !allowed {
                let _ = events.send(OutputEvent::StepFailed {
                    step_id: step.step_id.clone(),
                    detail: "approval denied or expired".to_string(),
                });
                return Err(GovernanceError::ApprovalExpired(format!(
                    "step `{}` was not approved",
                    step.step_key
                )));
            }

            self.invoke_with_retries(&step, correlation_id.clone(), knowledge, cancel).await?
        } else {
            self.invoke_with_retries(&step, correlation_id.clone(), knowledge, cancel).await?
        };

        self.audit
            .append(
                chain_id,
                AuditEvent {
                    correlation_id,
                    actor: "agentgov-execution".to_string(),
                    event_type: "STEP_COMPLETED".to_string(),
                    payload: serde_json::json!({"step_id": step.step_id.to_string(), "output": output}),
                },
                self.clock.now(),
            )
            .await?;
        let _ = events.send(OutputEvent::StepCompleted { step_id: step.step_id.clone(), output: output.clone() });

        Ok((step.step_id, output, raised_approvals))
    }

    async fn debit_with_gate(
        &self,
        instance: &AgentInstance,
        step: &PlanStep,
        chain_id: &AuditChainId,
        correlation_id: CorrelationId,
        day: chrono::NaiveDate,
    ) -> Result<()> {
        let gate = self.budget.debit(
            &instance.hired_instance_id,
            day,
            instance.budget_daily_usd,
            correlation_id.clone(),
            step.step_id.clone(),
            step.estimated_cost_usd,
        );

        match gate {
            Ok(BudgetGate::Ok) => Ok(()),
            Ok(BudgetGate::Warn) => {
                if self.warn_tracker.should_emit(&instance.hired_instance_id, day) {
                    self.audit
                        .append(
                            chain_id,
                            AuditEvent {
                                correlation_id,
                                actor: "agentgov-execution".to_string(),
                                event_type: "BUDGET_WARN".to_string(),
                                payload: serde_json::json!({"instance_id": instance.hired_instance_id.to_string()}),
                            },
                            self.clock.now(),
                        )
                        .await?;
                }
                Ok(())
            }
            Ok(BudgetGate::Suspend) | Err(_) => {
                self.instances.interrupt(&instance.hired_instance_id).await?;
                Err(GovernanceError::Budget(format!(
                    "instance {} exhausted its daily budget",
                    instance.hired_instance_id
                )))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn gate_external_effect(
        &self,
        instance: &AgentInstance,
        step: &PlanStep,
        policies: &PolicySet,
        chain_id: &AuditChainId,
        correlation_id: CorrelationId,
        think_output: &serde_json::Value,
        cancel: CancellationToken,
        events: broadcast::Sender<OutputEvent>,
        outstanding_approvals: &mut Vec<ApprovalId>,
    ) -> Result<bool> {
        let subject = PolicySubject {
            customer_id: instance.subscription_id.to_string(),
            agent_id: instance.agent_id.clone(),
            roles: vec!["instance".to_string()],
        };

        let decision = self
            .policy_engine
            .decide(
                policies,
                &subject,
                actions::TOOL_INVOKE,
                think_output.clone(),
                &self.audit,
                chain_id,
                correlation_id.clone(),
                self.clock.now(),
            )
            .await?;

        if decision.effect == Effect::Allow {
            return Ok(true);
        }

        if decision.reason != Some(PolicyDenyReason::ApprovalRequired) {
            return Err(GovernanceError::policy_deny(
                decision.reason.unwrap_or(PolicyDenyReason::ScopeOutOfBounds),
                format!("step `{}` denied by policy", step.step_key),
            ));
        }

        let sla_hours = step.sla_hours.unwrap_or(DEFAULT_APPROVAL_SLA_HOURS).min(DEFAULT_APPROVAL_SLA_HOURS);
        let deadline = self.clock.now() + ChronoDuration::hours(sla_hours);

        let approval_id = self
            .approvals
            .submit(
                instance.subscription_id.to_string(),
                instance.agent_id.clone(),
                instance.agent_type_id.clone(),
                step.step_key.clone(),
                RiskLevel::Medium,
                ApprovalContext {
                    think: think_output.to_string(),
                    act: step.step_key.clone(),
                    observe: String::new(),
                },
                deadline,
                correlation_id,
            )
            .await?;
        outstanding_approvals.push(approval_id.clone());
        let _ = events.send(OutputEvent::ApprovalRequested {
            approval_id: approval_id.clone(),
            step_id: step.step_id.clone(),
        });

        loop {
            if cancel.is_cancelled() {
                return Err(GovernanceError::Precondition("goal cancelled while awaiting approval".to_string()));
            }
            let request = self.approvals.get(&approval_id).await?;
            match request.state {
                ApprovalState::Approved => return Ok(true),
                ApprovalState::Denied | ApprovalState::Expired => return Ok(false),
                _ => {
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_millis(APPROVAL_POLL_INTERVAL_MS)) => {}
                        _ = cancel.cancelled() => {
                            return Err(GovernanceError::Precondition("goal cancelled while awaiting approval".to_string()));
                        }
                    }
                }
            }
        }
    }

    async fn invoke_with_retries(
        &self,
        step: &PlanStep,
        correlation_id: CorrelationId,
        knowledge: Option<serde_json::Value>,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value> {
        let mut inputs = step.inputs.clone();
        if let (Some(obj), Some(k)) = (inputs.as_object_mut(), knowledge) {
            obj.insert("knowledge".to_string(), k);
        }

        let mut attempt = 0;
        loop {
            match self
                .tool_adapter
                .invoke(correlation_id.clone(), step.step_id.clone(), step, inputs.clone())
                .await
            {
                Ok(output) => return Ok(output),
                Err(e) if e.is_retryable() && attempt < step.max_retries => {
                    if !wait_or_cancel(attempt, &cancel).await {
                        return Err(GovernanceError::Precondition("goal cancelled during retry backoff".to_string()));
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Records a goal-ending step failure (e.g. `ApprovalExpired`) to the
    /// audit chain and broadcasts it, so a failure is as observable to
    /// callers as a completion is.
    async fn fail_goal(
        &self,
        chain_id: &AuditChainId,
        correlation_id: CorrelationId,
        error: &GovernanceError,
        events: &broadcast::Sender<OutputEvent>,
    ) -> Result<()> {
        let reason = error.to_string();
        self.audit
            .append(
                chain_id,
                AuditEvent {
                    correlation_id,
                    actor: "agentgov-execution".to_string(),
                    event_type: "GOAL_FAILED".to_string(),
                    payload: serde_json::json!({"reason": reason}),
                },
                self.clock.now(),
            )
            .await?;
        let _ = events.send(OutputEvent::GoalFailed { reason });
        Ok(())
    }

    async fn cancel_goal(
        &self,
        instance: &AgentInstance,
        outstanding_approvals: &[ApprovalId],
        correlation_id: CorrelationId,
    ) -> Result<()> {
        self.instances.interrupt(&instance.hired_instance_id).await?;
        for approval_id in outstanding_approvals {
            let _ = self
                .approvals
                .decide(
                    approval_id,
                    Decision::Defer,
                    "system:cancellation".to_string(),
                    Some("goal cancelled".to_string()),
                    None,
                    correlation_id.clone(),
                )
                .await;
        }
        Ok(())
    }
}

/// Submits the emergency-budget approval a caller raises when an instance's
/// daily ledger has been exhausted mid-goal.
#[allow(clippy::too_many_arguments)]
pub async fn request_emergency_budget(
    approvals: &agentgov_approval::ApprovalService,
    instance_id: &InstanceId,
    agent_id: String,
    agent_type_id: AgentTypeId,
    customer_id: String,
    additional_usd: f64,
    correlation_id: CorrelationId,
    clock: &dyn Clock,
) -> Result<ApprovalId> {
    approvals
        .submit(
            customer_id,
            agent_id,
            agent_type_id,
            "emergency_budget".to_string(),
            RiskLevel::High,
            ApprovalContext {
                think: format!("instance {instance_id} requests an emergency budget grant"),
                act: format!("grant ${additional_usd:.2}"),
                observe: String::new(),
            },
            clock.now() + ChronoDuration::hours(DEFAULT_APPROVAL_SLA_HOURS),
            correlation_id,
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgov_core::ids::{GoalId, SkillId, SubscriptionId};
    use agentgov_core::types::{GoalFrequency, Lifecycle};
    use agentgov_core::TestClock;
    use agentgov_policy::{LayerRules, Obligation, PolicyRule};
    use async_trait::async_trait;
    use chrono::Utc;

    struct EchoTool;

    #[async_trait]
    impl ToolAdapter for EchoTool {
        async fn invoke(
            &self,
            _correlation_id: CorrelationId,
            _step_id: agentgov_core::ids::StepId,
            step: &PlanStep,
            inputs: serde_json::Value,
        ) -> Result<serde_json::Value> {
            Ok(serde_json::json!({"ran": step.step_key, "inputs": inputs}))
        }
    }

    struct NoKnowledge;

    #[async_trait]
    impl KnowledgeLookup for NoKnowledge {
        async fn lookup_precedent(&self, _query: &str) -> Option<serde_json::Value> {
            None
        }

        async fn lookup_domain(&self, _query: &str) -> Result<serde_json::Value> {
            Ok(serde_json::json!({}))
        }
    }

    struct StaticPlanner(Vec<PlanStep>);

    #[async_trait]
    impl Planner for StaticPlanner {
        async fn plan(&self, _instance: &AgentInstance, _goal: &Goal) -> Result<Vec<PlanStep>> {
            Ok(self.0.clone())
        }
    }

    fn instance() -> AgentInstance {
        AgentInstance {
            hired_instance_id: InstanceId::generate(),
            subscription_id: SubscriptionId::generate(),
            agent_id: "support-bot".to_string(),
            agent_type_id: AgentTypeId::generate(),
            config: serde_json::json!({}),
            goals: vec![],
            trial_status: false,
            workspace_ref: "ws-1".to_string(),
            lifecycle: Lifecycle::Active,
            configured: true,
            budget_daily_usd: 100.0,
            configured_agent_type_version: 1,
        }
    }

    fn goal(instance_id: &InstanceId) -> Goal {
        Goal {
            goal_instance_id: GoalId::generate(),
            hired_instance_id: instance_id.clone(),
            goal_template_id: "default".to_string(),
            frequency: GoalFrequency::OneShot,
            settings: serde_json::json!({}),
        }
    }

    fn plan_step(key: &str, external_effect: bool) -> PlanStep {
        PlanStep {
            step_id: agentgov_core::ids::StepId::generate(),
            skill_id: SkillId::generate(),
            step_key: key.to_string(),
            inputs: serde_json::json!({}),
            depends_on: vec![],
            external_effect,
            sla_hours: Some(1),
            estimated_cost_usd: 1.0,
            max_retries: 0,
        }
    }

    fn executor(planner_steps: Vec<PlanStep>, clock: SharedClock) -> GoalExecutor {
        let audit = Arc::new(AuditLog::new());
        let chain_id = AuditChainId::new("tenant");
        GoalExecutor {
            policy_engine: PolicyEngine::new(),
            approvals: Arc::new(agentgov_approval::ApprovalService::new(audit.clone(), chain_id, clock.clone())),
            budget: Arc::new(BudgetLedger::new(0.8, 0.95)),
            warn_tracker: Arc::new(WarnEmissionTracker::new()),
            audit,
            instances: Arc::new(InstanceStore::new()),
            tool_adapter: Arc::new(EchoTool),
            knowledge: Arc::new(NoKnowledge),
            planner: Arc::new(StaticPlanner(planner_steps)),
            clock,
        }
    }

    #[tokio::test]
    async fn goal_with_no_external_effects_runs_straight_through() {
        let clock: SharedClock = Arc::new(TestClock::at(Utc::now()));
        let gov_instance = instance();
        let gov_goal = goal(&gov_instance.hired_instance_id);
        let exec = executor(vec![plan_step("draft_reply", false)], clock);

        let chain_id = AuditChainId::new("tenant");
        let (tx, _rx) = broadcast::channel(16);
        let outcome = exec
            .run_goal(
                &gov_instance,
                &gov_goal,
                &PolicySet::default(),
                &chain_id,
                CorrelationId::generate(),
                CancellationToken::new(),
                tx,
            )
            .await
            .unwrap();

        assert_eq!(outcome.deliverables.len(), 1);
    }

    #[tokio::test]
    async fn external_effect_step_waits_for_approval_then_completes() {
        let clock: SharedClock = Arc::new(TestClock::at(Utc::now()));
        let gov_instance = instance();
        let gov_goal = goal(&gov_instance.hired_instance_id);
        let exec = Arc::new(executor(vec![plan_step("send_email", true)], clock));

        let mut policies = PolicySet::default();
        policies.l0_platform = LayerRules {
            rules: vec![PolicyRule {
                action: actions::TOOL_INVOKE.to_string(),
                effect: Effect::Deny,
                reason: Some(PolicyDenyReason::ApprovalRequired),
                obligations: vec![Obligation::RequireApproval { risk: "medium".to_string() }],
            }],
        };

        let chain_id = AuditChainId::new("tenant");
        let (tx, mut rx) = broadcast::channel(16);

        let exec_clone = exec.clone();
        let instance_clone = gov_instance.clone();
        let goal_clone = gov_goal.clone();
        let chain_clone = chain_id.clone();
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
            .decide(&approval_id, Decision::Approve, "manager-1".to_string(), None, Some(0.95), CorrelationId::generate())
            .await
            .unwrap();

        let outcome = run.await.unwrap().unwrap();
        assert_eq!(outcome.deliverables.len(), 1);
    }

    #[tokio::test]
    async fn denied_approval_ends_the_goal_with_goal_failed() {
        let clock: SharedClock = Arc::new(TestClock::at(Utc::now()));
        let gov_instance = instance();
        let gov_goal = goal(&gov_instance.hired_instance_id);
        let exec = Arc::new(executor(vec![plan_step("publish", true)], clock));

        let mut policies = PolicySet::default();
        policies.l0_platform = LayerRules {
            rules: vec![PolicyRule {
                action: actions::TOOL_INVOKE.to_string(),
                effect: Effect::Deny,
                reason: Some(PolicyDenyReason::ApprovalRequired),
                obligations: vec![Obligation::RequireApproval { risk: "medium".to_string() }],
            }],
        };

        let chain_id = AuditChainId::new("tenant");
        let (tx, mut rx) = broadcast::channel(16);

        let exec_clone = exec.clone();
        let instance_clone = gov_instance.clone();
        let goal_clone = gov_goal.clone();
        let chain_clone = chain_id.clone();
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
            .decide(&approval_id, Decision::Deny, "manager-1".to_string(), Some("too risky".to_string()), None, CorrelationId::generate())
            .await
            .unwrap();

        let goal_failed = loop {
            match rx.recv().await.unwrap() {
                OutputEvent::GoalFailed { reason } => break reason,
                _ => continue,
            }
        };
        assert!(goal_failed.contains("not approved") || goal_failed.contains("ApprovalExpired"));

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, GovernanceError::ApprovalExpired(_)));

        let entries = exec.audit.entries(&chain_id).await;
        assert!(entries.iter().any(|e| e.event_type == "GOAL_FAILED"));
    }
}
