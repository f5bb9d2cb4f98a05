//! Approval Service.
//!
//! `PENDING -> APPROVED|DENIED|DEFERRED|ESCALATED`, and `PENDING -> EXPIRED`
//! once the deadline passes. Two decisions racing for the same approval
//! are resolved first-wins by a per-approval lock; the loser gets a
//! conflict, not a silently overwritten state. Expiry is checked both
//! lazily (on read) and eagerly (a spawned timer per pending approval)
//! so both paths converge on one audit event per approval.

use agentgov_audit::{AuditEvent, AuditLog};
use agentgov_core::ids::{AgentTypeId, ApprovalId, AuditChainId, CorrelationId};
use agentgov_core::types::{ApprovalContext, ApprovalRequest, ApprovalState, Decision, RiskLevel};
use agentgov_core::{Clock, GovernanceError, Result, SharedClock};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

struct Entry {
    request: Mutex<ApprovalRequest>,
    cancel: CancellationToken,
}

pub struct ApprovalService {
    entries: Arc<DashMap<ApprovalId, Arc<Entry>>>,
    audit: Arc<AuditLog>,
    chain_id: AuditChainId,
    clock: SharedClock,
}

impl ApprovalService {
    pub fn new(audit: Arc<AuditLog>, chain_id: AuditChainId, clock: SharedClock) -> Self {
        Self { entries: Arc::new(DashMap::new()), audit, chain_id, clock }
    }

    /// Create a new PENDING approval and arm its expiry timer.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit(
        &self,
        customer_id: String,
        agent_id: String,
        agent_type_id: AgentTypeId,
        action: String,
        risk: RiskLevel,
        context: ApprovalContext,
        deadline: DateTime<Utc>,
        correlation_id: CorrelationId,
    ) -> Result<ApprovalId> {
        let approval_id = ApprovalId::generate();
        let request = ApprovalRequest {
            approval_id: approval_id.clone(),
            customer_id,
            agent_id,
            agent_type_id,
            action,
            risk,
            context,
            deadline,
            state: ApprovalState::Pending,
            decided_at: None,
            decided_by: None,
            reason: None,
            confidence: None,
            seed_id: None,
        };

        let cancel = CancellationToken::new();
        let entry = Arc::new(Entry { request: Mutex::new(request), cancel: cancel.clone() });
        self.entries.insert(approval_id.clone(), entry);

        self.arm_timer(approval_id.clone(), deadline, correlation_id.clone(), cancel);

        self.audit_event(
            &approval_id,
            correlation_id,
            "ApprovalSubmitted",
            serde_json::json!({"approval_id": approval_id.to_string()}),
        )
        .await?;

        Ok(approval_id)
    }

    fn arm_timer(
        &self,
        approval_id: ApprovalId,
        deadline: DateTime<Utc>,
        correlation_id: CorrelationId,
        cancel: CancellationToken,
    ) {
        let now = self.clock.now();
        let remaining = (deadline - now).to_std().unwrap_or(std::time::Duration::from_secs(0));
        let entries = self.entries.clone();
        let audit = self.audit.clone();
        let chain_id = self.chain_id.clone();
        let clock = self.clock.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {
                    if let Some(entry) = entries.get(&approval_id) {
                        let entry = entry.clone();
                        let now = clock.now();
                        let mut request = entry.request.lock().await;
                        if !request.state.is_terminal() {
                            request.state = ApprovalState::Expired;
                            request.decided_at = Some(now);
                            let _ = audit
                                .append(
                                    &chain_id,
                                    AuditEvent {
                                        correlation_id,
                                        actor: "agentgov-approval".to_string(),
                                        event_type: "ApprovalExpired".to_string(),
                                        payload: serde_json::json!({"approval_id": approval_id.to_string()}),
                                    },
                                    now,
                                )
                                .await;
                        }
                    }
                }
                _ = cancel.cancelled() => {}
            }
        });
    }

    async fn audit_event(
        &self,
        approval_id: &ApprovalId,
        correlation_id: CorrelationId,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        let now = self.clock.now();
        self.audit
            .append(
                &self.chain_id,
                AuditEvent { correlation_id, actor: "agentgov-approval".to_string(), event_type: event_type.to_string(), payload },
                now,
            )
            .await?;
        let _ = approval_id;
        Ok(())
    }

    /// Lazily expire on read if the deadline has passed but the timer
    /// hasn't fired yet, then return the current state.
    pub async fn get(&self, approval_id: &ApprovalId) -> Result<ApprovalRequest> {
        let entry = self
            .entries
            .get(approval_id)
            .map(|e| e.clone())
            .ok_or_else(|| GovernanceError::NotFound(format!("approval {approval_id}")))?;

        let now = self.clock.now();
        let mut request = entry.request.lock().await;
        if !request.state.is_terminal() && now >= request.deadline {
            request.state = ApprovalState::Expired;
            request.decided_at = Some(now);
        }
        Ok(request.clone())
    }

    /// Apply a decision. First-wins: a decision against an already-terminal
    /// approval is a conflict, not an overwrite.
    #[allow(clippy::too_many_arguments)]
    pub async fn decide(
        &self,
        approval_id: &ApprovalId,
        decision: Decision,
        decided_by: String,
        reason: Option<String>,
        confidence: Option<f64>,
        correlation_id: CorrelationId,
    ) -> Result<ApprovalRequest> {
        let entry = self
            .entries
            .get(approval_id)
            .map(|e| e.clone())
            .ok_or_else(|| GovernanceError::NotFound(format!("approval {approval_id}")))?;

        let now = self.clock.now();
        let mut request = entry.request.lock().await;

        if !request.state.is_terminal() && now >= request.deadline {
            request.state = ApprovalState::Expired;
            request.decided_at = Some(now);
        }

        let next_state = match (request.state, decision) {
            (ApprovalState::Pending, Decision::Approve) => ApprovalState::Approved,
            (ApprovalState::Pending, Decision::Deny) => ApprovalState::Denied,
            (ApprovalState::Pending, Decision::Defer) => ApprovalState::Deferred,
            (ApprovalState::Pending, Decision::Escalate) => ApprovalState::Escalated,
            (ApprovalState::Escalated, Decision::Approve) => ApprovalState::Approved,
            (ApprovalState::Escalated, Decision::Deny) => ApprovalState::Denied,
            (state, _) if state.is_terminal() => {
                return Err(GovernanceError::Conflict(format!(
                    "approval {approval_id} is already in terminal state {state:?}"
                )));
            }
            (state, decision) => {
                return Err(GovernanceError::Conflict(format!(
                    "cannot apply {decision:?} to approval in state {state:?}"
                )));
            }
        };

        request.state = next_state;
        request.decided_at = Some(now);
        request.decided_by = Some(decided_by);
        request.reason = reason;
        request.confidence = confidence;

        // Any successful decision retires the armed expiry timer for this
        // entry, terminal or not — DEFERRED/ESCALATED get a fresh one from
        // `resubmit` rather than racing the original deadline.
        entry.cancel.cancel();

        let payload = serde_json::json!({
            "approval_id": approval_id.to_string(),
            "decision": format!("{decision:?}"),
            "next_state": format!("{next_state:?}"),
        });
        drop(request);
        self.audit
            .append(
                &self.chain_id,
                AuditEvent {
                    correlation_id,
                    actor: "agentgov-approval".to_string(),
                    event_type: "ApprovalDecided".to_string(),
                    payload,
                },
                now,
            )
            .await?;

        let request = entry.request.lock().await;
        Ok(request.clone())
    }

    /// `DEFERRED -> resubmit -> PENDING`, with a fresh deadline and timer.
    pub async fn resubmit(
        &self,
        approval_id: &ApprovalId,
        new_deadline: DateTime<Utc>,
        correlation_id: CorrelationId,
    ) -> Result<ApprovalRequest> {
        let entry = self
            .entries
            .get(approval_id)
            .map(|e| e.clone())
            .ok_or_else(|| GovernanceError::NotFound(format!("approval {approval_id}")))?;

        {
            let mut request = entry.request.lock().await;
            if request.state != ApprovalState::Deferred {
                return Err(GovernanceError::Conflict(format!(
                    "approval {approval_id} is not deferred (state {:?})",
                    request.state
                )));
            }
            request.state = ApprovalState::Pending;
            request.deadline = new_deadline;
            request.decided_at = None;
            request.decided_by = None;
            request.reason = None;
            request.confidence = None;
        }

        let cancel = CancellationToken::new();
        let new_entry = Arc::new(Entry { request: Mutex::new(entry.request.lock().await.clone()), cancel: cancel.clone() });
        self.entries.insert(approval_id.clone(), new_entry);
        self.arm_timer(approval_id.clone(), new_deadline, correlation_id, cancel);

        self.get(approval_id).await
    }

    /// A live snapshot of every approval currently in the `APPROVED` state,
    /// for the precedent learner's batch scan. Entries held under a
    /// contended lock are skipped rather than awaited — the scan runs
    /// again on the next cycle, so a momentary miss is harmless.
    pub fn approved_snapshot(&self) -> Vec<ApprovalRequest> {
        self.entries
            .iter()
            .filter_map(|kv| {
                let guard = kv.value().request.try_lock().ok()?;
                if guard.state == ApprovalState::Approved {
                    Some(guard.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// A live snapshot of every approval regardless of state, for the
    /// gateway's list surface. Same contended-lock skip as
    /// `approved_snapshot` — a momentary miss just isn't in this page.
    pub fn snapshot_all(&self) -> Vec<ApprovalRequest> {
        self.entries.iter().filter_map(|kv| kv.value().request.try_lock().ok().map(|g| g.clone())).collect()
    }

    /// Create an approval record that is already `APPROVED`, attributed to
    /// a precedent seed rather than a human decision. The deadline doubles
    /// as the veto window: `decide`'s first-wins lock still applies, so a
    /// veto racing a (hypothetical) manual override is resolved the same
    /// way any other conflicting decision would be.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit_auto_approved(
        &self,
        customer_id: String,
        agent_id: String,
        agent_type_id: AgentTypeId,
        action: String,
        risk: RiskLevel,
        context: ApprovalContext,
        seed_id: agentgov_core::ids::SeedId,
        veto_deadline: DateTime<Utc>,
        correlation_id: CorrelationId,
    ) -> Result<ApprovalId> {
        let approval_id = ApprovalId::generate();
        let now = self.clock.now();
        let request = ApprovalRequest {
            approval_id: approval_id.clone(),
            customer_id,
            agent_id,
            agent_type_id,
            action,
            risk,
            context,
            deadline: veto_deadline,
            state: ApprovalState::Approved,
            decided_at: Some(now),
            decided_by: Some(format!("precedent:{seed_id}")),
            reason: Some("auto-approved by precedent seed".to_string()),
            confidence: None,
            seed_id: Some(seed_id.clone()),
        };

        let cancel = CancellationToken::new();
        let entry = Arc::new(Entry { request: Mutex::new(request), cancel });
        self.entries.insert(approval_id.clone(), entry);

        self.audit_event(
            &approval_id,
            correlation_id,
            "ApprovalAutoApproved",
            serde_json::json!({"approval_id": approval_id.to_string(), "seed_id": seed_id.to_string()}),
        )
        .await?;

        Ok(approval_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgov_core::{ids::AuditChainId, TestClock};
    use chrono::Duration;

    fn ctx() -> ApprovalContext {
        ApprovalContext { think: "t".to_string(), act: "a".to_string(), observe: "o".to_string() }
    }

    fn agent_type() -> AgentTypeId {
        AgentTypeId::new("support-bot-v1")
    }

    async fn service(clock: TestClock) -> ApprovalService {
        let audit = Arc::new(AuditLog::new());
        let chain_id = AuditChainId::new("tenant");
        ApprovalService::new(audit, chain_id, Arc::new(clock))
    }

    #[tokio::test]
    async fn approve_transitions_pending_to_approved() {
        let clock = TestClock::at(Utc::now());
        let svc = service(clock.clone()).await;
        let id = svc
            .submit(
                "cust".into(),
                "agent".into(),
                agent_type(),
                "send_email".into(),
                RiskLevel::Medium,
                ctx(),
                clock.now() + Duration::minutes(15),
                CorrelationId::generate(),
            )
            .await
            .unwrap();

        let request = svc
            .decide(&id, Decision::Approve, "manager-1".into(), None, Some(0.95), CorrelationId::generate())
            .await
            .unwrap();
        assert_eq!(request.state, ApprovalState::Approved);
    }

    #[tokio::test]
    async fn second_decision_against_terminal_state_is_a_conflict() {
        let clock = TestClock::at(Utc::now());
        let svc = service(clock.clone()).await;
        let id = svc
            .submit(
                "cust".into(),
                "agent".into(),
                agent_type(),
                "send_email".into(),
                RiskLevel::Low,
                ctx(),
                clock.now() + Duration::minutes(15),
                CorrelationId::generate(),
            )
            .await
            .unwrap();

        svc.decide(&id, Decision::Deny, "m1".into(), None, Some(0.4), CorrelationId::generate()).await.unwrap();
        let err = svc
            .decide(&id, Decision::Approve, "m2".into(), None, Some(0.9), CorrelationId::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Conflict(_)));
    }

    #[tokio::test]
    async fn lazy_expiry_fires_on_read_past_deadline() {
        let clock = TestClock::at(Utc::now());
        let svc = service(clock.clone()).await;
        let id = svc
            .submit(
                "cust".into(),
                "agent".into(),
                agent_type(),
                "send_email".into(),
                RiskLevel::High,
                ctx(),
                clock.now() + Duration::seconds(1),
                CorrelationId::generate(),
            )
            .await
            .unwrap();

        clock.advance(Duration::seconds(2));
        let request = svc.get(&id).await.unwrap();
        assert_eq!(request.state, ApprovalState::Expired);
    }

    #[tokio::test]
    async fn escalation_requires_a_second_decision() {
        let clock = TestClock::at(Utc::now());
        let svc = service(clock.clone()).await;
        let id = svc
            .submit(
                "cust".into(),
                "agent".into(),
                agent_type(),
                "wire_transfer".into(),
                RiskLevel::High,
                ctx(),
                clock.now() + Duration::minutes(30),
                CorrelationId::generate(),
            )
            .await
            .unwrap();

        let request = svc
            .decide(&id, Decision::Escalate, "agent-1".into(), None, None, CorrelationId::generate())
            .await
            .unwrap();
        assert_eq!(request.state, ApprovalState::Escalated);

        let request = svc
            .decide(&id, Decision::Approve, "director-1".into(), None, Some(0.95), CorrelationId::generate())
            .await
            .unwrap();
        assert_eq!(request.state, ApprovalState::Approved);
    }

    #[tokio::test]
    async fn deferred_approval_can_be_resubmitted_to_pending() {
        let clock = TestClock::at(Utc::now());
        let svc = service(clock.clone()).await;
        let id = svc
            .submit(
                "cust".into(),
                "agent".into(),
                agent_type(),
                "send_email".into(),
                RiskLevel::Low,
                ctx(),
                clock.now() + Duration::minutes(15),
                CorrelationId::generate(),
            )
            .await
            .unwrap();

        let request = svc
            .decide(&id, Decision::Defer, "m1".into(), Some("need more info".into()), None, CorrelationId::generate())
            .await
            .unwrap();
        assert_eq!(request.state, ApprovalState::Deferred);

        let request = svc.resubmit(&id, clock.now() + Duration::minutes(30), CorrelationId::generate()).await.unwrap();
        assert_eq!(request.state, ApprovalState::Pending);
    }

    #[tokio::test]
    async fn auto_approved_record_is_already_terminal_with_a_seed_id() {
        let clock = TestClock::at(Utc::now());
        let svc = service(clock.clone()).await;
        let id = svc
            .submit_auto_approved(
                "cust".into(),
                "agent".into(),
                agent_type(),
                "send_email".into(),
                RiskLevel::Low,
                ctx(),
                agentgov_core::ids::SeedId::new("HC-001"),
                clock.now() + Duration::hours(24),
                CorrelationId::generate(),
            )
            .await
            .unwrap();

        let request = svc.get(&id).await.unwrap();
        assert_eq!(request.state, ApprovalState::Approved);
        assert_eq!(request.seed_id.unwrap().as_str(), "HC-001");
    }
}
