//! Precedent Learner — mines the approval trail for repeated patterns,
//! drafts seeds for the certification authority to review, and handles
//! the veto path when an auto-approved, seed-driven action turns out to
//! be wrong.
//!
//! The learner never approves anything itself: drafting is a pure
//! function of the approval history, and every draft still needs a human
//! certification decision before it can grant latitude to an instance.

pub mod defaults;

use agentgov_audit::{AuditEvent, AuditLog};
use agentgov_core::ids::{AgentTypeId, ApprovalId, AuditChainId, CorrelationId, SeedId};
use agentgov_core::types::{ApprovalContext, ApprovalRequest, PrecedentSeed, RiskLevel, SeedStatus};
use agentgov_core::{GovernanceError, PolicyDenyReason, Result, SharedClock};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub use defaults::NoopCompensator;

/// Minimum sample size before a group is even considered for a draft.
pub const MIN_SAMPLES: usize = 3;
/// Minimum mean reviewer confidence across the group's approvals.
pub const MIN_MEAN_CONFIDENCE: f64 = 0.9;
/// Default window during which an auto-approved action can still be vetoed.
pub const DEFAULT_VETO_WINDOW_HOURS: i64 = 24;
/// False positives after which a seed is pulled from service automatically.
pub const DEFAULT_FALSE_POSITIVE_THRESHOLD: u32 = 3;

/// The five criteria a certification reviewer checks before approving a
/// draft seed. All must hold for an `Approve` outcome to be accepted —
/// anything less and the learner rejects the attempt rather than silently
/// downgrading it, the same way `PolicySet`'s layers only ever tighten.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewCriteria {
    pub consistent_with_platform_and_tenant_policy: bool,
    pub specific_scope: bool,
    pub justified: bool,
    pub reusable_scope: bool,
    pub non_weakening: bool,
}

impl ReviewCriteria {
    pub fn all_pass(&self) -> bool {
        self.consistent_with_platform_and_tenant_policy
            && self.specific_scope
            && self.justified
            && self.reusable_scope
            && self.non_weakening
    }
}

#[derive(Debug, Clone)]
pub enum ReviewDecision {
    Approve,
    Reject(String),
    Revise(String),
    Defer(String),
}

/// The Tool adapter's compensation interface, as seen from the learner:
/// undo the effect of an auto-approved action when its owner vetoes it.
#[async_trait]
pub trait Compensator: Send + Sync {
    async fn compensate(&self, approval: &ApprovalRequest) -> Result<()>;
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct GroupKey {
    agent_type_id: AgentTypeId,
    action: String,
    risk: RiskLevelKey,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
enum RiskLevelKey {
    Low,
    Medium,
    High,
}

impl From<RiskLevel> for RiskLevelKey {
    fn from(r: RiskLevel) -> Self {
        match r {
            RiskLevel::Low => Self::Low,
            RiskLevel::Medium => Self::Medium,
            RiskLevel::High => Self::High,
        }
    }
}

pub struct PrecedentLearner {
    seeds: Mutex<HashMap<SeedId, PrecedentSeed>>,
    audit: Arc<AuditLog>,
    chain_id: AuditChainId,
    clock: SharedClock,
    false_positive_threshold: u32,
}

impl PrecedentLearner {
    pub fn new(audit: Arc<AuditLog>, chain_id: AuditChainId, clock: SharedClock) -> Self {
        Self {
            seeds: Mutex::new(HashMap::new()),
            audit,
            chain_id,
            clock,
            false_positive_threshold: DEFAULT_FALSE_POSITIVE_THRESHOLD,
        }
    }

    /// Scan APPROVED decisions made within the trailing `window`, group by
    /// `{agent_type, action, risk_bucket}`, and draft a seed for every
    /// group that clears both thresholds. Returns the drafted seed ids.
    pub async fn run_once(
        &self,
        approvals: &[ApprovalRequest],
        window: Duration,
        correlation_id: CorrelationId,
    ) -> Result<Vec<SeedId>> {
        let now = self.clock.now();
        let cutoff = now - window;

        let mut groups: HashMap<GroupKey, Vec<&ApprovalRequest>> = HashMap::new();
        for request in approvals {
            let Some(decided_at) = request.decided_at else { continue };
            if decided_at < cutoff {
                continue;
            }
            if request.confidence.is_none() {
                continue;
            }
            let key = GroupKey {
                agent_type_id: request.agent_type_id.clone(),
                action: request.action.clone(),
                risk: request.risk.into(),
            };
            groups.entry(key).or_default().push(request);
        }

        let mut drafted = Vec::new();
        for (key, members) in groups {
            if members.len() < MIN_SAMPLES {
                continue;
            }
            let mean_confidence: f64 =
                members.iter().filter_map(|r| r.confidence).sum::<f64>() / members.len() as f64;
            if mean_confidence < MIN_MEAN_CONFIDENCE {
                continue;
            }

            let example = members[0].context.clone();
            let seed_id = self.draft(key, members.len(), mean_confidence, example, now, correlation_id.clone()).await?;
            drafted.push(seed_id);
        }

        Ok(drafted)
    }

    async fn draft(
        &self,
        key: GroupKey,
        sample_size: usize,
        mean_confidence: f64,
        example: ApprovalContext,
        now: DateTime<Utc>,
        correlation_id: CorrelationId,
    ) -> Result<SeedId> {
        let seed_id = SeedId::generate();
        let seed = PrecedentSeed {
            seed_id: seed_id.clone(),
            seed_type: "auto_approve_action".to_string(),
            principle: format!(
                "repeatedly approved: agent type `{}`, action `{}`",
                key.agent_type_id, key.action
            ),
            rationale: format!(
                "{sample_size} approvals in the lookback window, mean reviewer confidence {mean_confidence:.2}"
            ),
            example,
            applies_to: vec![format!("agent_type:{}", key.agent_type_id), format!("action:{}", key.action)],
            status: SeedStatus::Draft,
            approved_at: None,
            false_positive_count: 0,
        };

        self.seeds.lock().await.insert(seed_id.clone(), seed);

        self.audit
            .append(
                &self.chain_id,
                AuditEvent {
                    correlation_id,
                    actor: "agentgov-learner".to_string(),
                    event_type: "PrecedentSeedDrafted".to_string(),
                    payload: serde_json::json!({
                        "seed_id": seed_id.to_string(),
                        "agent_type_id": key.agent_type_id.to_string(),
                        "action": key.action,
                        "sample_size": sample_size,
                        "mean_confidence": mean_confidence,
                    }),
                },
                now,
            )
            .await?;

        Ok(seed_id)
    }

    /// Certification authority review of a drafted seed. An `Approve`
    /// outcome is refused unless every criterion holds — the learner
    /// enforces that gate itself rather than trusting the caller.
    pub async fn review(
        &self,
        seed_id: &SeedId,
        criteria: ReviewCriteria,
        decision: ReviewDecision,
        correlation_id: CorrelationId,
    ) -> Result<PrecedentSeed> {
        if matches!(decision, ReviewDecision::Approve) && !criteria.all_pass() {
            return Err(GovernanceError::Validation(format!(
                "seed {seed_id} failed certification criteria and cannot be approved"
            )));
        }

        let now = self.clock.now();
        let mut seeds = self.seeds.lock().await;
        let seed = seeds
            .get_mut(seed_id)
            .ok_or_else(|| GovernanceError::NotFound(format!("precedent seed {seed_id}")))?;

        if seed.status != SeedStatus::Draft {
            return Err(GovernanceError::Conflict(format!(
                "seed {seed_id} is not in draft (status {:?})",
                seed.status
            )));
        }

        let (outcome_label, reason) = match &decision {
            ReviewDecision::Approve => {
                seed.status = SeedStatus::Approved;
                seed.approved_at = Some(now);
                ("approved", None)
            }
            ReviewDecision::Reject(reason) => {
                seed.status = SeedStatus::Rejected;
                ("rejected", Some(reason.clone()))
            }
            ReviewDecision::Revise(reason) => {
                seed.status = SeedStatus::Revised;
                ("revised", Some(reason.clone()))
            }
            ReviewDecision::Defer(reason) => {
                seed.status = SeedStatus::Deferred;
                ("deferred", Some(reason.clone()))
            }
        };
        let result = seed.clone();
        drop(seeds);

        self.audit
            .append(
                &self.chain_id,
                AuditEvent {
                    correlation_id,
                    actor: "agentgov-learner".to_string(),
                    event_type: "PrecedentSeedReviewed".to_string(),
                    payload: serde_json::json!({
                        "seed_id": seed_id.to_string(),
                        "outcome": outcome_label,
                        "reason": reason,
                        "criteria": {
                            "consistent_with_platform_and_tenant_policy": criteria.consistent_with_platform_and_tenant_policy,
                            "specific_scope": criteria.specific_scope,
                            "justified": criteria.justified,
                            "reusable_scope": criteria.reusable_scope,
                            "non_weakening": criteria.non_weakening,
                        },
                    }),
                },
                now,
            )
            .await?;

        Ok(result)
    }

    /// Approved seeds whose scope tags cover the given agent type — what
    /// an instance's precedent cache pulls on its next sync cycle.
    pub async fn eligible_seeds(&self, agent_type_id: &AgentTypeId) -> Vec<PrecedentSeed> {
        let tag = format!("agent_type:{agent_type_id}");
        self.seeds
            .lock()
            .await
            .values()
            .filter(|s| s.status == SeedStatus::Approved && s.applies_to.contains(&tag))
            .cloned()
            .collect()
    }

    /// Grant latitude: create an already-APPROVED, informational approval
    /// record attributed to `seed_id`, with a veto window the owner can
    /// still exercise. Refuses seeds that have since been deprecated.
    #[allow(clippy::too_many_arguments)]
    pub async fn auto_approve(
        &self,
        approvals: &agentgov_approval::ApprovalService,
        seed_id: &SeedId,
        customer_id: String,
        agent_id: String,
        agent_type_id: AgentTypeId,
        action: String,
        risk: RiskLevel,
        context: ApprovalContext,
        correlation_id: CorrelationId,
    ) -> Result<ApprovalId> {
        let status = {
            let seeds = self.seeds.lock().await;
            seeds.get(seed_id).map(|s| s.status)
        };
        match status {
            Some(SeedStatus::Approved) => {}
            Some(_) => {
                return Err(GovernanceError::policy_deny(
                    PolicyDenyReason::SeedVetoed,
                    format!("seed {seed_id} is no longer approved"),
                ))
            }
            None => return Err(GovernanceError::NotFound(format!("precedent seed {seed_id}"))),
        }

        let now = self.clock.now();
        let veto_deadline = now + Duration::hours(DEFAULT_VETO_WINDOW_HOURS);
        approvals
            .submit_auto_approved(
                customer_id,
                agent_id,
                agent_type_id,
                action,
                risk,
                context,
                seed_id.clone(),
                veto_deadline,
                correlation_id,
            )
            .await
    }

    /// The owner vetoes an auto-approved action within its window: the
    /// compensator reverses the effect, and the seed's false-positive
    /// count climbs toward automatic deprecation.
    pub async fn veto(
        &self,
        approvals: &agentgov_approval::ApprovalService,
        compensator: &dyn Compensator,
        approval_id: &ApprovalId,
        correlation_id: CorrelationId,
    ) -> Result<()> {
        let request = approvals.get(approval_id).await?;
        let seed_id = request
            .seed_id
            .clone()
            .ok_or_else(|| GovernanceError::Precondition(format!("approval {approval_id} was not seed-driven")))?;

        let now = self.clock.now();
        if now > request.deadline {
            return Err(GovernanceError::Precondition(format!(
                "veto window for approval {approval_id} has closed"
            )));
        }

        compensator.compensate(&request).await?;

        let mut seeds = self.seeds.lock().await;
        let seed = seeds
            .get_mut(&seed_id)
            .ok_or_else(|| GovernanceError::NotFound(format!("precedent seed {seed_id}")))?;
        seed.false_positive_count += 1;
        let deprecated = seed.false_positive_count >= self.false_positive_threshold;
        if deprecated {
            seed.status = SeedStatus::Deprecated;
        }
        let false_positive_count = seed.false_positive_count;
        drop(seeds);

        self.audit
            .append(
                &self.chain_id,
                AuditEvent {
                    correlation_id,
                    actor: "agentgov-learner".to_string(),
                    event_type: "PrecedentSeedVetoed".to_string(),
                    payload: serde_json::json!({
                        "approval_id": approval_id.to_string(),
                        "seed_id": seed_id.to_string(),
                        "false_positive_count": false_positive_count,
                        "deprecated": deprecated,
                    }),
                },
                now,
            )
            .await?;

        Ok(())
    }
}
