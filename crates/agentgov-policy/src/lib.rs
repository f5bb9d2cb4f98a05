//! Policy Decision Point / Policy Enforcement Point.
//!
//! A pure, side-effect-free `decide` folds four layers of rules —
//! platform, tenant, agent type, instance — from least to most specific.
//! A lower (earlier) layer may only tighten what a higher layer already
//! allowed; it can never loosen a deny into an allow. Default posture is
//! deny.

use agentgov_audit::{AuditEvent, AuditLog};
use agentgov_core::ids::{AuditChainId, CorrelationId, DecisionId};
use agentgov_core::{GovernanceError, PolicyDenyReason, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySubject {
    pub customer_id: String,
    pub agent_id: String,
    pub roles: Vec<String>,
}

/// Deny-taxonomy action names plus the two extra surfaces the engine also
/// gates: `approval.decide` and the emergency-budget override path.
pub mod actions {
    pub const TOOL_INVOKE: &str = "tool.invoke";
    pub const EXTERNAL_EFFECT: &str = "external_effect";
    pub const APPROVAL_DECIDE: &str = "approval.decide";
    pub const EMERGENCY_BUDGET: &str = "emergency_budget";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Obligation {
    RequireApproval { risk: String },
    BudgetDebit { cents: i64 },
    TrialMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyLayer {
    L0Platform,
    L1Tenant,
    L2AgentType,
    L3Instance,
}

impl PolicyLayer {
    fn ascending() -> [PolicyLayer; 4] {
        [Self::L0Platform, Self::L1Tenant, Self::L2AgentType, Self::L3Instance]
    }
}

/// A single rule: does `action` match, and if so what does this layer say?
#[derive(Debug, Clone)]
pub struct PolicyRule {
    pub action: String,
    pub effect: Effect,
    pub reason: Option<PolicyDenyReason>,
    pub obligations: Vec<Obligation>,
}

#[derive(Debug, Clone, Default)]
pub struct LayerRules {
    pub rules: Vec<PolicyRule>,
}

impl LayerRules {
    fn matching(&self, action: &str) -> Option<&PolicyRule> {
        self.rules.iter().find(|r| r.action == action)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    pub l0_platform: LayerRules,
    pub l1_tenant: LayerRules,
    pub l2_agent_type: LayerRules,
    pub l3_instance: LayerRules,
}

impl PolicySet {
    fn layer(&self, layer: PolicyLayer) -> &LayerRules {
        match layer {
            PolicyLayer::L0Platform => &self.l0_platform,
            PolicyLayer::L1Tenant => &self.l1_tenant,
            PolicyLayer::L2AgentType => &self.l2_agent_type,
            PolicyLayer::L3Instance => &self.l3_instance,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub decision_id: DecisionId,
    pub effect: Effect,
    pub reason: Option<PolicyDenyReason>,
    pub obligations: Vec<Obligation>,
}

pub struct PolicyEngine;

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self
    }

    /// Fold L0 -> L3 and append the resulting `PolicyDecisionRecorded`
    /// event to `audit` before returning it to the caller — every decision
    /// is logged before the enforcement point returns.
    pub async fn decide(
        &self,
        policies: &PolicySet,
        subject: &PolicySubject,
        action: &str,
        context: serde_json::Value,
        audit: &AuditLog,
        chain_id: &AuditChainId,
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
    ) -> Result<PolicyDecision> {
        let decision_id = DecisionId::generate();
        let mut effect = Effect::Deny;
        let mut has_decided = false;
        let mut reason: Option<PolicyDenyReason> = None;
        let mut obligations = Vec::new();

        for layer in PolicyLayer::ascending() {
            let Some(rule) = policies.layer(layer).matching(action) else { continue };

            match rule.effect {
                Effect::Allow => {
                    if has_decided && effect == Effect::Deny {
                        // A prior layer denied; a later layer may never
                        // loosen that back into an allow.
                        debug_assert!(
                            false,
                            "layer {layer:?} attempted to loosen a prior deny for {action}"
                        );
                        return Err(GovernanceError::Validation(format!(
                            "policy layer {layer:?} loosened a prior deny for action {action}"
                        )));
                    }
                    effect = Effect::Allow;
                    has_decided = true;
                    obligations.extend(rule.obligations.iter().cloned());
                }
                Effect::Deny => {
                    effect = Effect::Deny;
                    has_decided = true;
                    reason = rule.reason.or(reason);
                    obligations.extend(rule.obligations.iter().cloned());
                }
            }
        }

        if effect == Effect::Deny && reason.is_none() {
            reason = Some(PolicyDenyReason::ScopeOutOfBounds);
        }

        let decision = PolicyDecision { decision_id: decision_id.clone(), effect, reason, obligations };

        let payload = serde_json::json!({
            "subject": {
                "customer_id": subject.customer_id,
                "agent_id": subject.agent_id,
                "roles": subject.roles,
            },
            "action": action,
            "context": context,
            "effect": matches!(decision.effect, Effect::Allow),
            "reason": decision.reason.map(|r| r.as_str()),
        });

        audit
            .append(
                chain_id,
                AuditEvent {
                    correlation_id,
                    actor: "agentgov-policy".to_string(),
                    event_type: "PolicyDecisionRecorded".to_string(),
                    payload,
                },
                now,
            )
            .await?;

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgov_core::ids::AuditChainId;

    fn subject() -> PolicySubject {
        PolicySubject {
            customer_id: "cust-1".to_string(),
            agent_id: "agent-1".to_string(),
            roles: vec!["owner".to_string()],
        }
    }

    #[tokio::test]
    async fn default_posture_is_deny_for_unmatched_action() {
        let engine = PolicyEngine::new();
        let audit = AuditLog::new();
        let chain_id = AuditChainId::new("cust-1");
        let decision = engine
            .decide(
                &PolicySet::default(),
                &subject(),
                actions::TOOL_INVOKE,
                serde_json::json!({}),
                &audit,
                &chain_id,
                CorrelationId::generate(),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(decision.effect, Effect::Deny);
        assert_eq!(decision.reason, Some(PolicyDenyReason::ScopeOutOfBounds));
    }

    #[tokio::test]
    async fn lower_layer_can_tighten_an_allow_into_a_deny() {
        let mut policies = PolicySet::default();
        policies.l0_platform.rules.push(PolicyRule {
            action: actions::TOOL_INVOKE.to_string(),
            effect: Effect::Allow,
            reason: None,
            obligations: vec![],
        });
        policies.l3_instance.rules.push(PolicyRule {
            action: actions::TOOL_INVOKE.to_string(),
            effect: Effect::Deny,
            reason: Some(PolicyDenyReason::InstanceSuspended),
            obligations: vec![],
        });

        let engine = PolicyEngine::new();
        let audit = AuditLog::new();
        let chain_id = AuditChainId::new("cust-1");
        let decision = engine
            .decide(
                &policies,
                &subject(),
                actions::TOOL_INVOKE,
                serde_json::json!({}),
                &audit,
                &chain_id,
                CorrelationId::generate(),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(decision.effect, Effect::Deny);
        assert_eq!(decision.reason, Some(PolicyDenyReason::InstanceSuspended));
    }

    #[tokio::test]
    async fn higher_layer_cannot_loosen_a_platform_deny_into_an_allow() {
        let mut policies = PolicySet::default();
        policies.l0_platform.rules.push(PolicyRule {
            action: actions::TOOL_INVOKE.to_string(),
            effect: Effect::Deny,
            reason: Some(PolicyDenyReason::ToolNotAuthorized),
            obligations: vec![],
        });
        policies.l3_instance.rules.push(PolicyRule {
            action: actions::TOOL_INVOKE.to_string(),
            effect: Effect::Allow,
            reason: None,
            obligations: vec![],
        });

        let engine = PolicyEngine::new();
        let audit = AuditLog::new();
        let chain_id = AuditChainId::new("cust-1");
        let result = engine
            .decide(
                &policies,
                &subject(),
                actions::TOOL_INVOKE,
                serde_json::json!({}),
                &audit,
                &chain_id,
                CorrelationId::generate(),
                Utc::now(),
            )
            .await;
        assert!(matches!(result, Err(GovernanceError::Validation(_))));
    }

    #[tokio::test]
    async fn every_decision_is_logged_before_returning() {
        let engine = PolicyEngine::new();
        let audit = AuditLog::new();
        let chain_id = AuditChainId::new("cust-1");
        engine
            .decide(
                &PolicySet::default(),
                &subject(),
                actions::TOOL_INVOKE,
                serde_json::json!({}),
                &audit,
                &chain_id,
                CorrelationId::generate(),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(audit.len(&chain_id).await, 1);
    }

    #[tokio::test]
    async fn trial_mode_obligation_surfaces_from_tenant_layer() {
        let mut policies = PolicySet::default();
        policies.l0_platform.rules.push(PolicyRule {
            action: actions::TOOL_INVOKE.to_string(),
            effect: Effect::Allow,
            reason: None,
            obligations: vec![],
        });
        policies.l1_tenant.rules.push(PolicyRule {
            action: actions::TOOL_INVOKE.to_string(),
            effect: Effect::Allow,
            reason: None,
            obligations: vec![Obligation::TrialMode],
        });

        let engine = PolicyEngine::new();
        let audit = AuditLog::new();
        let chain_id = AuditChainId::new("cust-1");
        let decision = engine
            .decide(
                &policies,
                &subject(),
                actions::TOOL_INVOKE,
                serde_json::json!({}),
                &audit,
                &chain_id,
                CorrelationId::generate(),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(decision.effect, Effect::Allow);
        assert!(decision.obligations.contains(&Obligation::TrialMode));
    }
}
