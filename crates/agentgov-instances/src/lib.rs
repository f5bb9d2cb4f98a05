//! Subscription & Instance Store.
//!
//! Mutations of a single instance serialize through a per-instance lock
//! that is *leased*, not held across external calls — a caller acquires
//! the lease, does its validation (which may itself await the registry),
//! mutates the record, and releases, rather than pinning the lock for the
//! whole operation's external I/O.

use agentgov_core::ids::InstanceId;
use agentgov_core::types::{AgentInstance, Goal, Lifecycle, LifecycleEvent};
use agentgov_core::{GovernanceError, PolicyDenyReason, Result};
use agentgov_registry::CertificationAuthority;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct InstanceStore {
    records: DashMap<InstanceId, AgentInstance>,
    leases: DashMap<InstanceId, Arc<Mutex<()>>>,
}

impl Default for InstanceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceStore {
    pub fn new() -> Self {
        Self { records: DashMap::new(), leases: DashMap::new() }
    }

    fn lease(&self, instance_id: &InstanceId) -> Arc<Mutex<()>> {
        self.leases.entry(instance_id.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    pub fn insert_draft(&self, instance: AgentInstance) {
        self.records.insert(instance.hired_instance_id.clone(), instance);
    }

    pub fn get(&self, instance_id: &InstanceId) -> Option<AgentInstance> {
        self.records.get(instance_id).map(|r| r.clone())
    }

    /// Minimal structural validation against a JSON-Schema-shaped object:
    /// checks the `required` array (if present) names fields that appear
    /// in `config`. A full JSON Schema validator is out of scope; this is
    /// the level of enforcement needed to exercise the lifecycle gate.
    fn validate_against_schema(config: &serde_json::Value, schema: &serde_json::Value) -> Result<()> {
        let Some(required) = schema.get("required").and_then(|r| r.as_array()) else {
            return Ok(());
        };
        for field in required {
            let Some(name) = field.as_str() else { continue };
            if config.get(name).is_none() {
                return Err(GovernanceError::Validation(format!(
                    "config missing required field `{name}`"
                )));
            }
        }
        Ok(())
    }

    /// `draft -> provisioned`. Requires the config to validate against the
    /// Agent Type's schema and every required skill key to resolve to a
    /// certified skill.
    pub async fn configure(
        &self,
        instance_id: &InstanceId,
        config: serde_json::Value,
        goals: Vec<Goal>,
        registry: &CertificationAuthority,
    ) -> Result<()> {
        let lease = self.lease(instance_id);
        let _guard = lease.lock().await;

        let mut instance = self
            .records
            .get(instance_id)
            .map(|r| r.clone())
            .ok_or_else(|| GovernanceError::NotFound(format!("instance {instance_id}")))?;

        let agent_type = registry
            .agent_type(&instance.agent_type_id)
            .await
            .ok_or_else(|| GovernanceError::NotFound(format!("agent type {}", instance.agent_type_id)))?;

        Self::validate_against_schema(&config, &agent_type.config_schema)?;

        for key in &agent_type.required_skill_keys {
            registry.resolve_skill_key(key).await.map_err(|_| {
                GovernanceError::policy_deny(
                    PolicyDenyReason::SkillDeprecated,
                    format!("required skill `{key}` does not resolve to a certified skill"),
                )
            })?;
        }

        instance.lifecycle = instance
            .lifecycle
            .transition(LifecycleEvent::Configure)
            .map_err(GovernanceError::Precondition)?;
        instance.config = config;
        instance.goals = goals;
        instance.configured = true;
        instance.configured_agent_type_version = agent_type.version;

        self.records.insert(instance_id.clone(), instance);
        Ok(())
    }

    /// `provisioned -> active`. Requires a non-empty goal set.
    pub async fn activate(&self, instance_id: &InstanceId) -> Result<()> {
        let lease = self.lease(instance_id);
        let _guard = lease.lock().await;

        let mut instance = self
            .records
            .get(instance_id)
            .map(|r| r.clone())
            .ok_or_else(|| GovernanceError::NotFound(format!("instance {instance_id}")))?;

        if instance.goals.is_empty() {
            return Err(GovernanceError::Precondition(
                "cannot activate an instance with no goals".to_string(),
            ));
        }

        instance.lifecycle =
            instance.lifecycle.transition(LifecycleEvent::Activate).map_err(GovernanceError::Precondition)?;
        self.records.insert(instance_id.clone(), instance);
        Ok(())
    }

    /// `active -> interrupted`, via customer request or a budget gate.
    pub async fn interrupt(&self, instance_id: &InstanceId) -> Result<()> {
        self.apply_transition(instance_id, LifecycleEvent::Interrupt).await
    }

    /// `interrupted -> active`. Re-validates against the current Agent
    /// Type definition if its version has moved on since configuration.
    pub async fn resume(
        &self,
        instance_id: &InstanceId,
        registry: &CertificationAuthority,
    ) -> Result<()> {
        let lease = self.lease(instance_id);
        let _guard = lease.lock().await;

        let mut instance = self
            .records
            .get(instance_id)
            .map(|r| r.clone())
            .ok_or_else(|| GovernanceError::NotFound(format!("instance {instance_id}")))?;

        let agent_type = registry
            .agent_type(&instance.agent_type_id)
            .await
            .ok_or_else(|| GovernanceError::NotFound(format!("agent type {}", instance.agent_type_id)))?;

        if agent_type.version != instance.configured_agent_type_version {
            Self::validate_against_schema(&instance.config, &agent_type.config_schema)?;
            for key in &agent_type.required_skill_keys {
                registry.resolve_skill_key(key).await.map_err(|_| {
                    GovernanceError::policy_deny(
                        PolicyDenyReason::SkillDeprecated,
                        format!("required skill `{key}` no longer resolves after version bump"),
                    )
                })?;
            }
            instance.configured_agent_type_version = agent_type.version;
        }

        instance.lifecycle =
            instance.lifecycle.transition(LifecycleEvent::Resume).map_err(GovernanceError::Precondition)?;
        self.records.insert(instance_id.clone(), instance);
        Ok(())
    }

    pub async fn retire(&self, instance_id: &InstanceId) -> Result<()> {
        self.apply_transition(instance_id, LifecycleEvent::Retire).await
    }

    async fn apply_transition(&self, instance_id: &InstanceId, event: LifecycleEvent) -> Result<()> {
        let lease = self.lease(instance_id);
        let _guard = lease.lock().await;

        let mut instance = self
            .records
            .get(instance_id)
            .map(|r| r.clone())
            .ok_or_else(|| GovernanceError::NotFound(format!("instance {instance_id}")))?;

        instance.lifecycle = instance.lifecycle.transition(event).map_err(GovernanceError::Precondition)?;
        self.records.insert(instance_id.clone(), instance);
        Ok(())
    }

    pub fn lifecycle_of(&self, instance_id: &InstanceId) -> Option<Lifecycle> {
        self.records.get(instance_id).map(|r| r.lifecycle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgov_core::ids::{AgentTypeId, SubscriptionId};
    use agentgov_core::types::{AgentTypeDefinition, AgentTypeStatus, EnforcementDefaults, GoalFrequency};
    use agentgov_registry::{CertifyOutcome, NewSkillRequest, SkillRelation};
    use chrono::Utc;

    async fn setup() -> (InstanceStore, CertificationAuthority, InstanceId, AgentTypeId) {
        let store = InstanceStore::new();
        let registry = CertificationAuthority::new();

        let outcome = registry
            .certify_skill(
                NewSkillRequest {
                    skill_key: "triage".to_string(),
                    name: "Triage".to_string(),
                    industry_code: "support".to_string(),
                    compliance_tags: vec![],
                    tools: vec!["ticketing".to_string()],
                    io_schemas: serde_json::json!({}),
                    relation: SkillRelation::Different,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, CertifyOutcome::Created(_)));

        let agent_type_id = AgentTypeId::generate();
        registry
            .register_agent_type(AgentTypeDefinition {
                agent_type_id: agent_type_id.clone(),
                version: 1,
                config_schema: serde_json::json!({"required": ["tone"]}),
                required_skill_keys: vec!["triage".to_string()],
                goal_templates: vec![],
                enforcement_defaults: EnforcementDefaults { approval_required: true, deterministic: true },
                status: AgentTypeStatus::Published,
            })
            .await
            .unwrap();

        let instance_id = InstanceId::generate();
        store.insert_draft(AgentInstance {
            hired_instance_id: instance_id.clone(),
            subscription_id: SubscriptionId::generate(),
            agent_id: "support-bot".to_string(),
            agent_type_id: agent_type_id.clone(),
            config: serde_json::json!({}),
            goals: vec![],
            trial_status: false,
            workspace_ref: "ws-1".to_string(),
            lifecycle: Lifecycle::Draft,
            configured: false,
            budget_daily_usd: 10.0,
            configured_agent_type_version: 0,
        });

        (store, registry, instance_id, agent_type_id)
    }

    fn goal(instance_id: &InstanceId) -> Goal {
        Goal {
            goal_instance_id: agentgov_core::ids::GoalId::generate(),
            hired_instance_id: instance_id.clone(),
            goal_template_id: "default".to_string(),
            frequency: GoalFrequency::Daily,
            settings: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn configure_requires_schema_fields_and_certified_skills() {
        let (store, registry, instance_id, _) = setup().await;

        let err = store
            .configure(&instance_id, serde_json::json!({}), vec![goal(&instance_id)], &registry)
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Validation(_)));

        store
            .configure(
                &instance_id,
                serde_json::json!({"tone": "formal"}),
                vec![goal(&instance_id)],
                &registry,
            )
            .await
            .unwrap();
        assert_eq!(store.lifecycle_of(&instance_id), Some(Lifecycle::Provisioned));
    }

    #[tokio::test]
    async fn activate_requires_non_empty_goals() {
        let (store, registry, instance_id, _) = setup().await;
        store
            .configure(&instance_id, serde_json::json!({"tone": "formal"}), vec![], &registry)
            .await
            .unwrap();

        let err = store.activate(&instance_id).await.unwrap_err();
        assert!(matches!(err, GovernanceError::Precondition(_)));
    }

    #[tokio::test]
    async fn full_lifecycle_round_trip() {
        let (store, registry, instance_id, _) = setup().await;
        store
            .configure(
                &instance_id,
                serde_json::json!({"tone": "formal"}),
                vec![goal(&instance_id)],
                &registry,
            )
            .await
            .unwrap();
        store.activate(&instance_id).await.unwrap();
        assert_eq!(store.lifecycle_of(&instance_id), Some(Lifecycle::Active));

        store.interrupt(&instance_id).await.unwrap();
        assert_eq!(store.lifecycle_of(&instance_id), Some(Lifecycle::Interrupted));

        store.resume(&instance_id, &registry).await.unwrap();
        assert_eq!(store.lifecycle_of(&instance_id), Some(Lifecycle::Active));

        store.retire(&instance_id).await.unwrap();
        assert_eq!(store.lifecycle_of(&instance_id), Some(Lifecycle::Retired));
    }

    #[tokio::test]
    async fn illegal_transition_is_a_precondition_error() {
        let (store, _registry, instance_id, _) = setup().await;
        let err = store.activate(&instance_id).await.unwrap_err();
        assert!(matches!(err, GovernanceError::Precondition(_)));
    }
}
