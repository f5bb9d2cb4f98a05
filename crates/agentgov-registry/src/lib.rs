//! Certification Registry — the single logical authority through which
//! every Skill, Job Role, and Agent Type Definition is certified.
//!
//! Write operations serialize through one `tokio::sync::Mutex`; reads are
//! therefore always strongly consistent with the last completed write —
//! callers never need to reconcile a stale cache.

use agentgov_core::ids::{AgentTypeId, JobRoleId, SkillId};
use agentgov_core::types::{
    AgentTypeDefinition, AgentTypeStatus, CertificationStatus, JobRole, Skill,
};
use agentgov_core::{GovernanceError, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// How a new skill relates to an existing tuple collision. The registry
/// cannot infer "improved" from structural equality alone, so the caller
/// (a certification workflow, presumably reviewed by a human) states its
/// intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkillRelation {
    Different,
    Improvement,
}

#[derive(Debug, Clone)]
pub struct NewSkillRequest {
    pub skill_key: String,
    pub name: String,
    pub industry_code: String,
    pub compliance_tags: Vec<String>,
    pub tools: Vec<String>,
    pub io_schemas: serde_json::Value,
    pub relation: SkillRelation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertifyOutcome {
    Created(SkillId),
    IdenticalCollision(SkillId),
    DifferentCollision(SkillId),
    Improved { new: SkillId, deprecated: SkillId },
}

const DEPRECATION_GRACE: i64 = 30;

struct Inner {
    skills: HashMap<SkillId, Skill>,
    skill_sequence: HashMap<(String, String, Vec<String>), u32>,
    job_roles: HashMap<JobRoleId, JobRole>,
    agent_types: HashMap<AgentTypeId, AgentTypeDefinition>,
    deprecation_grace_until: HashMap<SkillId, DateTime<Utc>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            skills: HashMap::new(),
            skill_sequence: HashMap::new(),
            job_roles: HashMap::new(),
            agent_types: HashMap::new(),
            deprecation_grace_until: HashMap::new(),
        }
    }
}

pub struct CertificationAuthority {
    inner: Mutex<Inner>,
}

impl Default for CertificationAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl CertificationAuthority {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::new()) }
    }

    pub async fn certify_skill(
        &self,
        request: NewSkillRequest,
        now: DateTime<Utc>,
    ) -> Result<CertifyOutcome> {
        if request.name.trim().is_empty() || request.industry_code.trim().is_empty() {
            return Err(GovernanceError::Validation(
                "skill name and industry_code must be non-empty".to_string(),
            ));
        }

        let mut tools = request.tools.clone();
        tools.sort();
        let key = (request.industry_code.clone(), request.name.clone(), tools);

        let mut inner = self.inner.lock().await;

        let existing = inner
            .skills
            .values()
            .find(|s| s.collision_key() == key && s.status == CertificationStatus::Certified)
            .cloned();

        let Some(existing) = existing else {
            let skill_id = SkillId::generate();
            inner.skill_sequence.insert(key, 1);
            inner.skills.insert(
                skill_id.clone(),
                Skill {
                    skill_id: skill_id.clone(),
                    skill_key: request.skill_key,
                    name: request.name,
                    industry_code: request.industry_code,
                    compliance_tags: request.compliance_tags,
                    tools: request.tools,
                    io_schemas: request.io_schemas,
                    status: CertificationStatus::Certified,
                    supersedes: None,
                    created_at: now,
                },
            );
            return Ok(CertifyOutcome::Created(skill_id));
        };

        let identical = existing.io_schemas == request.io_schemas
            && existing.compliance_tags == request.compliance_tags;

        if identical {
            return Ok(CertifyOutcome::IdenticalCollision(existing.skill_id));
        }

        match request.relation {
            SkillRelation::Different => {
                let seq = inner.skill_sequence.entry(key).or_insert(1);
                *seq += 1;
                let skill_id = SkillId::generate();
                let skill_key = format!("{}-{}", request.skill_key, *seq);
                inner.skills.insert(
                    skill_id.clone(),
                    Skill {
                        skill_id: skill_id.clone(),
                        skill_key,
                        name: request.name,
                        industry_code: request.industry_code,
                        compliance_tags: request.compliance_tags,
                        tools: request.tools,
                        io_schemas: request.io_schemas,
                        status: CertificationStatus::Certified,
                        supersedes: None,
                        created_at: now,
                    },
                );
                Ok(CertifyOutcome::DifferentCollision(skill_id))
            }
            SkillRelation::Improvement => {
                let seq = inner.skill_sequence.entry(key).or_insert(1);
                *seq += 1;
                let new_id = SkillId::generate();
                let skill_key = format!("{}-v{}", request.skill_key, *seq);
                inner.skills.insert(
                    new_id.clone(),
                    Skill {
                        skill_id: new_id.clone(),
                        skill_key,
                        name: request.name,
                        industry_code: request.industry_code,
                        compliance_tags: request.compliance_tags,
                        tools: request.tools,
                        io_schemas: request.io_schemas,
                        status: CertificationStatus::Certified,
                        supersedes: Some(existing.skill_id.clone()),
                        created_at: now,
                    },
                );

                let deprecated_id = existing.skill_id.clone();
                if let Some(old) = inner.skills.get_mut(&deprecated_id) {
                    old.status = CertificationStatus::Deprecated;
                }
                inner
                    .deprecation_grace_until
                    .insert(deprecated_id.clone(), now + Duration::days(DEPRECATION_GRACE));

                self.propagate_deprecation(&mut inner, &deprecated_id);

                Ok(CertifyOutcome::Improved { new: new_id, deprecated: deprecated_id })
            }
        }
    }

    fn propagate_deprecation(&self, inner: &mut Inner, deprecated_skill_id: &SkillId) {
        let Some(skill) = inner.skills.get(deprecated_skill_id) else { return };
        let skill_key = skill.skill_key.clone();
        for agent_type in inner.agent_types.values_mut() {
            if agent_type.required_skill_keys.iter().any(|k| k == &skill_key)
                && agent_type.status == AgentTypeStatus::Published
            {
                agent_type.status = AgentTypeStatus::MigrationRequired;
            }
        }
    }

    pub async fn deprecation_grace_until(&self, skill_id: &SkillId) -> Option<DateTime<Utc>> {
        self.inner.lock().await.deprecation_grace_until.get(skill_id).copied()
    }

    pub async fn register_job_role(&self, role: JobRole) -> Result<JobRoleId> {
        let mut inner = self.inner.lock().await;
        let id = role.job_role_id.clone();
        inner.job_roles.insert(id.clone(), role);
        Ok(id)
    }

    pub async fn job_role(&self, job_role_id: &JobRoleId) -> Option<JobRole> {
        self.inner.lock().await.job_roles.get(job_role_id).cloned()
    }

    pub async fn register_agent_type(&self, def: AgentTypeDefinition) -> Result<AgentTypeId> {
        let mut inner = self.inner.lock().await;
        let id = def.agent_type_id.clone();
        inner.agent_types.insert(id.clone(), def);
        Ok(id)
    }

    pub async fn publish_agent_type(&self, agent_type_id: &AgentTypeId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let required_skill_keys = inner
            .agent_types
            .get(agent_type_id)
            .ok_or_else(|| GovernanceError::NotFound(format!("agent type {agent_type_id}")))?
            .required_skill_keys
            .clone();
        for key in &required_skill_keys {
            let resolvable = inner
                .skills
                .values()
                .any(|s| &s.skill_key == key && s.status == CertificationStatus::Certified);
            if !resolvable {
                return Err(GovernanceError::Precondition(format!(
                    "required skill {key} does not resolve to a certified skill"
                )));
            }
        }
        let def = inner.agent_types.get_mut(agent_type_id).unwrap();
        def.status = AgentTypeStatus::Published;
        Ok(())
    }

    /// Resolve a `skill_key` to its certified `SkillId`. Consumers
    /// must call this at plan time and never cache the result across goal
    /// executions.
    pub async fn resolve_skill_key(&self, skill_key: &str) -> Result<SkillId> {
        let inner = self.inner.lock().await;
        inner
            .skills
            .values()
            .find(|s| s.skill_key == skill_key && s.status == CertificationStatus::Certified)
            .map(|s| s.skill_id.clone())
            .ok_or_else(|| GovernanceError::NotFound(format!("certified skill {skill_key}")))
    }

    pub async fn skill(&self, skill_id: &SkillId) -> Option<Skill> {
        self.inner.lock().await.skills.get(skill_id).cloned()
    }

    pub async fn list_skills(&self) -> Vec<Skill> {
        self.inner.lock().await.skills.values().cloned().collect()
    }

    pub async fn agent_type(&self, agent_type_id: &AgentTypeId) -> Option<AgentTypeDefinition> {
        self.inner.lock().await.agent_types.get(agent_type_id).cloned()
    }

    /// Whether new hires of this agent type should be accepted — new hires
    /// are refused once migration is required.
    pub async fn is_hireable(&self, agent_type_id: &AgentTypeId) -> bool {
        self.inner
            .lock()
            .await
            .agent_types
            .get(agent_type_id)
            .map(|d| d.status == AgentTypeStatus::Published)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, tools: &[&str]) -> NewSkillRequest {
        NewSkillRequest {
            skill_key: name.to_lowercase().replace(' ', "_"),
            name: name.to_string(),
            industry_code: "retail".to_string(),
            compliance_tags: vec![],
            tools: tools.iter().map(|s| s.to_string()).collect(),
            io_schemas: serde_json::json!({"in": "string", "out": "string"}),
            relation: SkillRelation::Different,
        }
    }

    #[tokio::test]
    async fn first_certification_of_a_tuple_is_created() {
        let registry = CertificationAuthority::new();
        let outcome = registry.certify_skill(request("Refund Order", &["crm"]), Utc::now()).await.unwrap();
        assert!(matches!(outcome, CertifyOutcome::Created(_)));
    }

    #[tokio::test]
    async fn identical_resubmission_is_rejected_with_existing_id() {
        let registry = CertificationAuthority::new();
        let first = registry.certify_skill(request("Refund Order", &["crm"]), Utc::now()).await.unwrap();
        let CertifyOutcome::Created(first_id) = first else { panic!() };

        let second = registry.certify_skill(request("Refund Order", &["crm"]), Utc::now()).await.unwrap();
        assert_eq!(second, CertifyOutcome::IdenticalCollision(first_id));
    }

    #[tokio::test]
    async fn improvement_deprecates_predecessor_with_grace_period() {
        let registry = CertificationAuthority::new();
        let first = registry.certify_skill(request("Refund Order", &["crm"]), Utc::now()).await.unwrap();
        let CertifyOutcome::Created(first_id) = first else { panic!() };

        let mut improved = request("Refund Order", &["crm"]);
        improved.io_schemas = serde_json::json!({"in": "string", "out": "string", "reason_code": "string"});
        improved.relation = SkillRelation::Improvement;
        let now = Utc::now();
        let outcome = registry.certify_skill(improved, now).await.unwrap();

        let CertifyOutcome::Improved { new, deprecated } = outcome else { panic!() };
        assert_eq!(deprecated, first_id);

        let old = registry.skill(&first_id).await.unwrap();
        assert_eq!(old.status, CertificationStatus::Deprecated);

        let grace = registry.deprecation_grace_until(&first_id).await.unwrap();
        assert_eq!(grace, now + Duration::days(30));

        let new_skill = registry.skill(&new).await.unwrap();
        assert_eq!(new_skill.supersedes, Some(first_id));
    }

    #[tokio::test]
    async fn deprecation_marks_referencing_agent_types_migration_required() {
        let registry = CertificationAuthority::new();
        registry.certify_skill(request("Refund Order", &["crm"]), Utc::now()).await.unwrap();

        let agent_type_id = AgentTypeId::generate();
        registry
            .register_agent_type(AgentTypeDefinition {
                agent_type_id: agent_type_id.clone(),
                version: 1,
                config_schema: serde_json::json!({}),
                required_skill_keys: vec!["refund_order".to_string()],
                goal_templates: vec![],
                enforcement_defaults: agentgov_core::types::EnforcementDefaults {
                    approval_required: true,
                    deterministic: true,
                },
                status: AgentTypeStatus::Published,
            })
            .await
            .unwrap();

        let mut improved = request("Refund Order", &["crm"]);
        improved.io_schemas = serde_json::json!({"different": true});
        improved.relation = SkillRelation::Improvement;
        registry.certify_skill(improved, Utc::now()).await.unwrap();

        let def = registry.agent_type(&agent_type_id).await.unwrap();
        assert_eq!(def.status, AgentTypeStatus::MigrationRequired);
        assert!(!registry.is_hireable(&agent_type_id).await);
    }
}
