//! The default `Planner`: resolves a Goal Template straight out of the
//! certification registry into a concrete step DAG. A deployment with a
//! richer planning need (conditional branches, dynamic step generation)
//! swaps this out for its own `Planner` impl; the trait is the seam.

use crate::traits::Planner;
use agentgov_core::ids::StepId;
use agentgov_core::types::{AgentInstance, Goal, PlanStep};
use agentgov_core::{GovernanceError, Result};
use agentgov_registry::CertificationAuthority;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

const DEFAULT_STEP_COST_USD: f64 = 0.05;
const DEFAULT_MAX_RETRIES: u32 = 2;

pub struct TemplatePlanner {
    registry: Arc<CertificationAuthority>,
}

impl TemplatePlanner {
    pub fn new(registry: Arc<CertificationAuthority>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Planner for TemplatePlanner {
    async fn plan(&self, instance: &AgentInstance, goal: &Goal) -> Result<Vec<PlanStep>> {
        let def = self
            .registry
            .agent_type(&instance.agent_type_id)
            .await
            .ok_or_else(|| GovernanceError::NotFound(format!("agent type {}", instance.agent_type_id)))?;

        let template = def
            .goal_templates
            .iter()
            .find(|t| t.goal_template_id == goal.goal_template_id)
            .ok_or_else(|| GovernanceError::NotFound(format!("goal template {}", goal.goal_template_id)))?;

        let mut step_ids: HashMap<&str, StepId> = HashMap::new();
        for step in &template.steps {
            step_ids.insert(step.step_key.as_str(), StepId::generate());
        }

        let mut steps = Vec::with_capacity(template.steps.len());
        for step in &template.steps {
            let skill_id = self.registry.resolve_skill_key(&step.skill_key).await?;
            let mut depends_on = Vec::with_capacity(step.depends_on.len());
            for dep_key in &step.depends_on {
                let dep_id = step_ids
                    .get(dep_key.as_str())
                    .ok_or_else(|| GovernanceError::Validation(format!("unknown step dependency `{dep_key}`")))?;
                depends_on.push(dep_id.clone());
            }

            steps.push(PlanStep {
                step_id: step_ids.get(step.step_key.as_str()).unwrap().clone(),
                skill_id,
                step_key: step.step_key.clone(),
                inputs: goal.settings.clone(),
                depends_on,
                external_effect: step.external_effect,
                sla_hours: None,
                estimated_cost_usd: DEFAULT_STEP_COST_USD,
                max_retries: DEFAULT_MAX_RETRIES,
            });
        }

        Ok(steps)
    }
}
