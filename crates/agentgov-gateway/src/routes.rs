//! The `/v1/...` handler surface. Every handler takes the correlation id
//! the middleware stamped onto the request and threads it through to
//! whichever component does the real work, so a caller can always tie a
//! response back to the audit entries it produced.

use crate::problem::{AppError, Problem};
use crate::state::{AppState, PLATFORM_CHAIN};
use agentgov_audit::AuditEntry;
use agentgov_audit::VerifyOutcome;
use agentgov_core::ids::{
    AgentTypeId, ApprovalId, AuditChainId, CorrelationId, GoalId, InstanceId, JobRoleId, SkillId,
    SubscriptionId,
};
use agentgov_core::types::{
    AgentInstance, AgentTypeDefinition, AgentTypeStatus, ApprovalRequest, CertificationStatus,
    Decision, EnforcementDefaults, Goal, GoalFrequency, GoalTemplate, JobRole, Lifecycle, Skill,
};
use agentgov_core::{Clock, GovernanceError, PolicyDenyReason};
use agentgov_registry::{CertifyOutcome, NewSkillRequest, SkillRelation};
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/v1/skills", post(certify_skill).get(list_skills))
        .route("/v1/skills/:skill_id/certify", post(confirm_skill_certification))
        .route("/v1/job-roles", post(create_job_role))
        .route("/v1/job-roles/:job_role_id/certify", post(confirm_job_role_certification))
        .route("/v1/agent-type-definitions/:agent_type_id", get(get_agent_type).put(put_agent_type))
        .route("/v1/subscriptions/:subscription_id/hire", post(hire))
        .route("/v1/hired-agents/:hired_instance_id/configure", post(configure))
        .route("/v1/hired-agents/:hired_instance_id/activate", post(activate))
        .route("/v1/hired-agents/:hired_instance_id/interrupt", post(interrupt))
        .route("/v1/hired-agents/:hired_instance_id/resume", post(resume))
        .route("/v1/goals", post(post_goal))
        .route("/v1/deliverables", get(get_deliverables))
        .route("/v1/approvals/:approval_id/decide", post(decide_approval))
        .route("/v1/approvals", get(list_approvals))
        .route("/v1/policy-denials", get(policy_denials))
        .route("/v1/audit/verify", post(verify_audit))
        .route("/v1/usage/events", get(usage_events))
        .route("/v1/usage/aggregate", get(usage_aggregate))
        .layer(axum::middleware::from_fn_with_state(state.clone(), crate::middleware::auth_layer));

    Router::new()
        .route("/healthz", get(health))
        .merge(protected)
        .layer(axum::middleware::from_fn(crate::middleware::correlation_id_layer))
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "quarantined_chains": state.audit.quarantined_count(),
    }))
}

// ---------------------------------------------------------------------------
// Skills
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CertifySkillRequest {
    skill_key: String,
    name: String,
    industry_code: String,
    #[serde(default)]
    compliance_tags: Vec<String>,
    tools: Vec<String>,
    io_schemas: Value,
    relation: SkillRelationDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SkillRelationDto {
    Different,
    Improvement,
}

impl From<SkillRelationDto> for SkillRelation {
    fn from(d: SkillRelationDto) -> Self {
        match d {
            SkillRelationDto::Different => SkillRelation::Different,
            SkillRelationDto::Improvement => SkillRelation::Improvement,
        }
    }
}

async fn certify_skill(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Json(body): Json<CertifySkillRequest>,
) -> Result<Response, AppError> {
    let now = state.clock.now();
    let request = NewSkillRequest {
        skill_key: body.skill_key,
        name: body.name,
        industry_code: body.industry_code,
        compliance_tags: body.compliance_tags,
        tools: body.tools,
        io_schemas: body.io_schemas,
        relation: body.relation.into(),
    };
    let outcome =
        state.registry.certify_skill(request, now).await.map_err(|e| AppError::new(e, correlation_id.clone()))?;

    Ok(match outcome {
        CertifyOutcome::Created(id) => {
            (StatusCode::CREATED, Json(json!({"skill_id": id, "status": "created"}))).into_response()
        }
        CertifyOutcome::DifferentCollision(id) => {
            (StatusCode::CREATED, Json(json!({"skill_id": id, "status": "different_collision"}))).into_response()
        }
        CertifyOutcome::Improved { new, deprecated } => (
            StatusCode::CREATED,
            Json(json!({"skill_id": new, "deprecated_skill_id": deprecated, "status": "improved"})),
        )
            .into_response(),
        CertifyOutcome::IdenticalCollision(id) => {
            let mut problem = Problem::new(
                StatusCode::CONFLICT,
                "conflict",
                format!("an identical skill is already certified as {id}"),
                &correlation_id,
            );
            problem.reason = Some(PolicyDenyReason::Conflict.as_str().to_string());
            problem.into_response()
        }
    })
}

async fn list_skills(State(state): State<Arc<AppState>>) -> Json<Vec<Skill>> {
    Json(state.registry.list_skills().await)
}

/// Skills are certified atomically by `POST /v1/skills`; this endpoint
/// confirms (and returns) the skill's current certification record rather
/// than driving a separate draft-to-certified transition, since no such
/// intermediate state exists in the registry.
async fn confirm_skill_certification(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Path(skill_id): Path<String>,
) -> Result<Json<Skill>, AppError> {
    let id = SkillId::new(skill_id);
    state
        .registry
        .skill(&id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::new(GovernanceError::NotFound(format!("skill {id}")), correlation_id))
}

// ---------------------------------------------------------------------------
// Job roles
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateJobRoleRequest {
    name: String,
    seniority: String,
    #[serde(default)]
    required_skill_keys: Vec<String>,
}

async fn create_job_role(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Json(body): Json<CreateJobRoleRequest>,
) -> Result<Response, AppError> {
    let job_role_id = JobRoleId::generate();
    let role = JobRole {
        job_role_id: job_role_id.clone(),
        name: body.name,
        seniority: body.seniority,
        required_skill_keys: body.required_skill_keys,
        status: CertificationStatus::Certified,
    };
    state.registry.register_job_role(role).await.map_err(|e| AppError::new(e, correlation_id))?;
    Ok((StatusCode::CREATED, Json(json!({"job_role_id": job_role_id}))).into_response())
}

/// Same rationale as `confirm_skill_certification`: job roles are
/// certified at registration, so this is a read of the current record.
async fn confirm_job_role_certification(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Path(job_role_id): Path<String>,
) -> Result<Json<JobRole>, AppError> {
    let id = JobRoleId::new(job_role_id);
    state
        .registry
        .job_role(&id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::new(GovernanceError::NotFound(format!("job role {id}")), correlation_id))
}

// ---------------------------------------------------------------------------
// Agent type definitions
// ---------------------------------------------------------------------------

async fn get_agent_type(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Path(agent_type_id): Path<String>,
) -> Result<Json<AgentTypeDefinition>, AppError> {
    let id = AgentTypeId::new(agent_type_id);
    state
        .registry
        .agent_type(&id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::new(GovernanceError::NotFound(format!("agent type {id}")), correlation_id))
}

#[derive(Debug, Deserialize)]
struct PutAgentTypeRequest {
    version: u32,
    config_schema: Value,
    #[serde(default)]
    required_skill_keys: Vec<String>,
    #[serde(default)]
    goal_templates: Vec<GoalTemplate>,
    enforcement_defaults: EnforcementDefaults,
}

/// Registers (or replaces) a draft definition and immediately publishes it,
/// validating every `required_skill_keys` entry resolves to a certified
/// skill before the definition becomes hireable.
async fn put_agent_type(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Path(agent_type_id): Path<String>,
    Json(body): Json<PutAgentTypeRequest>,
) -> Result<Json<AgentTypeDefinition>, AppError> {
    let id = AgentTypeId::new(agent_type_id);
    let def = AgentTypeDefinition {
        agent_type_id: id.clone(),
        version: body.version,
        config_schema: body.config_schema,
        required_skill_keys: body.required_skill_keys,
        goal_templates: body.goal_templates,
        enforcement_defaults: body.enforcement_defaults,
        status: AgentTypeStatus::Draft,
    };
    state.registry.register_agent_type(def).await.map_err(|e| AppError::new(e, correlation_id.clone()))?;
    state.registry.publish_agent_type(&id).await.map_err(|e| AppError::new(e, correlation_id.clone()))?;
    state
        .registry
        .agent_type(&id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::new(GovernanceError::NotFound(format!("agent type {id}")), correlation_id))
}

// ---------------------------------------------------------------------------
// Subscriptions / hired instances
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct HireRequest {
    agent_type_id: String,
    agent_id: String,
    workspace_ref: String,
    budget_daily_usd: f64,
    #[serde(default)]
    trial_status: bool,
}

/// Provisions the hired instance in `draft`. It becomes `provisioned` once
/// the customer's immediately-following `configure` call validates the
/// instance's config and goals against the agent type's schema.
async fn hire(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Path(subscription_id): Path<String>,
    Json(body): Json<HireRequest>,
) -> Result<Response, AppError> {
    let agent_type_id = AgentTypeId::new(body.agent_type_id);
    if !state.registry.is_hireable(&agent_type_id).await {
        return Err(AppError::new(
            GovernanceError::policy_deny(
                PolicyDenyReason::VersionUpgradeRequired,
                format!("agent type {agent_type_id} is not published"),
            ),
            correlation_id,
        ));
    }

    let hired_instance_id = InstanceId::generate();
    state.instances.insert_draft(AgentInstance {
        hired_instance_id: hired_instance_id.clone(),
        subscription_id: SubscriptionId::new(subscription_id),
        agent_id: body.agent_id,
        agent_type_id,
        config: Value::Null,
        goals: vec![],
        trial_status: body.trial_status,
        workspace_ref: body.workspace_ref,
        lifecycle: Lifecycle::Draft,
        configured: false,
        budget_daily_usd: body.budget_daily_usd,
        configured_agent_type_version: 0,
    });

    Ok((StatusCode::CREATED, Json(json!({"hired_instance_id": hired_instance_id}))).into_response())
}

#[derive(Debug, Deserialize)]
struct GoalSpecDto {
    goal_template_id: String,
    frequency: GoalFrequency,
    #[serde(default)]
    settings: Value,
}

#[derive(Debug, Deserialize)]
struct ConfigureRequest {
    config: Value,
    #[serde(default)]
    goals: Vec<GoalSpecDto>,
}

async fn configure(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Path(hired_instance_id): Path<String>,
    Json(body): Json<ConfigureRequest>,
) -> Result<StatusCode, AppError> {
    let instance_id = InstanceId::new(hired_instance_id);
    let goals = body
        .goals
        .into_iter()
        .map(|g| Goal {
            goal_instance_id: GoalId::generate(),
            hired_instance_id: instance_id.clone(),
            goal_template_id: g.goal_template_id,
            frequency: g.frequency,
            settings: g.settings,
        })
        .collect();

    state
        .instances
        .configure(&instance_id, body.config, goals, &state.registry)
        .await
        .map_err(|e| AppError::new(e, correlation_id))?;
    Ok(StatusCode::OK)
}

async fn activate(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Path(hired_instance_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let instance_id = InstanceId::new(hired_instance_id);
    state.instances.activate(&instance_id).await.map_err(|e| AppError::new(e, correlation_id))?;
    Ok(StatusCode::OK)
}

async fn interrupt(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Path(hired_instance_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let instance_id = InstanceId::new(hired_instance_id);
    state.instances.interrupt(&instance_id).await.map_err(|e| AppError::new(e, correlation_id))?;
    Ok(StatusCode::OK)
}

async fn resume(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Path(hired_instance_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let instance_id = InstanceId::new(hired_instance_id);
    state.instances.resume(&instance_id, &state.registry).await.map_err(|e| AppError::new(e, correlation_id))?;
    Ok(StatusCode::OK)
}

// ---------------------------------------------------------------------------
// Goals / deliverables
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PostGoalRequest {
    hired_instance_id: String,
    goal_template_id: String,
    frequency: GoalFrequency,
    #[serde(default)]
    settings: Value,
}

/// Enqueues a goal run: the plan executes on a detached task so the caller
/// gets the goal and correlation ids back immediately rather than blocking
/// on however many approval round-trips the run needs. Results land in
/// `state.deliverables` for `GET /v1/deliverables` to read back once the
/// run finishes.
async fn post_goal(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Json(body): Json<PostGoalRequest>,
) -> Result<Response, AppError> {
    let instance_id = InstanceId::new(body.hired_instance_id);
    let instance = state
        .instances
        .get(&instance_id)
        .ok_or_else(|| AppError::new(GovernanceError::NotFound(format!("instance {instance_id}")), correlation_id.clone()))?;

    if instance.lifecycle != Lifecycle::Active {
        return Err(AppError::new(
            GovernanceError::Precondition(format!("instance {instance_id} is not active")),
            correlation_id,
        ));
    }

    let goal = Goal {
        goal_instance_id: GoalId::generate(),
        hired_instance_id: instance_id.clone(),
        goal_template_id: body.goal_template_id,
        frequency: body.frequency,
        settings: body.settings,
    };
    let goal_id = goal.goal_instance_id.clone();

    let chain_id = state.chain_for_subscription(instance.subscription_id.as_str());
    let events_tx = state.output_tx.clone();
    let background_state = state.clone();
    let background_correlation = correlation_id.clone();
    tokio::spawn(async move {
        let policies = background_state.policies.clone();
        let outcome = background_state
            .executor
            .run_goal(&instance, &goal, &policies, &chain_id, background_correlation, CancellationToken::new(), events_tx)
            .await;
        match outcome {
            Ok(outcome) => {
                let mut entry = background_state.deliverables.entry(instance_id).or_default();
                entry.extend(outcome.deliverables.into_iter().map(|(step_id, value)| (goal.goal_instance_id.clone(), step_id, value)));
            }
            Err(e) => {
                tracing::warn!(error = %e, goal_id = %goal.goal_instance_id, "goal execution failed");
            }
        }
    });

    Ok((StatusCode::ACCEPTED, Json(json!({"goal_id": goal_id, "correlation_id": correlation_id}))).into_response())
}

#[derive(Debug, Deserialize)]
struct DeliverablesQuery {
    hired_instance_id: String,
}

async fn get_deliverables(State(state): State<Arc<AppState>>, Query(query): Query<DeliverablesQuery>) -> Json<Value> {
    let instance_id = InstanceId::new(query.hired_instance_id);
    let items = state.deliverables.get(&instance_id).map(|v| v.clone()).unwrap_or_default();
    Json(json!({
        "hired_instance_id": instance_id,
        "deliverables": items.into_iter().map(|(goal_id, step_id, output)| json!({
            "goal_id": goal_id,
            "step_id": step_id,
            "output": output,
        })).collect::<Vec<_>>(),
    }))
}

// ---------------------------------------------------------------------------
// Approvals
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DecideRequest {
    decision: Decision,
    #[serde(default)]
    decided_by: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Records who actually decided: the authenticated platform operator when
/// the bearer token resolves one, falling back to the caller-supplied name
/// only under `AuthMode::None`, where there is no real identity to assert.
async fn decide_approval(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Extension(subject): Extension<agentgov_policy::PolicySubject>,
    Path(approval_id): Path<String>,
    Json(body): Json<DecideRequest>,
) -> Result<Json<ApprovalRequest>, AppError> {
    let id = ApprovalId::new(approval_id);
    let decided_by = if subject.roles.iter().any(|r| r == crate::auth::PLATFORM_OPERATOR_ROLE) {
        subject.agent_id.clone()
    } else {
        body.decided_by.unwrap_or_else(|| subject.agent_id.clone())
    };
    let request = state
        .approvals
        .decide(&id, body.decision, decided_by, body.reason, body.confidence, correlation_id.clone())
        .await
        .map_err(|e| AppError::new(e, correlation_id))?;
    Ok(Json(request))
}

#[derive(Debug, Deserialize, Default)]
struct ApprovalsQuery {
    customer_id: Option<String>,
    agent_id: Option<String>,
}

async fn list_approvals(State(state): State<Arc<AppState>>, Query(query): Query<ApprovalsQuery>) -> Json<Vec<ApprovalRequest>> {
    let items = state
        .approvals
        .snapshot_all()
        .into_iter()
        .filter(|a| query.customer_id.as_deref().map_or(true, |c| a.customer_id == c))
        .filter(|a| query.agent_id.as_deref().map_or(true, |a_id| a.agent_id == a_id))
        .collect();
    Json(items)
}

// ---------------------------------------------------------------------------
// Policy denials / audit
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct PolicyDenialsQuery {
    chain: Option<String>,
}

async fn policy_denials(State(state): State<Arc<AppState>>, Query(query): Query<PolicyDenialsQuery>) -> Json<Vec<Value>> {
    let chain_id = AuditChainId::new(query.chain.unwrap_or_else(|| PLATFORM_CHAIN.to_string()));
    let denials = state
        .audit
        .entries(&chain_id)
        .await
        .into_iter()
        .filter(|e| e.event_type == "PolicyDecisionRecorded")
        .filter(|e| e.payload.get("effect").and_then(|v| v.as_bool()) == Some(false))
        .map(|e| json!({"seq": e.seq, "timestamp": e.timestamp, "correlation_id": e.correlation_id, "payload": e.payload}))
        .collect();
    Json(denials)
}

#[derive(Debug, Deserialize)]
struct VerifyQuery {
    chain: String,
}

/// Always 200: a tampered chain is a reportable fact, not an operational
/// failure of this endpoint. Only an unreadable chain (none here yet) would
/// route through the problem-document path.
async fn verify_audit(State(state): State<Arc<AppState>>, Query(query): Query<VerifyQuery>) -> Json<Value> {
    let chain_id = AuditChainId::new(query.chain);
    let outcome = state.audit.verify(&chain_id, None).await.unwrap_or(VerifyOutcome::Ok);
    Json(match outcome {
        VerifyOutcome::Ok => json!({"ok": true}),
        VerifyOutcome::TamperAt(seq) => json!({"ok": false, "first_bad_seq": seq}),
    })
}

#[derive(Debug, Deserialize)]
struct UsageEventsQuery {
    chain: String,
}

async fn usage_events(State(state): State<Arc<AppState>>, Query(query): Query<UsageEventsQuery>) -> Json<Vec<AuditEntry>> {
    let chain_id = AuditChainId::new(query.chain);
    let entries = state
        .audit
        .entries(&chain_id)
        .await
        .into_iter()
        .filter(|e| matches!(e.event_type.as_str(), "STEP_COMPLETED" | "BUDGET_WARN" | "GOAL_COMPLETED" | "GOAL_FAILED"))
        .collect();
    Json(entries)
}

#[derive(Debug, Deserialize)]
struct UsageAggregateQuery {
    bucket: String,
    hired_instance_id: String,
}

/// Only `bucket=day` is backed today — the ledger keys on `(instance, day)`
/// and there is no monthly rollup store to answer `bucket=month` from.
async fn usage_aggregate(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Query(query): Query<UsageAggregateQuery>,
) -> Result<Json<Value>, AppError> {
    if query.bucket != "day" {
        return Err(AppError::new(
            GovernanceError::Validation("only bucket=day is supported".to_string()),
            correlation_id,
        ));
    }
    let instance_id = InstanceId::new(query.hired_instance_id);
    let today = state.clock.now().date_naive();
    let (spent_usd, limit_usd) = state.budget.utilisation(&instance_id, today).unwrap_or((0.0, 0.0));
    Ok(Json(json!({
        "bucket": "day",
        "day": today,
        "hired_instance_id": instance_id,
        "spent_usd": spent_usd,
        "limit_usd": limit_usd,
    })))
}
