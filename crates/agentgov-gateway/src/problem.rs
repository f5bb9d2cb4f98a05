//! RFC 7807 problem documents. Every error the gateway returns — whatever
//! the failing component — ends up wrapped in one of these so a caller
//! never has to parse `detail` to find out what happened.

use agentgov_core::ids::CorrelationId;
use agentgov_core::{GovernanceError, PolicyDenyReason};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub type_: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl Problem {
    pub fn new(status: StatusCode, title: impl Into<String>, detail: impl Into<String>, correlation_id: &CorrelationId) -> Self {
        Self {
            type_: "about:blank".to_string(),
            title: title.into(),
            status: status.as_u16(),
            detail: detail.into(),
            correlation_id: correlation_id.to_string(),
            reason: None,
            violations: Vec::new(),
            retry_after: None,
        }
    }

    pub fn unauthorized(detail: impl Into<String>, correlation_id: &CorrelationId) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", detail, correlation_id)
    }

    pub fn bad_request(detail: impl Into<String>, correlation_id: &CorrelationId) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "malformed request", detail, correlation_id)
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self)).into_response();
        response
            .headers_mut()
            .insert(axum::http::header::CONTENT_TYPE, "application/problem+json".parse().unwrap());
        response
    }
}

/// Wraps a `GovernanceError` with the correlation id of the request that
/// triggered it, so every handler can propagate failures with a single
/// `.map_err(|e| AppError::new(e, correlation_id.clone()))?`.
pub struct AppError {
    error: GovernanceError,
    correlation_id: CorrelationId,
}

impl AppError {
    pub fn new(error: GovernanceError, correlation_id: CorrelationId) -> Self {
        Self { error, correlation_id }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self.error);
        let mut problem = Problem::new(status, title_for(&self.error), self.error.to_string(), &self.correlation_id);
        problem.reason = Some(self.error.reason().to_string());
        if matches!(self.error, GovernanceError::ToolTransient(_)) {
            problem.retry_after = Some(1);
        }
        problem.into_response()
    }
}

fn title_for(error: &GovernanceError) -> &'static str {
    use GovernanceError::*;
    match error {
        Validation(_) => "validation failed",
        Authz(_) => "not authorized",
        Conflict(_) => "conflict",
        Precondition(_) => "precondition failed",
        PolicyDeny { .. } => "denied by policy",
        Budget(_) => "budget exceeded",
        ApprovalExpired(_) => "approval no longer pending",
        ToolTransient(_) => "tool temporarily unavailable",
        ToolPermanent(_) => "tool failed",
        PlanDeadlock(_) => "plan does not converge",
        AuditDurability(_) => "audit chain unavailable",
        Integrity { .. } => "audit chain integrity violation",
        NotFound(_) => "not found",
    }
}

fn status_for(error: &GovernanceError) -> StatusCode {
    use GovernanceError::*;
    match error {
        Validation(_) => StatusCode::BAD_REQUEST,
        Authz(_) => StatusCode::FORBIDDEN,
        Conflict(_) => StatusCode::CONFLICT,
        Precondition(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PolicyDeny { reason, .. } => status_for_deny(*reason),
        Budget(_) => StatusCode::TOO_MANY_REQUESTS,
        ApprovalExpired(_) => StatusCode::CONFLICT,
        ToolTransient(_) => StatusCode::SERVICE_UNAVAILABLE,
        ToolPermanent(_) => StatusCode::BAD_GATEWAY,
        PlanDeadlock(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AuditDurability(_) => StatusCode::INTERNAL_SERVER_ERROR,
        Integrity { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        NotFound(_) => StatusCode::NOT_FOUND,
    }
}

fn status_for_deny(reason: PolicyDenyReason) -> StatusCode {
    use PolicyDenyReason::*;
    match reason {
        ApprovalRequired | NotConfigured => StatusCode::UNPROCESSABLE_ENTITY,
        BudgetExceeded => StatusCode::TOO_MANY_REQUESTS,
        TrialRestriction | ScopeOutOfBounds | ToolNotAuthorized => StatusCode::FORBIDDEN,
        InstanceSuspended | SkillDeprecated | Conflict | VersionUpgradeRequired | SeedVetoed => StatusCode::CONFLICT,
    }
}
