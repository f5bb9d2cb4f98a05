//! Cross-cutting request handling: correlation id propagation and bearer
//! auth. Applied as axum layers so every route gets both without repeating
//! the plumbing per handler.

use crate::problem::Problem;
use crate::state::AppState;
use agentgov_core::ids::CorrelationId;
use axum::extract::{Request, State};
use axum::http::HeaderName;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Reads `X-Correlation-Id` if the caller supplied one, otherwise mints a
/// fresh one, and echoes it back on the response regardless of outcome.
pub async fn correlation_id_layer(mut req: Request, next: Next) -> Response {
    let header_name = HeaderName::from_static(CORRELATION_HEADER);
    let correlation_id = req
        .headers()
        .get(&header_name)
        .and_then(|v| v.to_str().ok())
        .map(CorrelationId::new)
        .unwrap_or_else(CorrelationId::generate);

    req.extensions_mut().insert(correlation_id.clone());
    let mut response = next.run(req).await;
    if let Ok(value) = correlation_id.to_string().parse() {
        response.headers_mut().insert(header_name, value);
    }
    response
}

/// Bearer-token gate. Runs after `correlation_id_layer` so the extension is
/// already present when a rejection needs to carry it. On success, stamps
/// the resolved `PolicySubject` onto the request so handlers can use the
/// caller's identity rather than trusting whatever a request body claims.
pub async fn auth_layer(State(state): State<Arc<AppState>>, mut req: Request, next: Next) -> Response {
    let correlation_id =
        req.extensions().get::<CorrelationId>().cloned().unwrap_or_else(CorrelationId::generate);
    let provided = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match state.auth.authenticate(provided) {
        Ok(subject) => {
            req.extensions_mut().insert(subject);
            next.run(req).await
        }
        Err(e) => Problem::unauthorized(e.to_string(), &correlation_id).into_response(),
    }
}
