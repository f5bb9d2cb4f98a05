//! Router assembly and the process entry point.

use crate::routes::build_router;
use crate::state::AppState;
use agentgov_core::GovernanceConfig;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub async fn run(config: GovernanceConfig) -> anyhow::Result<()> {
    let bind_addr: SocketAddr = format!("{}:{}", config.bind.to_addr(), config.port).parse()?;
    let auth_mode = config.auth.mode.clone();

    let state = AppState::new(config);
    crate::learner_loop::spawn(state.clone());

    let app = build_router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    info!("Agent Orchestration & Governance Core v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: {}", bind_addr);
    info!("  Auth mode: {:?}", auth_mode);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
