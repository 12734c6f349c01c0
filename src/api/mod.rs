pub mod artifacts;
pub mod dashboard;

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use tower_http::trace::TraceLayer;

use crate::catalog::Catalog;
use crate::cell::{CellHealth, CellIdentity, CellMonitor};
use crate::mcp::CellMcpServer;
use crate::telemetry::TelemetryCollector;

use artifacts::{register_artifacts, Artifact};

/// Paths owned by the cell itself. Artifacts may not claim them.
pub const RESERVED_PATHS: &[&str] = &["/mcp", "/health"];

#[derive(Clone)]
pub struct AppState {
    pub identity: Arc<CellIdentity>,
    pub catalog: Catalog,
    pub monitor: CellMonitor,
    pub telemetry: Arc<dyn TelemetryCollector>,
}

pub fn router(state: AppState, artifacts: &[Artifact]) -> Router {
    use rmcp::transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
    };

    let mcp_state = state.clone();
    let mcp_service = StreamableHttpService::new(
        move || Ok(CellMcpServer::new(mcp_state.clone()).with_session_tracking()),
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig::default(),
    );

    let router = Router::new()
        .route("/health", get(health))
        .nest_service("/mcp", mcp_service)
        .with_state(state);

    register_artifacts(router, artifacts).layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<AppState>) -> Json<CellHealth> {
    Json(state.monitor.health())
}
