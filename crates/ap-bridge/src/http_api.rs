use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ap_core::config::Config;
use ap_session::agent_tools::AgentTerminal;
use ap_session::injector::CommandInjector;
use ap_session::registry::{RegistryConfig, SessionInfo, SessionRegistry};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent_api;
use crate::terminal_ws;

/// Shared application state for all HTTP/WS handlers.
pub struct ApiState {
    pub config: Config,
    pub registry: Arc<SessionRegistry>,
    /// Agent-side view of whichever session is currently shared.
    pub agent: AgentTerminal,
    pub start_time: std::time::Instant,
}

impl ApiState {
    /// Build state, spawning shells as described by `config.terminal`.
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(SessionRegistry::new(RegistryConfig::from_config(&config)));
        Self::with_registry(config, registry)
    }

    /// Build state around an existing registry (tests use a scripted shell).
    pub fn with_registry(config: Config, registry: Arc<SessionRegistry>) -> Self {
        let agent = AgentTerminal::new(
            registry.clone(),
            Arc::new(
                CommandInjector::new().with_capture_limit(registry.config().output_buffer_bytes),
            ),
            Duration::from_millis(config.agent.default_timeout_ms),
        );
        Self {
            config,
            registry,
            agent,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn workspace_root(&self) -> &PathBuf {
        &self.config.workspace.root
    }
}

/// Build the full API router with all REST and WebSocket routes.
pub fn api_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/health", get(get_health))
        .route("/api/config", get(get_config))
        .route("/api/terminals", get(list_terminals))
        .route("/api/agent/run", post(agent_api::run_command))
        .route("/api/agent/output", get(agent_api::get_output))
        .route("/api/agent/tools", get(agent_api::list_tools))
        .route("/api/agent/tools/call", post(agent_api::call_tool))
        .route("/ws/terminal", get(terminal_ws::terminal_ws))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
    pub uptime_seconds: u64,
    pub workspace: PathBuf,
    pub sessions: usize,
    pub shared: Option<String>,
}

async fn get_health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        workspace: state.workspace_root().clone(),
        sessions: state.registry.len(),
        shared: state.registry.shared_id(),
    })
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub workspace: PathBuf,
    pub shell: String,
    pub default_timeout_ms: u64,
}

async fn get_config(State(state): State<Arc<ApiState>>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        workspace: state.workspace_root().clone(),
        shell: state.registry.config().shell.program.clone(),
        default_timeout_ms: state.agent.default_timeout().as_millis() as u64,
    })
}

async fn list_terminals(State(state): State<Arc<ApiState>>) -> Json<Vec<SessionInfo>> {
    Json(state.registry.list())
}
