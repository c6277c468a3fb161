//! REST endpoints through which the chat agent uses the shared terminal.

use std::sync::Arc;

use ap_session::agent_tools::{
    tool_definitions, ToolCallRequest, ToolCallResult, ToolDefinition, TIMED_OUT_PLACEHOLDER,
};
use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api_error::ApiError;
use crate::http_api::ApiState;

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub command: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub output: String,
    pub timed_out: bool,
}

/// POST /api/agent/run: run a command in the shared terminal.
pub async fn run_command(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<RunRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    if req.command.trim().is_empty() {
        return Err(ApiError::BadRequest("command must not be empty".into()));
    }
    info!(command = %req.command, timeout_ms = ?req.timeout_ms, "agent run requested");
    let captured = state.agent.run(&req.command, req.timeout_ms).await?;
    let output = if captured.timed_out && captured.text.is_empty() {
        TIMED_OUT_PLACEHOLDER.to_string()
    } else {
        captured.text
    };
    Ok(Json(RunResponse {
        output,
        timed_out: captured.timed_out,
    }))
}

#[derive(Debug, Deserialize)]
pub struct OutputQuery {
    #[serde(default)]
    pub max_chars: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OutputResponse {
    pub output: String,
}

/// GET /api/agent/output: recent output of the shared terminal.
pub async fn get_output(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<OutputQuery>,
) -> Json<OutputResponse> {
    let mut output = state.agent.recent_output();
    if let Some(max) = query.max_chars {
        let skip = output.chars().count().saturating_sub(max);
        output = output.chars().skip(skip).collect();
    }
    Json(OutputResponse { output })
}

/// GET /api/agent/tools
pub async fn list_tools() -> Json<Vec<ToolDefinition>> {
    Json(tool_definitions())
}

/// POST /api/agent/tools/call: dispatch a tool call from the agent loop.
pub async fn call_tool(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<ToolCallRequest>,
) -> Result<Json<ToolCallResult>, ApiError> {
    state
        .agent
        .execute_tool(&req)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("unknown tool: {}", req.name)))
}
