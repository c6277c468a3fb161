use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::error::Result;
use crate::injector::{CapturedOutput, CommandInjector};
use crate::registry::SessionRegistry;

/// Returned by `run_in_terminal` when a command timed out before printing anything.
pub const TIMED_OUT_PLACEHOLDER: &str = "(command timed out)";

// ---------------------------------------------------------------------------
// Tool-call wire types
// ---------------------------------------------------------------------------

/// A tool the chat agent may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for input parameters.
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
    #[serde(rename = "readOnlyHint")]
    pub read_only_hint: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolResultContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultContent {
    Text { text: String },
}

impl ToolCallResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResultContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResultContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    pub fn text_content(&self) -> Option<&str> {
        self.content.first().map(|c| match c {
            ToolResultContent::Text { text } => text.as_str(),
        })
    }
}

/// Definitions for the terminal tools.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "run_in_terminal".to_string(),
            description: "Run a shell command in the user's open terminal and return its output. \
                          The user sees the command and its output live."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "Command line to execute"
                    },
                    "timeout_ms": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "How long to wait for the command to finish"
                    }
                },
                "required": ["command"]
            }),
            read_only_hint: false,
        },
        ToolDefinition {
            name: "get_terminal_output".to_string(),
            description: "Read recent output of the user's terminal without running anything."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "max_chars": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Only return the last N characters"
                    }
                }
            }),
            read_only_hint: true,
        },
    ]
}

// ---------------------------------------------------------------------------
// AgentTerminal
// ---------------------------------------------------------------------------

/// Agent-side handle on the shared terminal.
#[derive(Clone)]
pub struct AgentTerminal {
    registry: Arc<SessionRegistry>,
    injector: Arc<CommandInjector>,
    default_timeout: Duration,
}

impl AgentTerminal {
    pub fn new(
        registry: Arc<SessionRegistry>,
        injector: Arc<CommandInjector>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            injector,
            default_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run `command` in the shared session, keeping the timeout flag.
    pub async fn run(&self, command: &str, timeout_ms: Option<u64>) -> Result<CapturedOutput> {
        let timeout = timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        self.injector
            .run(self.registry.get_shared(), command, timeout)
            .await
    }

    /// Run `command` and return only its text.
    pub async fn run_in_terminal(&self, command: &str, timeout_ms: Option<u64>) -> Result<String> {
        let captured = self.run(command, timeout_ms).await?;
        if captured.timed_out && captured.text.is_empty() {
            return Ok(TIMED_OUT_PLACEHOLDER.to_string());
        }
        Ok(captured.text)
    }

    /// Recent output of the shared session; empty when there is none.
    pub fn recent_output(&self) -> String {
        self.registry
            .get_shared()
            .map(|s| s.recent_output())
            .unwrap_or_default()
    }

    /// Dispatch a tool call. Returns `None` for tools this handle does not own.
    pub async fn execute_tool(&self, request: &ToolCallRequest) -> Option<ToolCallResult> {
        let result = match request.name.as_str() {
            "run_in_terminal" => Some(self.exec_run_in_terminal(&request.arguments).await),
            "get_terminal_output" => Some(self.exec_get_terminal_output(&request.arguments)),
            _ => None,
        };
        if let Some(ref r) = result {
            info!(tool = %request.name, is_error = r.is_error, "executed terminal tool");
        }
        result
    }

    async fn exec_run_in_terminal(&self, args: &serde_json::Value) -> ToolCallResult {
        let command = match args.get("command").and_then(|v| v.as_str()) {
            Some(c) if !c.trim().is_empty() => c,
            _ => return ToolCallResult::error("missing required parameter: command"),
        };
        let timeout_ms = args.get("timeout_ms").and_then(|v| v.as_u64());
        match self.run_in_terminal(command, timeout_ms).await {
            Ok(text) => ToolCallResult::text(text),
            Err(e) => ToolCallResult::error(e.to_string()),
        }
    }

    fn exec_get_terminal_output(&self, args: &serde_json::Value) -> ToolCallResult {
        let output = self.recent_output();
        let text = match args.get("max_chars").and_then(|v| v.as_u64()) {
            Some(max) => {
                let count = output.chars().count();
                let skip = count.saturating_sub(max as usize);
                output.chars().skip(skip).collect()
            }
            None => output,
        };
        ToolCallResult::text(text)
    }
}

impl std::fmt::Debug for AgentTerminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTerminal")
            .field("registry", &self.registry)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}
