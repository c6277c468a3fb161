use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.agent-portal/config.toml`.
///
/// Every section has serde defaults, so a partial file (or no file at all)
/// yields a usable configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

impl Config {
    /// Load config from `~/.agent-portal/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply process environment overrides (`PORT`, `WORKSPACE_ROOT`,
    /// `AGENT_PORTAL_SHELL`).
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::apply_env`] but with an injectable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.daemon.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Validation(format!("PORT is not a valid port: {port}")))?;
        }
        if let Some(root) = lookup("WORKSPACE_ROOT") {
            self.workspace.root = PathBuf::from(root);
        }
        if let Some(shell) = lookup("AGENT_PORTAL_SHELL") {
            self.terminal.shell = Some(shell);
        }
        self.validate()
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.general.validate()?;
        self.terminal.validate()?;
        if self.agent.default_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "agent.default_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".agent-portal")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `"human"` or `"json"`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl GeneralConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.log_format.as_str() {
            "human" | "json" => Ok(()),
            other => Err(ConfigError::Validation(format!(
                "general.log_format must be 'human' or 'json', got '{other}'"
            ))),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "human".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_daemon_port")]
    pub port: u16,
    #[serde(default = "default_daemon_host")]
    pub host: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: default_daemon_port(),
            host: default_daemon_host(),
        }
    }
}

fn default_daemon_port() -> u16 {
    3000
}
fn default_daemon_host() -> String {
    "127.0.0.1".into()
}

/// Where terminal sessions start. Never derived from client input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
        }
    }
}

fn default_workspace_root() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Shell program. `None` means `$SHELL`, falling back to `/bin/bash`.
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default = "default_shell_args")]
    pub shell_args: Vec<String>,
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_output_buffer_bytes")]
    pub output_buffer_bytes: usize,
    /// Extra environment variables for every spawned shell.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: None,
            shell_args: default_shell_args(),
            term: default_term(),
            cols: default_cols(),
            rows: default_rows(),
            max_sessions: default_max_sessions(),
            output_buffer_bytes: default_output_buffer_bytes(),
            env: BTreeMap::new(),
        }
    }
}

impl TerminalConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.cols == 0 || self.rows == 0 {
            return Err(ConfigError::Validation(
                "terminal.cols and terminal.rows must be non-zero".into(),
            ));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::Validation(
                "terminal.max_sessions must be at least 1".into(),
            ));
        }
        if self.output_buffer_bytes == 0 {
            return Err(ConfigError::Validation(
                "terminal.output_buffer_bytes must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_shell_args() -> Vec<String> {
    vec!["-l".into()]
}
fn default_term() -> String {
    "xterm-256color".into()
}
fn default_cols() -> u16 {
    120
}
fn default_rows() -> u16 {
    30
}
fn default_max_sessions() -> usize {
    16
}
fn default_output_buffer_bytes() -> usize {
    100_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Timeout for `run_in_terminal` when the caller does not pass one.
    #[serde(default = "default_agent_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_agent_timeout_ms(),
        }
    }
}

fn default_agent_timeout_ms() -> u64 {
    30_000
}
