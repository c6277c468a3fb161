use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use ap_core::config::Config;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::output_buffer::OutputBuffer;
use crate::pipeline::OutputPipeline;
use crate::shell::{ShellCommand, ShellProcess};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A connection's terminal: one shell process plus the lock that keeps
/// agent injections on it one at a time.
pub struct Session {
    id: String,
    process: Arc<ShellProcess>,
    created_at: DateTime<Utc>,
    pub(crate) injection_lock: tokio::sync::Mutex<()>,
}

impl Session {
    fn new(id: String, process: Arc<ShellProcess>) -> Self {
        Self {
            id,
            process,
            created_at: Utc::now(),
            injection_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn process(&self) -> &Arc<ShellProcess> {
        &self.process
    }

    pub fn pipeline(&self) -> &Arc<OutputPipeline> {
        self.process.pipeline()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn working_dir(&self) -> &Path {
        self.process.cwd()
    }

    /// Recent output from the rolling buffer, decoded lossily.
    pub fn recent_output(&self) -> String {
        self.pipeline().snapshot_lossy()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("process", &self.process)
            .finish()
    }
}

/// Serializable view of a session for listings.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub pid: Option<u32>,
    pub alive: bool,
    pub shared: bool,
    pub cols: u16,
    pub rows: u16,
    pub buffered_bytes: usize,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Template for every spawned shell; its `cwd` is replaced per session.
    pub shell: ShellCommand,
    pub max_sessions: usize,
    pub output_buffer_bytes: usize,
}

impl RegistryConfig {
    pub fn from_config(config: &Config) -> Self {
        let term = &config.terminal;
        let program = term.shell.clone().unwrap_or_else(ShellCommand::default_shell);
        let mut shell = ShellCommand::new(program, config.workspace.root.clone())
            .size(term.cols, term.rows)
            .env("TERM", term.term.clone());
        for arg in &term.shell_args {
            shell = shell.arg(arg.clone());
        }
        for (k, v) in &term.env {
            shell = shell.env(k.clone(), v.clone());
        }
        Self {
            shell,
            max_sessions: term.max_sessions,
            output_buffer_bytes: term.output_buffer_bytes,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            shell: ShellCommand::login_shell(cwd),
            max_sessions: 16,
            output_buffer_bytes: OutputBuffer::DEFAULT_CAPACITY,
        }
    }
}

struct RegistryState {
    sessions: HashMap<String, Arc<Session>>,
    shared: Option<String>,
}

/// Live terminal sessions keyed by connection id.
///
/// The most recently created session is the shared one, the only session
/// agent commands are injected into. Sessions and the shared pointer sit
/// behind one lock, so `get_shared` never observes a half-applied
/// create or destroy.
pub struct SessionRegistry {
    config: RegistryConfig,
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        info!(max_sessions = config.max_sessions, "creating SessionRegistry");
        Self {
            config,
            state: Mutex::new(RegistryState {
                sessions: HashMap::new(),
                shared: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| {
            warn!("registry lock was poisoned, recovering");
            e.into_inner()
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Spawn a fresh shell for `connection_id` and make it the shared session.
    ///
    /// An existing session under the same id is destroyed first. On spawn
    /// failure nothing is registered.
    pub fn create_session(
        &self,
        connection_id: &str,
        working_dir: impl Into<PathBuf>,
    ) -> Result<Arc<Session>> {
        self.destroy_session(connection_id);

        {
            let state = self.lock();
            if state.sessions.len() >= self.config.max_sessions {
                return Err(SessionError::AtCapacity {
                    max: self.config.max_sessions,
                });
            }
        }

        let command = self.config.shell.clone().with_cwd(working_dir);
        let process = ShellProcess::start(connection_id, &command, self.config.output_buffer_bytes)?;
        let session = Arc::new(Session::new(connection_id.to_string(), process));

        let replaced = {
            let mut state = self.lock();
            if state.sessions.len() >= self.config.max_sessions {
                drop(state);
                session.process().kill();
                return Err(SessionError::AtCapacity {
                    max: self.config.max_sessions,
                });
            }
            if let Some(prev_id) = state.shared.replace(connection_id.to_string()) {
                if let Some(prev) = state.sessions.get(&prev_id) {
                    prev.pipeline().clear_buffer();
                }
            }
            state
                .sessions
                .insert(connection_id.to_string(), session.clone())
        };
        // A concurrent create for the same id slipped in between.
        if let Some(old) = replaced {
            old.process().kill();
        }

        info!(session = %connection_id, "terminal session created and shared");
        Ok(session)
    }

    /// The session agent commands go to, if any.
    pub fn get_shared(&self) -> Option<Arc<Session>> {
        let state = self.lock();
        state
            .shared
            .as_ref()
            .and_then(|id| state.sessions.get(id).cloned())
    }

    pub fn shared_id(&self) -> Option<String> {
        self.lock().shared.clone()
    }

    pub fn get(&self, connection_id: &str) -> Option<Arc<Session>> {
        self.lock().sessions.get(connection_id).cloned()
    }

    /// Kill and deregister a session. The shared pointer is cleared if it
    /// pointed here and is not handed to another session.
    pub fn destroy_session(&self, connection_id: &str) -> bool {
        let removed = {
            let mut state = self.lock();
            let removed = state.sessions.remove(connection_id);
            if removed.is_some() && state.shared.as_deref() == Some(connection_id) {
                state.shared = None;
            }
            removed
        };
        match removed {
            Some(session) => {
                session.process().kill();
                info!(session = %connection_id, "terminal session destroyed");
                true
            }
            None => {
                debug!(session = %connection_id, "destroy: no such session");
                false
            }
        }
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let state = self.lock();
        let mut infos: Vec<SessionInfo> = state
            .sessions
            .values()
            .map(|s| {
                let size = s.process().size();
                SessionInfo {
                    id: s.id().to_string(),
                    pid: s.process().pid(),
                    alive: s.process().is_alive(),
                    shared: state.shared.as_deref() == Some(s.id()),
                    cols: size.cols,
                    rows: size.rows,
                    buffered_bytes: s.pipeline().buffered_len(),
                    created_at: s.created_at(),
                }
            })
            .collect();
        infos.sort_by_key(|i| i.created_at);
        infos
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Kill every session. Used on daemon shutdown.
    pub fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut state = self.lock();
            state.shared = None;
            state.sessions.drain().map(|(_, s)| s).collect()
        };
        let count = sessions.len();
        for session in sessions {
            session.process().kill();
        }
        info!(count, "all terminal sessions shut down");
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SessionRegistry")
            .field("sessions", &state.sessions.len())
            .field("shared", &state.shared)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_config_from_app_config() {
        let mut config = Config::default();
        config.terminal.shell = Some("/bin/zsh".into());
        config.terminal.shell_args = vec!["-l".into(), "-i".into()];
        config.terminal.env.insert("EDITOR".into(), "vi".into());
        config.workspace.root = PathBuf::from("/srv/ws");

        let rc = RegistryConfig::from_config(&config);
        assert_eq!(rc.shell.program, "/bin/zsh");
        assert_eq!(rc.shell.args, vec!["-l".to_string(), "-i".to_string()]);
        assert_eq!(rc.shell.cwd, PathBuf::from("/srv/ws"));
        assert_eq!(rc.shell.size.cols, 120);
        assert!(rc.shell.env.contains(&("EDITOR".to_string(), "vi".to_string())));
        assert!(rc
            .shell
            .env
            .contains(&("TERM".to_string(), "xterm-256color".to_string())));
        assert_eq!(rc.output_buffer_bytes, 100_000);
    }

    #[test]
    fn empty_registry_has_no_shared_session() {
        let registry = SessionRegistry::new(RegistryConfig::default());
        assert!(registry.get_shared().is_none());
        assert!(registry.shared_id().is_none());
        assert!(registry.is_empty());
        assert!(!registry.destroy_session("missing"));
    }
}
