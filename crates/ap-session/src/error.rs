use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session limit reached ({max})")]
    AtCapacity { max: usize },

    #[error("shell spawn failed: {0}")]
    SpawnFailed(String),

    #[error("No active terminal. Open the terminal first.")]
    NoActiveSession,

    #[error("terminal session ended (exit code {code:?})")]
    ProcessExited { code: Option<u32> },

    #[error("pty resize failed: {0}")]
    ResizeFailed(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
