//! Shared terminal sessions for the agent portal.
//!
//! A browser terminal and an agent drive the same interactive shell. This
//! crate owns that shell and everything needed to share it safely:
//!
//! - [`shell`]: PTY-backed shell process with one reader and one writer thread
//! - [`pipeline`]: ordered fan-out of shell output to subscribers and the rolling buffer
//! - [`output_buffer`]: size-capped window of recent output
//! - [`resize`]: best-effort terminal geometry changes
//! - [`bridge`]: duplex pump between a remote connection and a session
//! - [`registry`]: sessions keyed by connection id, plus the shared-session pointer
//! - [`injector`]: marker-delimited command injection and output capture
//! - [`agent_tools`]: the agent-facing `run_in_terminal` / `get_terminal_output` surface

pub mod agent_tools;
pub mod bridge;
pub mod error;
pub mod injector;
pub mod output_buffer;
pub mod pipeline;
pub mod registry;
pub mod resize;
pub mod shell;

pub use error::{Result, SessionError};
