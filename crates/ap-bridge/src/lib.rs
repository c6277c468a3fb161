//! HTTP and WebSocket surface of the agent portal.
//!
//! - [`terminal_ws`]: browser terminal over a WebSocket, one shell per connection
//! - [`agent_api`]: REST endpoints the chat agent uses to drive the shared terminal
//! - [`http_api`]: shared state, router assembly, health and config endpoints
//! - [`protocol`]: JSON frames exchanged on the terminal socket
//! - [`api_error`]: error type rendered as `{"error": ..}` responses

pub mod agent_api;
pub mod api_error;
pub mod http_api;
pub mod protocol;
pub mod terminal_ws;
