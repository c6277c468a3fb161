//! agent-portal daemon: wires configuration, the session registry and the
//! HTTP/WebSocket router into one server.

pub mod daemon;
