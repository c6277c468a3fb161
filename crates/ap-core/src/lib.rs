//! Shared configuration for the agent-portal services.
//!
//! The terminal core (`ap-session`), the HTTP/WebSocket layer (`ap-bridge`)
//! and the daemon binary all read their settings from [`config::Config`].

pub mod config;
