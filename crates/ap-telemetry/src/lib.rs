//! Logging setup for agent-portal services.
//!
//! Wraps `tracing-subscriber` so every binary configures output the same
//! way: `RUST_LOG` wins when set, otherwise the configured level applies.

pub mod logging;
