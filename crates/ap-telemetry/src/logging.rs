use tracing_subscriber::{fmt, EnvFilter};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

impl LogFormat {
    /// Parse the `general.log_format` config value. Unknown values fall
    /// back to [`LogFormat::Human`].
    pub fn from_config(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Human,
        }
    }
}

/// Build the filter: `RUST_LOG` if set, otherwise `default_level`
/// (e.g. "info", "debug", "ap_session=debug,warn").
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize logging in the requested format.
///
/// Safe to call multiple times (e.g. in tests) -- subsequent calls are no-ops.
pub fn init_logging(service_name: &str, default_level: &str, format: LogFormat) {
    let filter = env_filter(default_level);

    let installed = match format {
        LogFormat::Human => fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .try_init()
            .is_ok(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .try_init()
            .is_ok(),
    };

    if installed {
        tracing::info!(service = service_name, ?format, "logging initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parsing() {
        assert_eq!(LogFormat::from_config("json"), LogFormat::Json);
        assert_eq!(LogFormat::from_config(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::from_config("human"), LogFormat::Human);
        assert_eq!(LogFormat::from_config("anything"), LogFormat::Human);
    }

    #[test]
    fn init_twice_is_noop() {
        init_logging("test", "warn", LogFormat::Human);
        init_logging("test", "warn", LogFormat::Json);
    }
}
