//! agent-portal daemon: serves the browser terminal and the agent API.

use anyhow::{Context, Result};
use ap_core::config::Config;
use ap_daemon::daemon::Daemon;
use ap_telemetry::logging::{init_logging, LogFormat};
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    dotenv::dotenv().ok();

    let mut config = Config::load().context("failed to load ~/.agent-portal/config.toml")?;
    config
        .apply_env()
        .context("invalid environment override")?;

    init_logging(
        "ap-daemon",
        &config.general.log_level,
        LogFormat::from_config(&config.general.log_format),
    );
    info!(version = env!("CARGO_PKG_VERSION"), "agent-portal daemon starting");

    let daemon = Daemon::new(config);

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("ctrl-c received, initiating shutdown"),
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                // Without a signal handler, run until the process is killed.
                std::future::pending::<()>().await;
            }
        }
    };

    info!("terminal: ws://{}/ws/terminal", daemon.bind_addr());
    daemon.run(shutdown).await
}
