use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use ap_bridge::http_api::{api_router, ApiState};
use ap_core::config::Config;
use tracing::info;

/// The server process: one [`ApiState`] shared by every connection.
pub struct Daemon {
    config: Config,
    state: Arc<ApiState>,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        let state = Arc::new(ApiState::new(config.clone()));
        Self { config, state }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> &Arc<ApiState> {
        &self.state
    }

    /// `host:port` from `[daemon]`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.config.daemon.host, self.config.daemon.port)
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.bind_addr();
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind {bind_addr}"))?;
        self.run_with_listener(listener, shutdown).await
    }

    /// Serve on a pre-bound listener until `shutdown` resolves.
    ///
    /// On shutdown every shell is killed first, so open terminal sockets
    /// receive their exit frame and close instead of holding the server open.
    pub async fn run_with_listener<F>(
        &self,
        listener: tokio::net::TcpListener,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr().context("listener has no local address")?;
        info!(
            %addr,
            workspace = %self.config.workspace.root.display(),
            "API server listening"
        );

        let registry = self.state.registry.clone();
        let graceful = async move {
            shutdown.await;
            info!("shutdown requested, closing terminal sessions");
            registry.shutdown();
        };

        axum::serve(listener, api_router(self.state.clone()))
            .with_graceful_shutdown(graceful)
            .await
            .context("API server error")?;

        // Sessions opened while draining.
        self.state.registry.shutdown();
        info!("API server stopped");
        Ok(())
    }
}
