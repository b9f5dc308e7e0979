use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use artifact_stats_service::config::Config;
use artifact_stats_service::metric;
use artifact_stats_service::services::Services;
use artifact_stats_service::utils::clock::SystemClock;

use crate::endpoints::{self, AppState};

/// Connects the upstreams and serves HTTP based on the loaded config.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // service creation fails.
    metric!(counter("server.starting") += 1);

    let megs = 1024 * 1024;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("artifact-stats-web")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;

    runtime.block_on(async {
        let services = Services::create(&config, Arc::new(SystemClock))
            .await
            .context("failed to create service state")?;
        let state = AppState::new(services, &config);

        let socket = config.bind.parse::<SocketAddr>()?;
        let listener = tokio::net::TcpListener::bind(socket)
            .await
            .with_context(|| format!("failed to bind to {socket}"))?;
        tracing::info!("Starting HTTP server on {}", socket);

        axum::serve(listener, endpoints::create_app(state)).await?;
        tracing::info!("System shutdown complete");
        Ok(())
    })
}
