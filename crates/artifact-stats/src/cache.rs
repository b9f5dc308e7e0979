//! Offline operations on the caches.
use std::sync::Arc;

use anyhow::{Context, Result};
use artifact_stats_service::caching::durable;
use artifact_stats_service::config::Config;
use artifact_stats_service::connectors::StatsFilter;
use artifact_stats_service::services::Services;
use artifact_stats_service::utils::clock::SystemClock;

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")
}

/// Resolves the statistics of every artifact over the default window.
///
/// Returns the total number of downloads.
pub fn warm(config: Config) -> Result<i64> {
    runtime()?.block_on(async {
        let services = Services::create(&config, Arc::new(SystemClock)).await?;
        let nexus = services
            .nexus
            .context("no Nexus connector is enabled")?;

        let stats = nexus.get_all_stats(&StatsFilter::default()).await?;
        tracing::info!(
            months = stats.downloads_for_month.len(),
            total = stats.total_downloads,
            "Caches warmed"
        );
        Ok(stats.total_downloads)
    })
}

/// Wipes the configured durable store without connecting to any upstream.
pub fn clear(config: Config) -> Result<()> {
    runtime()?.block_on(async {
        let store = durable::from_config(&config.durable_store)?;
        store.clear().await?;
        tracing::info!("Durable store cleared");
        Ok(())
    })
}
