//! Provides the shared services and a way to initialize them.
//!
//! [`Services`] opens the durable store and connects every configured upstream according to the
//! provided [`Config`]. Connectors that are not configured or not enabled are `None`.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::caching::durable::{self, DurableStoreRef};
use crate::caching::{CacheError, CacheResult, LoggingListener};
use crate::config::Config;
use crate::connectors::{GitHubConnector, NexusConnectorGroup};
use crate::utils::clock::ClockRef;
use crate::utils::http::HttpClient;

#[derive(Debug, Clone)]
pub struct Services {
    pub durable: DurableStoreRef,
    pub nexus: Option<Arc<NexusConnectorGroup>>,
    pub github: Option<Arc<GitHubConnector>>,
}

impl Services {
    pub async fn create(config: &Config, clock: ClockRef) -> Result<Self> {
        let durable =
            durable::from_config(&config.durable_store).context("failed to open durable store")?;
        Self::with_durable_store(config, clock, durable).await
    }

    /// Like [`create`](Self::create), on top of an already opened durable store.
    pub async fn with_durable_store(
        config: &Config,
        clock: ClockRef,
        durable: DurableStoreRef,
    ) -> Result<Self> {
        let client = HttpClient::from_config(config).context("failed to create http client")?;

        let nexus = match &config.nexus {
            Some(nexus) => {
                let group = NexusConnectorGroup::connect(
                    nexus,
                    &client,
                    &durable,
                    &clock,
                    config.upstream_timeout,
                )
                .await?;
                for connector in group.connectors() {
                    connector
                        .stats_cache()
                        .notifier()
                        .subscribe(Arc::new(LoggingListener));
                }
                (!group.is_empty()).then(|| Arc::new(group))
            }
            None => None,
        };
        if nexus.is_none() {
            tracing::info!("Nexus connector group disabled");
        }

        let github = match &config.github {
            Some(github) if github.enabled => {
                let connector = GitHubConnector::new(
                    github,
                    client,
                    durable.clone(),
                    clock,
                    config.upstream_timeout,
                )?;
                connector
                    .star_count_cache()
                    .notifier()
                    .subscribe(Arc::new(LoggingListener));
                Some(Arc::new(connector))
            }
            _ => {
                tracing::info!("GitHub connector disabled");
                None
            }
        };

        Ok(Self {
            durable,
            nexus,
            github,
        })
    }

    /// Wipes the in-memory state of every connector, then the durable store.
    pub async fn clear_cache(&self) -> CacheResult<()> {
        if let Some(nexus) = &self.nexus {
            nexus.clear_cache();
        }
        if let Some(github) = &self.github {
            github.clear_cache();
        }
        self.durable
            .clear()
            .await
            .map_err(CacheError::from_std_error)?;
        tracing::info!("Cache cleaning done");
        Ok(())
    }
}
