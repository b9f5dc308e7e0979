use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use url::Url;

use super::split_pair;
use crate::caching::durable::DurableStoreRef;
use crate::caching::freshness::DailyPolicy;
use crate::caching::{CacheError, CacheKey, CacheKind, CacheResult, FetchThroughCache};
use crate::config::GitHubConfig;
use crate::utils::clock::ClockRef;
use crate::utils::http::HttpClient;

#[derive(Debug, Deserialize)]
struct Repository {
    stargazers_count: u64,
}

/// A client of the GitHub repository API, reporting star counts.
#[derive(Debug)]
pub struct GitHubConnector {
    base_url: Url,
    authorization: Option<String>,
    client: HttpClient,
    star_counts: FetchThroughCache<DailyPolicy<u64>>,
}

impl GitHubConnector {
    /// Sets up the connector. Nothing is requested from GitHub until the first lookup.
    pub fn new(
        config: &GitHubConfig,
        client: HttpClient,
        durable: DurableStoreRef,
        clock: ClockRef,
        fetch_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let base_url = Url::parse(&format!("{}://{}/", config.scheme, config.host))
            .with_context(|| format!("invalid GitHub host `{}`", config.host))?;
        let star_counts = FetchThroughCache::new(
            format!("{base_url}#star-count"),
            durable,
            DailyPolicy::new(config.cache.ttl),
            clock,
            fetch_timeout,
        );

        Ok(Self {
            base_url,
            authorization: config
                .authorization
                .as_ref()
                .map(|authorization| authorization.token.header_value()),
            client,
            star_counts,
        })
    }

    /// The star count cache, e.g. to subscribe to changes.
    pub fn star_count_cache(&self) -> &FetchThroughCache<DailyPolicy<u64>> {
        &self.star_counts
    }

    pub async fn get_star_count(&self, owner: &str, repository: &str) -> CacheResult<u64> {
        let key = CacheKey::builder(CacheKind::StarCount)
            .field("owner", owner)
            .field("repository", repository)
            .build();

        let url = self
            .base_url
            .join(&format!("repos/{owner}/{repository}"))
            .map_err(CacheError::from_std_error)?;
        let client = self.client.clone();
        let authorization = self.authorization.clone();

        self.star_counts
            .get_or_refresh(key, (), move || async move {
                let request = client
                    .get(url, authorization.as_deref())
                    .header(reqwest::header::ACCEPT, "application/vnd.github+json");
                let repository: Repository = client.fetch_json(request, "github repos").await?;
                Ok(repository.stargazers_count)
            })
            .await
    }

    /// Sums the star counts of `owner:repository` references, looked up concurrently.
    ///
    /// A repository referenced more than once is counted once.
    pub async fn get_all_star_count(&self, repositories: &[String]) -> CacheResult<u64> {
        if repositories.is_empty() {
            return Err(CacheError::InvalidQuery("no repository given".into()));
        }
        let pairs = repositories
            .iter()
            .map(|reference| split_pair(reference, "repository"))
            .collect::<CacheResult<BTreeSet<_>>>()?;

        let counts = futures::future::join_all(
            pairs
                .into_iter()
                .map(|(owner, repository)| self.get_star_count(owner, repository)),
        )
        .await;

        counts.into_iter().sum()
    }

    pub fn clear_cache(&self) {
        self.star_counts.clear_hot();
        tracing::info!(base_url = %self.base_url, "In memory cache cleaning done");
    }
}
