//! A client of one Nexus repository manager and its statistics API.
//!
//! At startup the connector settles on one of the configured host alternatives and reads the
//! catalog of projects and artifacts it may report on. Both are persisted in the durable store,
//! so a restart while every host is unreachable can still serve cached statistics.

use std::fmt;
use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use serde::{Deserialize, Serialize};
use url::Url;

use super::xml;
use crate::caching::durable::DurableStoreRef;
use crate::caching::freshness::{MonthlyStatsPolicy, QueryWindow, RecentPolicy};
use crate::caching::{CacheError, CacheKey, CacheKind, CacheResult, FetchThroughCache};
use crate::config::{DefaultProjectConfig, NexusConnectorConfig, ProjectOverride};
use crate::types::{LatestRelease, ProjectInfo, StatsPayload, YearMonth};
use crate::utils::clock::ClockRef;
use crate::utils::http::HttpClient;

/// A project of the catalog, with the artifacts statistics are available for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// The upstream's project id.
    pub id: String,
    /// The Maven group id.
    pub name: String,
    /// The default first month of statistics queries.
    pub start_date: YearMonth,
    pub artifacts: Vec<Artifact>,
}

impl Project {
    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|artifact| artifact.name == name)
    }
}

/// An artifact of the catalog, with the metadata shown next to its badge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub alias: String,
    /// Six hex digits, without a leading `#`.
    pub color: String,
    pub site: String,
}

impl Artifact {
    fn discovered(group: &str, name: String) -> Self {
        let color = format!("{:06x}", rand::rng().random_range(0..=0xff_ffffu32));
        let site = format!("https://maven-badges.herokuapp.com/maven-central/{group}/{name}/");
        Self {
            alias: name.clone(),
            name,
            color,
            site,
        }
    }
}

/// What is remembered about a connector between restarts.
#[derive(Debug, Serialize, Deserialize)]
struct Setup {
    base_url: Url,
    projects: Vec<Project>,
}

/// The number of months from `start` up to the month of `today`.
///
/// This is the default length of a statistics query starting at `start`.
pub fn default_months(start: YearMonth, today: YearMonth) -> CacheResult<u32> {
    u32::try_from(start.months_until(today)).map_err(|_| {
        CacheError::InvalidQuery(format!("start date {start} lies after the current month"))
    })
}

/// A client of one Nexus host.
pub struct NexusConnector {
    base_url: Url,
    authorization: String,
    client: HttpClient,
    clock: ClockRef,
    projects: Vec<Project>,
    stats: FetchThroughCache<MonthlyStatsPolicy>,
    latest_releases: FetchThroughCache<RecentPolicy>,
}

impl fmt::Debug for NexusConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NexusConnector")
            .field("base_url", &self.base_url.as_str())
            .field("projects", &self.projects.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl NexusConnector {
    /// Picks a reachable host, builds the catalog and sets up the caches.
    ///
    /// Fails if no host is reachable and nothing was persisted by an earlier run, or if a
    /// configured override names a project or artifact the catalog does not have.
    pub async fn connect(
        config: &NexusConnectorConfig,
        defaults: &DefaultProjectConfig,
        client: HttpClient,
        durable: DurableStoreRef,
        clock: ClockRef,
        fetch_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let authorization = config.authorization.token.header_value();
        let setup_key = CacheKey::builder(CacheKind::Catalog)
            .field("scheme", &config.scheme)
            .field("host", &config.host)
            .build();
        let persisted = load_setup(&durable, &setup_key).await;

        let mut live = None;
        for host in config.hosts() {
            let base_url = Url::parse(&format!("{}://{}/", config.scheme, host))
                .with_context(|| format!("invalid Nexus host `{host}`"))?;
            match fetch_projects(&client, &base_url, &authorization).await {
                Ok(projects) => {
                    tracing::info!(host, "Connected to Nexus");
                    live = Some((base_url, projects));
                    break;
                }
                Err(err) => {
                    tracing::info!(
                        error = &err as &dyn std::error::Error,
                        host,
                        "Unable to connect to Nexus"
                    );
                }
            }
        }

        let setup = match (live, persisted) {
            (Some((base_url, listed)), persisted) => {
                match build_catalog(&client, &base_url, &authorization, listed).await {
                    Ok(projects) => Setup { base_url, projects },
                    Err(err) => {
                        tracing::warn!(
                            error = &err as &dyn std::error::Error,
                            "Unable to retrieve the project catalog from Nexus"
                        );
                        let persisted = persisted.with_context(|| {
                            format!("no project catalog available for `{}`", config.host)
                        })?;
                        tracing::info!("Using the persisted project catalog");
                        Setup {
                            base_url,
                            projects: persisted.projects,
                        }
                    }
                }
            }
            (None, Some(persisted)) => {
                tracing::info!(base_url = %persisted.base_url, "Using the persisted Nexus host");
                persisted
            }
            (None, None) => anyhow::bail!("none of the Nexus hosts `{}` is reachable", config.host),
        };

        match serde_json::to_vec(&setup) {
            Ok(bytes) => {
                if let Err(err) = durable.store(&setup_key.durable_name(), &bytes).await {
                    tracing::warn!(
                        error = &err as &dyn std::error::Error,
                        "Failed to persist the Nexus setup"
                    );
                }
            }
            Err(err) => tracing::error!(
                error = &err as &dyn std::error::Error,
                "Failed to serialize the Nexus setup"
            ),
        }

        let Setup {
            base_url,
            mut projects,
        } = setup;
        apply_overrides(&mut projects, &config.projects)?;
        for project in &mut projects {
            project.start_date = defaults.start_date;
        }
        tracing::info!(base_url = %base_url, ?projects, "Nexus projects configuration");

        let scope = base_url.as_str().to_owned();
        let stats = FetchThroughCache::new(
            format!("{scope}#stats"),
            durable.clone(),
            MonthlyStatsPolicy::new(config.cache.ttl, config.cache.day_of_month_from_which_to_leave),
            clock.clone(),
            fetch_timeout,
        );
        let latest_releases = FetchThroughCache::new(
            format!("{scope}#latest-release"),
            durable,
            RecentPolicy::default(),
            clock.clone(),
            fetch_timeout,
        );

        Ok(Self {
            base_url,
            authorization,
            client,
            clock,
            projects,
            stats,
            latest_releases,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn project(&self, name: &str) -> Option<&Project> {
        self.projects.iter().find(|project| project.name == name)
    }

    /// The statistics cache, e.g. to subscribe to changes.
    pub fn stats_cache(&self) -> &FetchThroughCache<MonthlyStatsPolicy> {
        &self.stats
    }

    /// One row per artifact of the catalog.
    pub fn project_infos(&self) -> impl Iterator<Item = ProjectInfo> + '_ {
        self.projects.iter().flat_map(|project| {
            project.artifacts.iter().map(|artifact| {
                [
                    format!("{}:{}", project.name, artifact.name),
                    artifact.alias.clone(),
                    artifact.color.clone(),
                    artifact.site.clone(),
                ]
            })
        })
    }

    /// Download statistics of one artifact of `project`.
    ///
    /// Without a `start`, the project's start date is used. Without `months`, the window
    /// reaches up to the current month.
    pub async fn get_stats(
        &self,
        project: &Project,
        artifact: &str,
        start: Option<YearMonth>,
        months: Option<u32>,
    ) -> CacheResult<StatsPayload> {
        let start = start.unwrap_or(project.start_date);
        let default_months = default_months(start, YearMonth::of(self.clock.now()))?;
        let months = months.unwrap_or(default_months);
        let window = QueryWindow {
            default_start: start == project.start_date,
            default_months: months == default_months,
        };

        let key = stats_key(project, artifact, start, months, window);

        let mut url = self.endpoint("service/local/stats/timeline")?;
        url.query_pairs_mut()
            .append_pair("t", "raw")
            .append_pair("g", &project.name)
            .append_pair("p", &project.id)
            .append_pair("a", artifact)
            .append_pair("from", &start.compact())
            .append_pair("nom", &months.to_string());
        let client = self.client.clone();
        let authorization = self.authorization.clone();

        self.stats
            .get_or_refresh(key, window, move || async move {
                let request = client.get(url, Some(authorization.as_str()));
                let body = client.fetch_text(request, "nexus timeline").await?;
                xml::parse_timeline(&body)
            })
            .await
    }

    /// The most recent release of `group:artifact`.
    pub async fn get_latest_release(
        &self,
        group: &str,
        artifact: &str,
    ) -> CacheResult<LatestRelease> {
        let key = CacheKey::builder(CacheKind::LatestRelease)
            .field("group", group)
            .field("artifact", artifact)
            .build();

        let mut url = self.endpoint("service/local/lucene/search")?;
        url.query_pairs_mut()
            .append_pair("g", group)
            .append_pair("a", artifact)
            .append_pair("collapseresults", "true");
        let client = self.client.clone();
        let authorization = self.authorization.clone();

        self.latest_releases
            .get_or_refresh(key, (), move || async move {
                let request = client.get(url, Some(authorization.as_str()));
                let body = client.fetch_text(request, "nexus search").await?;
                Ok(xml::parse_latest_release(&body))
            })
            .await
    }

    /// Forgets the in-memory entries of both caches.
    pub fn clear_cache(&self) {
        self.stats.clear_hot();
        self.latest_releases.clear_hot();
        tracing::info!(base_url = %self.base_url, "In memory cache cleaning done");
    }

    fn endpoint(&self, path: &str) -> CacheResult<Url> {
        self.base_url.join(path).map_err(CacheError::from_std_error)
    }
}

/// The key of a statistics query.
///
/// A query reaching up to the current month is keyed independently of its length, so it keeps
/// hitting the same entry when the month rolls over.
fn stats_key(
    project: &Project,
    artifact: &str,
    start: YearMonth,
    months: u32,
    window: QueryWindow,
) -> CacheKey {
    let key = CacheKey::builder(CacheKind::Stats)
        .field("project", &project.id)
        .field("group", &project.name)
        .field("artifact", artifact)
        .field("from", start.compact());
    if window.default_months {
        key.field("months", "diffFromToday")
    } else {
        key.field("months", months)
    }
    .build()
}

async fn load_setup(durable: &DurableStoreRef, key: &CacheKey) -> Option<Setup> {
    let bytes = match durable.load(&key.durable_name()).await {
        Ok(bytes) => bytes?,
        Err(err) => {
            tracing::warn!(
                error = &err as &dyn std::error::Error,
                "Failed to load the persisted Nexus setup"
            );
            return None;
        }
    };
    serde_json::from_slice(&bytes)
        .map_err(|err| {
            tracing::warn!(
                error = &err as &dyn std::error::Error,
                "Discarding undecodable Nexus setup"
            );
        })
        .ok()
}

async fn fetch_projects(
    client: &HttpClient,
    base_url: &Url,
    authorization: &str,
) -> CacheResult<Vec<xml::StatsProject>> {
    let url = base_url
        .join("service/local/stats/projects")
        .map_err(CacheError::from_std_error)?;
    let body = client
        .fetch_text(client.get(url, Some(authorization)), "nexus projects")
        .await?;
    xml::parse_projects(&body)
}

async fn build_catalog(
    client: &HttpClient,
    base_url: &Url,
    authorization: &str,
    listed: Vec<xml::StatsProject>,
) -> CacheResult<Vec<Project>> {
    let mut projects = Vec::with_capacity(listed.len());
    for listed in listed {
        let mut url = base_url
            .join(&format!("service/local/stats/coord/{}", listed.id))
            .map_err(CacheError::from_std_error)?;
        url.query_pairs_mut().append_pair("g", &listed.name);
        let body = client
            .fetch_text(client.get(url, Some(authorization)), "nexus artifacts")
            .await?;

        let artifacts = xml::parse_artifacts(&body)?
            .into_iter()
            .map(|name| Artifact::discovered(&listed.name, name))
            .collect();
        projects.push(Project {
            id: listed.id,
            name: listed.name,
            start_date: YearMonth::STATS_EPOCH,
            artifacts,
        });
    }
    Ok(projects)
}

fn apply_overrides(projects: &mut [Project], overrides: &[ProjectOverride]) -> anyhow::Result<()> {
    for project_override in overrides {
        let project = projects
            .iter_mut()
            .find(|project| project.name == project_override.name)
            .with_context(|| format!("project `{}` not found on Nexus", project_override.name))?;

        for artifact_override in &project_override.artifacts {
            let artifact = project
                .artifacts
                .iter_mut()
                .find(|artifact| artifact.name == artifact_override.name)
                .with_context(|| {
                    format!("artifact `{}` not found on Nexus", artifact_override.name)
                })?;

            if let Some(alias) = &artifact_override.alias {
                artifact.alias.clone_from(alias);
            }
            if let Some(color) = &artifact_override.color {
                artifact.color.clone_from(color);
            }
            if let Some(site) = &artifact_override.site {
                artifact.site.clone_from(site);
            }
        }
    }
    Ok(())
}
