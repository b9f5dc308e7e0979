use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::future;

use super::nexus::{NexusConnector, Project};
use super::split_pair;
use crate::caching::durable::DurableStoreRef;
use crate::caching::{CacheError, CacheResult};
use crate::config::NexusConfig;
use crate::types::{AggregatedStats, LatestRelease, ProjectInfo, StatsPayload, YearMonth};
use crate::utils::clock::ClockRef;
use crate::utils::http::HttpClient;

/// Selects the artifacts a statistics query is about.
///
/// Unset filters match everything. Artifact ids may be given as `group:artifact` or as a bare
/// `artifact`.
#[derive(Debug, Clone, Default)]
pub struct StatsFilter {
    pub group_ids: Option<BTreeSet<String>>,
    pub aliases: Option<BTreeSet<String>>,
    pub artifact_ids: Option<BTreeSet<String>>,
    pub start: Option<YearMonth>,
    pub months: Option<u32>,
}

impl StatsFilter {
    fn matches_project(&self, project: &Project) -> bool {
        self.group_ids
            .as_ref()
            .is_none_or(|group_ids| group_ids.contains(&project.name))
    }

    fn matches_artifact(&self, project: &Project, artifact: &str, alias: &str) -> bool {
        if self.artifact_ids.is_none() && self.aliases.is_none() {
            return true;
        }
        let by_id = self.artifact_ids.as_ref().is_some_and(|ids| {
            ids.contains(artifact) || ids.contains(&format!("{}:{artifact}", project.name))
        });
        let by_alias = self
            .aliases
            .as_ref()
            .is_some_and(|aliases| aliases.contains(alias));
        by_id || by_alias
    }

    fn describe(&self) -> String {
        let mut parts = vec![];
        let mut push = |name: &str, values: &Option<BTreeSet<String>>| {
            if let Some(values) = values {
                let values: Vec<_> = values.iter().map(String::as_str).collect();
                parts.push(format!("{name} [{}]", values.join(", ")));
            }
        };
        push("group ids", &self.group_ids);
        push("aliases", &self.aliases);
        push("artifact ids", &self.artifact_ids);
        if parts.is_empty() {
            "no filter".into()
        } else {
            parts.join(", ")
        }
    }
}

/// Sums per-artifact statistics into one series.
///
/// Timelines of different lengths are aligned at their start; missing slots count as `0`.
/// Leading months that sum up to `0` become `None`. Returns `None` without any input.
pub fn merge(payloads: &[StatsPayload]) -> Option<AggregatedStats> {
    if payloads.is_empty() {
        return None;
    }
    let len = payloads
        .iter()
        .map(|payload| payload.timeline.len())
        .max()
        .unwrap_or_default();

    let mut sums = vec![0i64; len];
    for payload in payloads {
        for (sum, value) in sums.iter_mut().zip(&payload.timeline) {
            *sum += value;
        }
    }

    let downloads_for_month = sums
        .into_iter()
        .scan(true, |leading, sum| {
            *leading &= sum == 0;
            Some((!*leading).then_some(sum))
        })
        .collect();

    Some(AggregatedStats {
        total_downloads: payloads.iter().map(|payload| payload.total).sum(),
        downloads_for_month,
    })
}

/// All enabled Nexus connectors, queried as one.
#[derive(Debug, Clone)]
pub struct NexusConnectorGroup {
    connectors: Vec<Arc<NexusConnector>>,
}

impl NexusConnectorGroup {
    /// Connects every enabled connector of `config`.
    pub async fn connect(
        config: &NexusConfig,
        client: &HttpClient,
        durable: &DurableStoreRef,
        clock: &ClockRef,
        fetch_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let mut connectors = vec![];
        for connector in config.connectors.iter().filter(|c| c.enabled) {
            let connector = NexusConnector::connect(
                connector,
                &config.default_project_config,
                client.clone(),
                durable.clone(),
                clock.clone(),
                fetch_timeout,
            )
            .await
            .with_context(|| format!("failed to set up Nexus connector `{}`", connector.host))?;
            connectors.push(Arc::new(connector));
        }
        Ok(Self::from_connectors(connectors))
    }

    pub fn from_connectors(connectors: Vec<Arc<NexusConnector>>) -> Self {
        Self { connectors }
    }

    pub fn connectors(&self) -> &[Arc<NexusConnector>] {
        &self.connectors
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Merged statistics of every artifact matching `filter`.
    ///
    /// An artifact offered by several connectors is only counted once, by the first of them.
    pub async fn get_all_stats(&self, filter: &StatsFilter) -> CacheResult<AggregatedStats> {
        let mut seen = BTreeSet::new();
        let mut lookups = vec![];
        for connector in &self.connectors {
            for project in connector.projects() {
                if !filter.matches_project(project) {
                    continue;
                }
                for artifact in &project.artifacts {
                    if filter.matches_artifact(project, &artifact.name, &artifact.alias)
                        && seen.insert((project.name.as_str(), artifact.name.as_str()))
                    {
                        lookups.push(connector.get_stats(
                            project,
                            &artifact.name,
                            filter.start,
                            filter.months,
                        ));
                    }
                }
            }
        }
        tracing::debug!(artifacts = lookups.len(), "Retrieving statistics");

        let payloads = future::join_all(lookups)
            .await
            .into_iter()
            .collect::<CacheResult<Vec<_>>>()?;

        merge(&payloads).ok_or_else(|| {
            CacheError::InvalidQuery(format!("no artifact matches {}", filter.describe()))
        })
    }

    /// The latest release of a `group:artifact`.
    pub async fn get_latest_release(&self, artifact_id: &str) -> CacheResult<LatestRelease> {
        let (group, artifact) = split_pair(artifact_id, "artifact")?;
        let connector = self
            .connectors
            .iter()
            .find(|connector| {
                connector
                    .project(group)
                    .is_some_and(|project| project.artifact(artifact).is_some())
            })
            .ok_or(CacheError::NotFound)?;
        connector.get_latest_release(group, artifact).await
    }

    /// The catalog of every connector, sorted by `group:artifact`.
    pub fn project_infos(&self) -> Vec<ProjectInfo> {
        let mut rows = BTreeMap::new();
        for row in self.connectors.iter().flat_map(|c| c.project_infos()) {
            rows.entry(row[0].clone()).or_insert(row);
        }
        rows.into_values().collect()
    }

    pub fn clear_cache(&self) {
        for connector in &self.connectors {
            connector.clear_cache();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(artifact: &str, timeline: &[i64]) -> StatsPayload {
        StatsPayload {
            group_id: "org.burningwave".into(),
            artifact_id: artifact.into(),
            total: timeline.iter().sum(),
            timeline: timeline.to_vec(),
        }
    }

    #[test]
    fn test_merge_trims_leading_zeros() {
        let merged = merge(&[payload("core", &[0, 0, 5, 10]), payload("graph", &[0, 3, 3, 3])]);
        assert_eq!(
            merged,
            Some(AggregatedStats {
                total_downloads: 24,
                downloads_for_month: vec![None, Some(3), Some(8), Some(13)],
            })
        );
    }

    #[test]
    fn test_merge_keeps_inner_zeros() {
        let merged = merge(&[payload("core", &[0, 4, 0, 0, 2])]).unwrap();
        assert_eq!(
            merged.downloads_for_month,
            [None, Some(4), Some(0), Some(0), Some(2)]
        );
    }

    #[test]
    fn test_merge_uneven_timelines() {
        let merged = merge(&[payload("core", &[1, 2]), payload("graph", &[1, 2, 3])]).unwrap();
        assert_eq!(merged.downloads_for_month, [Some(2), Some(4), Some(3)]);
        assert_eq!(merged.total_downloads, 9);
    }

    #[test]
    fn test_merge_nothing() {
        assert_eq!(merge(&[]), None);

        let merged = merge(&[payload("core", &[0, 0])]).unwrap();
        assert_eq!(merged.downloads_for_month, [None, None]);
    }

    #[test]
    fn test_describe_filter() {
        assert_eq!(StatsFilter::default().describe(), "no filter");

        let filter = StatsFilter {
            group_ids: Some(["org.unknown".to_owned()].into()),
            aliases: Some(["Core".to_owned(), "Graph".to_owned()].into()),
            ..Default::default()
        };
        assert_eq!(
            filter.describe(),
            "group ids [org.unknown], aliases [Core, Graph]"
        );
    }
}
