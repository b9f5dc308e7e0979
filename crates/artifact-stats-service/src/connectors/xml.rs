//! The XML dialect of the Nexus statistics API.
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::caching::{CacheError, CacheResult};
use crate::types::{LatestRelease, StatsPayload};

static LATEST_RELEASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<latestRelease>(.*?)</latestRelease>").unwrap());

/// A project as listed by `/service/local/stats/projects`.
///
/// `id` is the numeric project id, `name` is the Maven group id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatsProject {
    pub id: String,
    pub name: String,
}

/// `<statsProjectListResp>`
#[derive(Debug, Deserialize)]
struct ProjectListResponse {
    data: ProjectListData,
}

#[derive(Debug, Default, Deserialize)]
struct ProjectListData {
    #[serde(rename = "statsProject", default)]
    projects: Vec<StatsProject>,
}

/// `<statsCoordResp>`
#[derive(Debug, Deserialize)]
struct CoordResponse {
    data: CoordData,
}

#[derive(Debug, Default, Deserialize)]
struct CoordData {
    #[serde(rename = "coord", default)]
    artifacts: Vec<String>,
}

/// `<statsTimelineResp>`
#[derive(Debug, Deserialize)]
struct TimelineResponse {
    data: TimelineData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimelineData {
    group_id: String,
    artifact_id: String,
    total: i64,
    #[serde(default)]
    timeline: Timeline,
}

#[derive(Debug, Default, Deserialize)]
struct Timeline {
    #[serde(rename = "int", default)]
    values: Vec<i64>,
}

fn parse<T: DeserializeOwned>(body: &str, what: &str) -> CacheResult<T> {
    quick_xml::de::from_str(body).map_err(|err| {
        tracing::debug!("Failed to parse {what}: {err}");
        CacheError::Malformed(format!("{what}: {err}"))
    })
}

pub fn parse_projects(body: &str) -> CacheResult<Vec<StatsProject>> {
    let response: ProjectListResponse = parse(body, "project list")?;
    Ok(response.data.projects)
}

pub fn parse_artifacts(body: &str) -> CacheResult<Vec<String>> {
    let response: CoordResponse = parse(body, "artifact list")?;
    Ok(response.data.artifacts)
}

pub fn parse_timeline(body: &str) -> CacheResult<StatsPayload> {
    let response: TimelineResponse = parse(body, "timeline")?;
    let data = response.data;
    Ok(StatsPayload {
        group_id: data.group_id,
        artifact_id: data.artifact_id,
        total: data.total,
        timeline: data.timeline.values,
    })
}

/// Picks the first `<latestRelease>` out of a search response.
///
/// The rest of the response is of no interest, so it is not parsed at all.
pub fn parse_latest_release(body: &str) -> LatestRelease {
    let version = LATEST_RELEASE
        .captures(body)
        .and_then(|captures| captures.get(1))
        .map(|version| version.as_str().trim().to_owned())
        .filter(|version| !version.is_empty());
    LatestRelease(version)
}
