use std::collections::BTreeSet;

use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::Json;

use artifact_stats_service::connectors::StatsFilter;
use artifact_stats_service::types::{AggregatedStats, YearMonth};

use super::{AppState, ResponseError};

/// Query parameters of the statistics endpoints.
///
/// `groupId`, `alias`, `artifactId` and `repository` may be repeated.
#[derive(Debug, Default)]
struct StatsParams {
    filter: StatsFilter,
    repositories: Vec<String>,
}

fn insert(set: &mut Option<BTreeSet<String>>, value: String) {
    set.get_or_insert_with(BTreeSet::new).insert(value);
}

impl StatsParams {
    fn parse(query: Option<&str>) -> Result<Self, ResponseError> {
        let mut params = Self::default();
        let pairs = url::form_urlencoded::parse(query.unwrap_or_default().as_bytes());
        for (name, value) in pairs {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let filter = &mut params.filter;
            match name.as_ref() {
                "groupId" => insert(&mut filter.group_ids, value.to_owned()),
                "alias" => insert(&mut filter.aliases, value.to_owned()),
                "artifactId" => insert(&mut filter.artifact_ids, value.to_owned()),
                "startDate" => filter.start = Some(value.parse::<YearMonth>()?),
                "months" => {
                    let months = value.parse().map_err(|_| {
                        ResponseError::from((StatusCode::BAD_REQUEST, "invalid number of months"))
                    })?;
                    filter.months = Some(months);
                }
                "repository" => params.repositories.push(value.to_owned()),
                _ => {}
            }
        }
        Ok(params)
    }
}

async fn aggregate(state: &AppState, query: Option<&str>) -> Result<AggregatedStats, ResponseError> {
    let params = StatsParams::parse(query)?;
    Ok(state.nexus()?.get_all_stats(&params.filter).await?)
}

pub async fn total_downloads(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<i64>, ResponseError> {
    let stats = aggregate(&state, query.as_deref()).await?;
    Ok(Json(stats.total_downloads))
}

pub async fn downloads_for_month(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<Vec<Option<i64>>>, ResponseError> {
    let stats = aggregate(&state, query.as_deref()).await?;
    Ok(Json(stats.downloads_for_month))
}

pub async fn star_count(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<u64>, ResponseError> {
    let params = StatsParams::parse(query.as_deref())?;
    let github = state.github()?;
    Ok(Json(github.get_all_star_count(&params.repositories).await?))
}
