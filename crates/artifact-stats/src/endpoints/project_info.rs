use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;

use artifact_stats_service::types::{LatestRelease, ProjectInfo};

use super::{AppState, ResponseError};

pub async fn project_info(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProjectInfo>>, ResponseError> {
    Ok(Json(state.nexus()?.project_infos()))
}

#[derive(Debug, Deserialize)]
pub struct LatestReleaseParams {
    #[serde(rename = "artifactId")]
    artifact_id: String,
}

pub async fn latest_release(
    State(state): State<AppState>,
    Query(params): Query<LatestReleaseParams>,
) -> Result<Json<LatestRelease>, ResponseError> {
    let nexus = state.nexus()?;
    Ok(Json(nexus.get_latest_release(&params.artifact_id).await?))
}
