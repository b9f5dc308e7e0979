use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Json;
use serde::Deserialize;

use super::{AppState, ResponseError};

#[derive(Debug, Default, Deserialize)]
pub struct ClearCacheParams {
    #[serde(rename = "Authorization")]
    authorization: Option<String>,
}

/// Wipes the hot tier of every connector and the durable store.
///
/// The configured admin token is expected in the `Authorization` header or query parameter.
pub async fn clear_cache(
    State(state): State<AppState>,
    Query(params): Query<ClearCacheParams>,
    headers: HeaderMap,
) -> Result<Json<&'static str>, ResponseError> {
    let Some(admin_token) = &state.admin_token else {
        return Err((StatusCode::FORBIDDEN, "cache clearing is not enabled").into());
    };

    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let authorized = from_header
        .into_iter()
        .chain(params.authorization.as_deref())
        .any(|candidate| admin_token.matches(candidate));
    if !authorized {
        tracing::warn!("Unauthorized cache clearing attempt");
        return Err((StatusCode::UNAUTHORIZED, "unauthorized").into());
    }

    state.services.clear_cache().await?;
    Ok(Json("ok"))
}
