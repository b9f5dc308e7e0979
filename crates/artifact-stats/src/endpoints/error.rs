use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sentry::integrations::anyhow::capture_anyhow;
use serde::{Deserialize, Serialize};

use artifact_stats_service::caching::CacheError;

#[derive(Debug)]
pub struct ResponseError {
    status: StatusCode,
    err: anyhow::Error,
}

impl ResponseError {
    /// The answer for a connector that is not configured or not enabled.
    pub fn disabled(what: &'static str) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            err: anyhow::anyhow!("{what} is disabled"),
        }
    }

    #[cfg(test)]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<CacheError> for ResponseError {
    fn from(err: CacheError) -> Self {
        let status = match err {
            CacheError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            CacheError::NotFound => StatusCode::NOT_FOUND,
            CacheError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CacheError::PermissionDenied(_)
            | CacheError::UpstreamUnavailable(_)
            | CacheError::Malformed(_) => StatusCode::BAD_GATEWAY,
            CacheError::DurableWriteFailed(_)
            | CacheError::ListenerNotificationFailed(_)
            | CacheError::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            err: err.into(),
        }
    }
}

impl From<(StatusCode, &'static str)> for ResponseError {
    fn from((code, msg): (StatusCode, &'static str)) -> Self {
        Self {
            status: code,
            err: anyhow::anyhow!(msg),
        }
    }
}

impl IntoResponse for ResponseError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            capture_anyhow(&self.err);
        }
        let mut response = Json(ApiErrorResponse::from(self.err)).into_response();
        *response.status_mut() = self.status;
        response
    }
}

/// An error response from an api.
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct ApiErrorResponse {
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causes: Option<Vec<String>>,
}

impl From<anyhow::Error> for ApiErrorResponse {
    fn from(err: anyhow::Error) -> Self {
        let mut chain = err.chain().map(|err| err.to_string());
        let detail = chain.next();
        let causes: Vec<_> = chain.collect();
        let causes = if causes.is_empty() {
            None
        } else {
            Some(causes)
        };

        ApiErrorResponse { detail, causes }
    }
}
