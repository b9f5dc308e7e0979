use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::caching::{CacheError, CacheResult};
use crate::config::Config;

static USER_AGENT: &str = concat!("artifact-stats/", env!("CARGO_PKG_VERSION"));

/// A [`reqwest::Client`] that turns every failure into a [`CacheError`].
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpClient {
    /// Creates a client with the connect and upstream timeouts of `config`.
    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        Self::new(config.connect_timeout, config.upstream_timeout)
    }

    pub fn new(connect_timeout: Duration, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .gzip(true)
            .user_agent(USER_AGENT)
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, timeout })
    }

    /// Starts a `GET` request, optionally with an `Authorization` header.
    pub fn get(&self, url: url::Url, authorization: Option<&str>) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match authorization {
            Some(value) => request.header(reqwest::header::AUTHORIZATION, value),
            None => request,
        }
    }

    /// Sends `request` and returns the body of a successful response.
    pub async fn fetch_text(
        &self,
        request: reqwest::RequestBuilder,
        source: &str,
    ) -> CacheResult<String> {
        let response = request
            .send()
            .await
            .map_err(|err| self.transport_error(source, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_for_status(source, status));
        }
        tracing::trace!("Success hitting `{source}`");

        response
            .text()
            .await
            .map_err(|err| self.transport_error(source, err))
    }

    /// Sends `request` and parses the body of a successful response as JSON.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        source: &str,
    ) -> CacheResult<T> {
        let body = self.fetch_text(request, source).await?;
        serde_json::from_str(&body).map_err(|err| {
            tracing::debug!("Unexpected response from `{source}`: {err}");
            CacheError::Malformed(format!("{source}: {err}"))
        })
    }

    fn transport_error(&self, source: &str, err: reqwest::Error) -> CacheError {
        if err.is_timeout() {
            tracing::debug!("Request to `{source}` timed out");
            return CacheError::Timeout(self.timeout);
        }
        tracing::debug!("Failed to reach `{source}`: {err}");
        match err.status() {
            Some(status) => error_for_status(source, status),
            None => CacheError::UpstreamUnavailable(format!("{source}: {err}")),
        }
    }
}

/// Infers a [`CacheError`] from the status code of a failed response.
pub fn error_for_status(source: &str, status: StatusCode) -> CacheError {
    debug_assert!(!status.is_success());

    if matches!(status, StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED) {
        tracing::debug!("Insufficient permissions to query `{source}`: {status}");
        CacheError::PermissionDenied(status.to_string())
    } else if status == StatusCode::NOT_FOUND {
        CacheError::NotFound
    } else {
        tracing::debug!("Unexpected status code from `{source}`: {status}");
        CacheError::UpstreamUnavailable(format!("{source}: {status}"))
    }
}
