use std::time::Duration;

use thiserror::Error;

/// An error that happens when looking up or refreshing a cached value.
///
/// The enum is [`Clone`], because a single refresh hands its result to every caller that was
/// waiting on the same key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The upstream does not know the requested object.
    #[error("not found")]
    NotFound,
    /// The upstream refused the request due to missing permissions.
    ///
    /// The attached string contains the upstream's response.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The upstream did not answer within the configured timeout.
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),
    /// The upstream could not be reached or answered with a server error, and there was no
    /// cached value to fall back to.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    /// The upstream answered, but the response could not be understood.
    #[error("malformed: {0}")]
    Malformed(String),
    /// The query matched nothing or contained an invalid parameter.
    ///
    /// This is a client error and is never retried.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// Writing a freshly fetched value to the durable store failed.
    ///
    /// The value itself is still usable from memory.
    #[error("durable write failed: {0}")]
    DurableWriteFailed(String),
    /// A change listener failed.
    #[error("listener notification failed: {0}")]
    ListenerNotificationFailed(String),
    /// An unexpected error in the service itself.
    #[error("internal error")]
    InternalError,
}

impl From<std::io::Error> for CacheError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl From<serde_json::Error> for CacheError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl CacheError {
    /// Logs an unexpected error and turns it into [`InternalError`](Self::InternalError).
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

/// The result of a cache lookup.
pub type CacheResult<T> = Result<T, CacheError>;
