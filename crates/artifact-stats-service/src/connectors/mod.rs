//! Clients of the upstream services.

use crate::caching::{CacheError, CacheResult};

mod github;
mod group;
mod nexus;
mod xml;

pub use github::GitHubConnector;
pub use group::{NexusConnectorGroup, StatsFilter, merge};
pub use nexus::{Artifact, NexusConnector, Project, default_months};

/// Splits a `left:right` reference, as used for `group:artifact` and `owner:repository`.
pub fn split_pair<'a>(value: &'a str, what: &str) -> CacheResult<(&'a str, &'a str)> {
    match value.split_once(':') {
        Some((left, right)) if !left.is_empty() && !right.is_empty() && !right.contains(':') => {
            Ok((left, right))
        }
        _ => Err(CacheError::InvalidQuery(format!(
            "'{value}' is not a valid {what} reference"
        ))),
    }
}
