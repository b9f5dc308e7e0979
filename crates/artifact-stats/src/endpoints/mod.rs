use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tower::ServiceBuilder;

use artifact_stats_service::config::{Config, Token};
use artifact_stats_service::connectors::{GitHubConnector, NexusConnectorGroup};
use artifact_stats_service::metric;
use artifact_stats_service::services::Services;

mod clear_cache;
mod error;
mod metrics;
mod project_info;
mod stats;

pub use error::ResponseError;
use metrics::MetricsLayer;

use clear_cache::clear_cache;
use project_info::{latest_release, project_info};
use stats::{downloads_for_month, star_count, total_downloads};

/// Everything the request handlers need.
#[derive(Debug, Clone)]
pub struct AppState {
    services: Services,
    admin_token: Option<Arc<Token>>,
}

impl AppState {
    pub fn new(services: Services, config: &Config) -> Self {
        Self {
            services,
            admin_token: config.admin_token.clone().map(Arc::new),
        }
    }

    fn nexus(&self) -> Result<&NexusConnectorGroup, ResponseError> {
        self.services
            .nexus
            .as_deref()
            .ok_or(ResponseError::disabled("Nexus connector group"))
    }

    fn github(&self) -> Result<&GitHubConnector, ResponseError> {
        self.services
            .github
            .as_deref()
            .ok_or(ResponseError::disabled("GitHub connector"))
    }
}

pub async fn healthcheck() -> &'static str {
    metric!(counter("healthcheck") += 1);
    "ok"
}

pub fn create_app(state: AppState) -> Router {
    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(MetricsLayer);

    let routes = Router::new()
        .route("/stats/total-downloads", get(total_downloads))
        .route("/stats/downloads-for-month", get(downloads_for_month))
        .route("/stats/star-count", get(star_count))
        .route("/nexus-connector/project-info", get(project_info))
        .route(
            "/nexus-connector/project-info/latest-release",
            get(latest_release),
        )
        .route("/clear-cache", get(clear_cache).post(clear_cache));

    Router::new()
        .nest("/miscellaneous-services", routes)
        .with_state(state)
        .layer(layer)
        // the healthcheck is last, as it will bypass all the middlewares
        .route("/healthcheck", get(healthcheck))
}
