use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use artifact_stats_service::caching::durable::MemoryStore;
use artifact_stats_service::caching::{CacheError, Change, ChangeListener};
use artifact_stats_service::connectors::GitHubConnector;
use artifact_stats_service::utils::clock::ManualClock;
use artifact_stats_service::utils::http::HttpClient;
use artifact_stats_test::MockUpstream;

use crate::utils::{burningwave_upstream, clock, config};

fn connector(upstream: &MockUpstream, clock: &ManualClock) -> GitHubConnector {
    let config = config(upstream);
    GitHubConnector::new(
        config.github.as_ref().unwrap(),
        HttpClient::from_config(&config).unwrap(),
        Arc::new(MemoryStore::default()),
        Arc::new(clock.clone()),
        config.upstream_timeout,
    )
    .unwrap()
}

fn repositories(references: &[&str]) -> Vec<String> {
    references.iter().map(|reference| reference.to_string()).collect()
}

struct Recorder(mpsc::UnboundedSender<Change<u64>>);

impl ChangeListener<u64> for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn on_change(&self, change: Change<u64>) -> BoxFuture<'static, anyhow::Result<()>> {
        let sender = self.0.clone();
        Box::pin(async move {
            sender.send(change)?;
            Ok::<_, anyhow::Error>(())
        })
    }
}

#[tokio::test]
async fn test_star_counts_are_summed() {
    artifact_stats_test::setup();
    let upstream = burningwave_upstream();
    let github = connector(&upstream, &clock());
    let references = repositories(&["burningwave:core", "burningwave:jvm-driver"]);

    for _ in 0..3 {
        assert_eq!(github.get_all_star_count(&references).await, Ok(150));
    }
    assert_eq!(upstream.hits("/repos/burningwave/core"), 1);
    assert_eq!(upstream.hits("/repos/burningwave/jvm-driver"), 1);
}

#[tokio::test]
async fn test_repeated_repositories_are_counted_once() {
    artifact_stats_test::setup();
    let upstream = burningwave_upstream();
    let github = connector(&upstream, &clock());

    let references = repositories(&["burningwave:core", "burningwave:core"]);
    assert_eq!(github.get_all_star_count(&references).await, Ok(120));

    let references = repositories(&[
        "burningwave:jvm-driver",
        "burningwave:core",
        "burningwave:jvm-driver",
    ]);
    assert_eq!(github.get_all_star_count(&references).await, Ok(150));
    assert_eq!(upstream.hits("/repos/burningwave/core"), 1);
}

#[tokio::test]
async fn test_invalid_star_count_queries() {
    artifact_stats_test::setup();
    let upstream = burningwave_upstream();
    let github = connector(&upstream, &clock());

    assert!(matches!(
        github.get_all_star_count(&[]).await,
        Err(CacheError::InvalidQuery(_))
    ));
    assert!(matches!(
        github
            .get_all_star_count(&repositories(&["burningwave:core", "core"]))
            .await,
        Err(CacheError::InvalidQuery(_))
    ));
    assert_eq!(upstream.hits("/repos/burningwave/core"), 0);

    assert_eq!(
        github.get_star_count("burningwave", "missing").await,
        Err(CacheError::NotFound)
    );
}

#[tokio::test]
async fn test_star_counts_refresh_daily() {
    artifact_stats_test::setup();
    let upstream = burningwave_upstream();
    let clock = clock();
    let github = connector(&upstream, &clock);
    let (sender, mut receiver) = mpsc::unbounded_channel();
    github
        .star_count_cache()
        .notifier()
        .subscribe(Arc::new(Recorder(sender)));

    assert_eq!(github.get_star_count("burningwave", "core").await, Ok(120));

    upstream.set_stars("burningwave", "core", 121);
    clock.advance(TimeDelta::hours(6));
    assert_eq!(github.get_star_count("burningwave", "core").await, Ok(120));

    clock.advance(TimeDelta::days(1));
    upstream.set_failing(true);
    assert_eq!(github.get_star_count("burningwave", "core").await, Ok(120));

    upstream.set_failing(false);
    assert_eq!(github.get_star_count("burningwave", "core").await, Ok(121));
    assert_eq!(upstream.hits("/repos/burningwave/core"), 3);

    let change = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!((change.old_value, change.new_value), (120, 121));
}
