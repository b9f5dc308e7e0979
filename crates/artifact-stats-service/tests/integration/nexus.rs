use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use artifact_stats_service::caching::CacheError;
use artifact_stats_service::caching::durable::{DurableStoreRef, MemoryStore};
use artifact_stats_service::connectors::StatsFilter;
use artifact_stats_service::types::{AggregatedStats, LatestRelease, YearMonth};

use crate::utils::{at, burningwave_upstream, clock, config, config_with, connect};

const TIMELINE: &str = "/service/local/stats/timeline";

fn set(values: &[&str]) -> Option<BTreeSet<String>> {
    Some(values.iter().map(|value| value.to_string()).collect())
}

#[tokio::test]
async fn test_aggregates_matching_artifacts() {
    artifact_stats_test::setup();
    let upstream = burningwave_upstream();
    let durable: DurableStoreRef = Arc::new(MemoryStore::default());
    let clock = clock();
    let group = connect(&config(&upstream), &durable, &clock).await.unwrap();

    let filter = StatsFilter {
        group_ids: set(&["org.burningwave"]),
        ..Default::default()
    };
    let stats = group.get_all_stats(&filter).await.unwrap();
    assert_eq!(
        stats,
        AggregatedStats {
            total_downloads: 24,
            downloads_for_month: vec![None, Some(3), Some(8), Some(13)],
        }
    );
    assert_eq!(upstream.hits(TIMELINE), 2);

    // settled until the next month
    clock.set(at(2022, 6, 28));
    assert_eq!(group.get_all_stats(&filter).await.unwrap(), stats);
    assert_eq!(upstream.hits(TIMELINE), 2);
}

#[tokio::test]
async fn test_alias_and_artifact_filters() {
    artifact_stats_test::setup();
    let upstream = burningwave_upstream();
    let durable: DurableStoreRef = Arc::new(MemoryStore::default());
    let group = connect(&config(&upstream), &durable, &clock()).await.unwrap();

    let by_alias = StatsFilter {
        aliases: set(&["Burningwave Core"]),
        ..Default::default()
    };
    let stats = group.get_all_stats(&by_alias).await.unwrap();
    assert_eq!(stats.total_downloads, 15);
    assert_eq!(stats.downloads_for_month, [None, None, Some(5), Some(10)]);

    let by_artifact = StatsFilter {
        artifact_ids: set(&["com.github.burningwave:jvm-driver", "graph"]),
        ..Default::default()
    };
    let stats = group.get_all_stats(&by_artifact).await.unwrap();
    assert_eq!(stats.total_downloads, 13);
    assert_eq!(stats.downloads_for_month, [Some(1), Some(4), Some(4), Some(4)]);
}

#[tokio::test]
async fn test_invalid_queries() {
    artifact_stats_test::setup();
    let upstream = burningwave_upstream();
    let durable: DurableStoreRef = Arc::new(MemoryStore::default());
    let group = connect(&config(&upstream), &durable, &clock()).await.unwrap();

    let unmatched = StatsFilter {
        group_ids: set(&["org.unknown"]),
        ..Default::default()
    };
    let Err(CacheError::InvalidQuery(message)) = group.get_all_stats(&unmatched).await else {
        panic!("an unmatched filter must be rejected");
    };
    assert!(message.contains("org.unknown"));

    let in_the_future = StatsFilter {
        start: YearMonth::new(2022, 7),
        ..Default::default()
    };
    assert!(matches!(
        group.get_all_stats(&in_the_future).await,
        Err(CacheError::InvalidQuery(_))
    ));
    assert_eq!(upstream.hits(TIMELINE), 0);
}

#[tokio::test]
async fn test_stale_stats_served_while_upstream_fails() {
    artifact_stats_test::setup();
    let upstream = burningwave_upstream();
    let durable: DurableStoreRef = Arc::new(MemoryStore::default());
    let clock = clock();
    let group = connect(&config(&upstream), &durable, &clock).await.unwrap();

    let stats = group.get_all_stats(&StatsFilter::default()).await.unwrap();
    assert_eq!(stats.total_downloads, 28);

    clock.set(at(2022, 8, 10));
    upstream.set_failing(true);
    assert_eq!(
        group.get_all_stats(&StatsFilter::default()).await.unwrap(),
        stats
    );
    assert_eq!(upstream.hits(TIMELINE), 6);

    upstream.set_failing(false);
    upstream.set_timeline("1", "org.burningwave", "core", &[0, 0, 5, 10, 7]);
    let refreshed = group.get_all_stats(&StatsFilter::default()).await.unwrap();
    assert_eq!(refreshed.total_downloads, 35);
    assert_eq!(
        refreshed.downloads_for_month,
        [Some(1), Some(4), Some(9), Some(14), Some(7)]
    );
}

#[tokio::test]
async fn test_member_without_cached_value_fails_aggregate() {
    artifact_stats_test::setup();
    let upstream = burningwave_upstream();
    let durable: DurableStoreRef = Arc::new(MemoryStore::default());
    let group = connect(&config(&upstream), &durable, &clock()).await.unwrap();

    let core_only = StatsFilter {
        aliases: set(&["Burningwave Core"]),
        ..Default::default()
    };
    group.get_all_stats(&core_only).await.unwrap();
    assert_eq!(upstream.hits(TIMELINE), 1);

    upstream.set_failing(true);
    assert!(matches!(
        group.get_all_stats(&StatsFilter::default()).await,
        Err(CacheError::UpstreamUnavailable(_))
    ));
    // the cached member is still served on its own
    assert_eq!(
        group.get_all_stats(&core_only).await.unwrap().total_downloads,
        15
    );
}

#[tokio::test]
async fn test_concurrent_aggregations_fetch_once() {
    artifact_stats_test::setup();
    let upstream = burningwave_upstream();
    let durable: DurableStoreRef = Arc::new(MemoryStore::default());
    let group = connect(&config(&upstream), &durable, &clock()).await.unwrap();
    upstream.set_delay(Duration::from_millis(100));

    let filter = StatsFilter::default();
    let results = futures::future::join_all((0..8).map(|_| group.get_all_stats(&filter))).await;

    for result in results {
        assert_eq!(result.unwrap().total_downloads, 28);
    }
    assert_eq!(upstream.hits(TIMELINE), 3);
}

#[tokio::test]
async fn test_host_failover() {
    artifact_stats_test::setup();
    let upstream = burningwave_upstream();
    let durable: DurableStoreRef = Arc::new(MemoryStore::default());
    // nothing listens on the discard port
    let hosts = format!("127.0.0.1:9|{}", upstream.host());
    let config = config_with(&upstream, Some(&hosts), "        []");

    let group = connect(&config, &durable, &clock()).await.unwrap();
    let connector = &group.connectors()[0];
    assert_eq!(connector.base_url().port(), upstream.url("/").port());
    assert_eq!(connector.projects().len(), 2);
}

#[tokio::test]
async fn test_restart_during_outage() {
    artifact_stats_test::setup();
    let upstream = burningwave_upstream();
    let durable: DurableStoreRef = Arc::new(MemoryStore::default());
    let config = config(&upstream);

    let group = connect(&config, &durable, &clock()).await.unwrap();
    let stats = group.get_all_stats(&StatsFilter::default()).await.unwrap();
    let infos = group.project_infos();
    drop(group);

    upstream.set_failing(true);
    let restarted = connect(&config, &durable, &clock()).await.unwrap();
    assert_eq!(restarted.project_infos(), infos);
    assert_eq!(
        restarted.get_all_stats(&StatsFilter::default()).await.unwrap(),
        stats
    );
    assert_eq!(upstream.hits(TIMELINE), 3);
}

#[tokio::test]
async fn test_unreachable_without_persisted_setup() {
    artifact_stats_test::setup();
    let upstream = burningwave_upstream();
    upstream.set_failing(true);
    let durable: DurableStoreRef = Arc::new(MemoryStore::default());

    assert!(connect(&config(&upstream), &durable, &clock()).await.is_err());
}

#[tokio::test]
async fn test_override_of_unknown_project() {
    artifact_stats_test::setup();
    let upstream = burningwave_upstream();
    let durable: DurableStoreRef = Arc::new(MemoryStore::default());
    let config = config_with(
        &upstream,
        None,
        r#"
        - name: org.unknown
          artifacts: []"#,
    );

    assert!(connect(&config, &durable, &clock()).await.is_err());
}

#[tokio::test]
async fn test_latest_release() {
    artifact_stats_test::setup();
    let upstream = burningwave_upstream();
    let durable: DurableStoreRef = Arc::new(MemoryStore::default());
    let group = connect(&config(&upstream), &durable, &clock()).await.unwrap();

    for _ in 0..3 {
        assert_eq!(
            group.get_latest_release("org.burningwave:core").await,
            Ok(LatestRelease(Some("12.62.7".into())))
        );
    }
    assert_eq!(upstream.hits("/service/local/lucene/search"), 1);

    assert_eq!(
        group.get_latest_release("org.burningwave:graph").await,
        Ok(LatestRelease(None))
    );
    assert_eq!(
        group.get_latest_release("org.burningwave:missing").await,
        Err(CacheError::NotFound)
    );
    assert!(matches!(
        group.get_latest_release("core").await,
        Err(CacheError::InvalidQuery(_))
    ));
}

#[tokio::test]
async fn test_project_infos() {
    artifact_stats_test::setup();
    let upstream = burningwave_upstream();
    let durable: DurableStoreRef = Arc::new(MemoryStore::default());
    let group = connect(&config(&upstream), &durable, &clock()).await.unwrap();

    let infos = group.project_infos();
    let ids: Vec<_> = infos.iter().map(|row| row[0].as_str()).collect();
    assert_eq!(
        ids,
        [
            "com.github.burningwave:jvm-driver",
            "org.burningwave:core",
            "org.burningwave:graph",
        ]
    );

    let [_, alias, color, site] = &infos[1];
    assert_eq!(alias, "Burningwave Core");
    assert_eq!(color, "e54d1d");
    assert_eq!(
        site,
        "https://maven-badges.herokuapp.com/maven-central/org.burningwave/core/"
    );
    assert_eq!(infos[2][1], "graph");
}

#[tokio::test]
async fn test_clear_cache_keeps_durable_entries() {
    artifact_stats_test::setup();
    let upstream = burningwave_upstream();
    let durable: DurableStoreRef = Arc::new(MemoryStore::default());
    let group = connect(&config(&upstream), &durable, &clock()).await.unwrap();

    let stats = group.get_all_stats(&StatsFilter::default()).await.unwrap();
    group.clear_cache();
    assert_eq!(
        group.get_all_stats(&StatsFilter::default()).await.unwrap(),
        stats
    );
    assert_eq!(upstream.hits(TIMELINE), 3);
}
