use std::sync::Arc;

use artifact_stats_service::caching::durable::{DurableStoreRef, MemoryStore};
use artifact_stats_service::config::Config;
use artifact_stats_service::connectors::StatsFilter;
use artifact_stats_service::services::Services;

use crate::utils::{burningwave_upstream, clock, config};

#[tokio::test]
async fn test_clear_cache_wipes_both_tiers() {
    artifact_stats_test::setup();
    let upstream = burningwave_upstream();
    let store = Arc::new(MemoryStore::default());
    let durable: DurableStoreRef = store.clone();
    let services =
        Services::with_durable_store(&config(&upstream), Arc::new(clock()), durable)
            .await
            .unwrap();

    let nexus = services.nexus.as_ref().unwrap();
    let github = services.github.as_ref().unwrap();
    nexus.get_all_stats(&StatsFilter::default()).await.unwrap();
    github.get_star_count("burningwave", "core").await.unwrap();
    assert!(!store.is_empty());

    services.clear_cache().await.unwrap();
    assert!(store.is_empty());
    // clearing twice is fine
    services.clear_cache().await.unwrap();

    nexus.get_all_stats(&StatsFilter::default()).await.unwrap();
    github.get_star_count("burningwave", "core").await.unwrap();
    assert_eq!(upstream.hits("/service/local/stats/timeline"), 6);
    assert_eq!(upstream.hits("/repos/burningwave/core"), 2);
}

#[tokio::test]
async fn test_disabled_connectors() {
    artifact_stats_test::setup();
    let yaml = r#"
        durable_store:
          backend: memory
        nexus:
          connectors:
            - host: nexus.example.com
              enabled: false
              authorization:
                token:
                  value: secret
        github:
          enabled: false
    "#;
    let config = Config::from_reader(yaml.as_bytes()).unwrap();
    let services = Services::create(&config, Arc::new(clock())).await.unwrap();

    assert!(services.nexus.is_none());
    assert!(services.github.is_none());
    services.clear_cache().await.unwrap();
}

#[tokio::test]
async fn test_nothing_configured() {
    artifact_stats_test::setup();
    let config = Config::from_reader("durable_store: {backend: memory}".as_bytes()).unwrap();
    let services = Services::create(&config, Arc::new(clock())).await.unwrap();

    assert!(services.nexus.is_none());
    assert!(services.github.is_none());
}
