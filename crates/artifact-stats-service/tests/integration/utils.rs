use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use artifact_stats_service::caching::durable::DurableStoreRef;
use artifact_stats_service::config::Config;
use artifact_stats_service::connectors::NexusConnectorGroup;
use artifact_stats_service::utils::clock::{ClockRef, ManualClock};
use artifact_stats_service::utils::http::HttpClient;
use artifact_stats_test::MockUpstream;

/// Noon of the given day.
pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
}

/// The clock every test starts with: mid June 2022, three months after the configured start.
pub fn clock() -> ManualClock {
    ManualClock::new(at(2022, 6, 10))
}

/// An upstream knowing two Burningwave projects.
pub fn burningwave_upstream() -> MockUpstream {
    let upstream = MockUpstream::new();
    upstream.set_timeline("1", "org.burningwave", "core", &[0, 0, 5, 10]);
    upstream.set_timeline("1", "org.burningwave", "graph", &[0, 3, 3, 3]);
    upstream.set_timeline("2", "com.github.burningwave", "jvm-driver", &[1, 1, 1, 1]);
    upstream.set_latest_release("org.burningwave", "core", "12.62.7");
    upstream.set_stars("burningwave", "core", 120);
    upstream.set_stars("burningwave", "jvm-driver", 30);
    upstream
}

/// A configuration pointing every connector to `upstream`.
///
/// `hosts` replaces the Nexus host list, `projects` is appended as the connector's overrides.
pub fn config_with(upstream: &MockUpstream, hosts: Option<&str>, projects: &str) -> Config {
    let hosts = hosts.map_or_else(|| upstream.host(), str::to_owned);
    let yaml = format!(
        r#"
connect_timeout: 1s
upstream_timeout: 5s
durable_store:
  backend: memory
nexus:
  default_project_config:
    start_date: 2022-03
  connectors:
    - host: "{hosts}"
      scheme: http
      authorization:
        token:
          value: dXNlcjpwYXNz
      projects:
{projects}
github:
  host: "{github}"
  scheme: http
"#,
        github = upstream.host(),
    );
    Config::from_reader(yaml.as_bytes()).unwrap()
}

pub fn config(upstream: &MockUpstream) -> Config {
    config_with(
        upstream,
        None,
        r#"
        - name: org.burningwave
          artifacts:
            - name: core
              alias: Burningwave Core
              color: e54d1d"#,
    )
}

pub async fn connect(
    config: &Config,
    durable: &DurableStoreRef,
    clock: &ManualClock,
) -> anyhow::Result<NexusConnectorGroup> {
    let client = HttpClient::from_config(config).unwrap();
    let clock: ClockRef = Arc::new(clock.clone());
    NexusConnectorGroup::connect(
        config.nexus.as_ref().unwrap(),
        &client,
        durable,
        &clock,
        config.upstream_timeout,
    )
    .await
}
