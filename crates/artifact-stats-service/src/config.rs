use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

use crate::types::YearMonth;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A tag name to report the hostname to, for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
    /// A tag name to report the environment to, for each metric. Defaults to not sending such a tag.
    pub environment_tag: Option<String>,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "artifact_stats".into(),
            hostname_tag: None,
            environment_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Which backend keeps the durable cache tier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurableBackend {
    /// One file per entry below `path`.
    Filesystem,
    /// One row per entry in the SQLite database at `path`.
    Sqlite,
    /// Nothing survives a restart.
    Memory,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct DurableStoreConfig {
    pub backend: DurableBackend,
    /// Directory or database file, depending on the backend.
    pub path: PathBuf,
}

impl Default for DurableStoreConfig {
    fn default() -> Self {
        Self {
            backend: DurableBackend::Filesystem,
            path: PathBuf::from("./cache"),
        }
    }
}

/// A credential sent as `Authorization: {type} {value}`.
#[derive(Clone, Eq, PartialEq, Deserialize)]
pub struct Token {
    #[serde(rename = "type", default = "default_token_type")]
    pub kind: String,
    pub value: String,
}

impl Token {
    /// The value of the `Authorization` header.
    pub fn header_value(&self) -> String {
        format!("{} {}", self.kind, self.value)
    }

    /// Whether `candidate` is this token, with or without its type.
    pub fn matches(&self, candidate: &str) -> bool {
        let candidate = candidate.trim();
        candidate == self.value || candidate == self.header_value()
    }
}

// Never print credentials.
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("kind", &self.kind)
            .field("value", &"[redacted]")
            .finish()
    }
}

fn default_token_type() -> String {
    "Basic".into()
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct Authorization {
    pub token: Token,
}

/// Applied to every project of every Nexus connector.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct DefaultProjectConfig {
    /// The first month of the default statistics window.
    pub start_date: YearMonth,
}

impl Default for DefaultProjectConfig {
    fn default() -> Self {
        Self {
            start_date: YearMonth::STATS_EPOCH,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct NexusCacheConfig {
    /// How long a statistics entry is served without asking the upstream.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// From this day of the month on, last month's statistics count as settled.
    pub day_of_month_from_which_to_leave: u32,
}

impl Default for NexusCacheConfig {
    fn default() -> Self {
        Self {
            ttl: 30 * DAY,
            day_of_month_from_which_to_leave: 5,
        }
    }
}

/// Replaces catalog metadata of some artifacts of a project.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct ProjectOverride {
    pub name: String,
    #[serde(default)]
    pub artifacts: Vec<ArtifactOverride>,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct ArtifactOverride {
    pub name: String,
    pub alias: Option<String>,
    pub color: Option<String>,
    pub site: Option<String>,
}

/// One Nexus host and the credentials to talk to it.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct NexusConnectorConfig {
    /// One host, or several alternatives separated by `|`.
    pub host: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub cache: NexusCacheConfig,
    pub authorization: Authorization,
    #[serde(default)]
    pub projects: Vec<ProjectOverride>,
}

impl NexusConnectorConfig {
    /// The configured host alternatives, in order.
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.host
            .split('|')
            .map(str::trim)
            .filter(|host| !host.is_empty())
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct NexusConfig {
    pub default_project_config: DefaultProjectConfig,
    pub connectors: Vec<NexusConnectorConfig>,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct GitHubCacheConfig {
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for GitHubCacheConfig {
    fn default() -> Self {
        Self { ttl: DAY }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub enabled: bool,
    pub host: String,
    pub scheme: String,
    /// Anonymous requests are heavily rate limited.
    pub authorization: Option<Authorization>,
    pub cache: GitHubCacheConfig,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "api.github.com".into(),
            scheme: default_scheme(),
            authorization: None,
            cache: GitHubCacheConfig::default(),
        }
    }
}

fn default_scheme() -> String {
    "https".into()
}

fn default_enabled() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host and port to bind the HTTP webserver to.
    pub bind: String,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// The timeout for establishing a connection to an upstream.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// The maximum time a single upstream call may take, including reading the response.
    #[serde(with = "humantime_serde")]
    pub upstream_timeout: Duration,

    /// Where cache entries are persisted.
    pub durable_store: DurableStoreConfig,

    /// The credential expected by the cache-clear endpoint.
    ///
    /// Without one, the endpoint refuses every request.
    pub admin_token: Option<Token>,

    /// Download statistics. Disabled if absent.
    pub nexus: Option<NexusConfig>,

    /// Star counts. Disabled if absent.
    pub github: Option<GitHubConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1:3021".to_owned(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            connect_timeout: Duration::from_secs(5),
            upstream_timeout: Duration::from_secs(30),
            durable_store: DurableStoreConfig::default(),
            admin_token: None,
            nexus: None,
            github: None,
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    pub fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
