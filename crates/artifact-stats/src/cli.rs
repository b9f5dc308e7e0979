//! Exposes the command line application.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use artifact_stats_service::config::Config;
use artifact_stats_service::metrics;
use clap::{Parser, Subcommand};

use crate::{cache, logging, server};

/// Artifact Stats commands.
#[derive(Subcommand)]
enum Command {
    /// Run the web server.
    Run,

    /// Resolve the default statistics once to populate the caches, then print the total.
    Warm,

    /// Wipe the configured durable store.
    ClearCache,
}

/// Command line interface parser.
#[derive(Parser)]
#[command(bin_name = "artifact-stats", version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: no other threads have been spawned yet.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        let mut tags = config.metrics.custom_tags.clone();
        if let Some(hostname_tag) = config.metrics.hostname_tag.clone() {
            if let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok()) {
                tags.insert(hostname_tag, hostname);
            }
        }
        if let Some(environment_tag) = config.metrics.environment_tag.clone() {
            if let Some(environment) = sentry.options().environment.as_ref() {
                tags.insert(environment_tag, environment.to_string());
            }
        }
        metrics::configure_statsd(&config.metrics.prefix, statsd.as_str(), tags)
            .context("failed to configure statsd")?;
    }

    match cli.command {
        Command::Run => server::run(config).context("failed to start the server")?,
        Command::Warm => {
            let total = cache::warm(config).context("failed to warm the caches")?;
            println!("{total}");
        }
        Command::ClearCache => cache::clear(config).context("failed to clear the caches")?,
    }

    Ok(())
}
