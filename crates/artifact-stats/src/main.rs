//! Artifact Stats.
//!
//! A small web service reporting download statistics of Maven artifacts and star counts of
//! GitHub repositories. Every upstream answer goes through a fetch-through cache, so the service
//! keeps answering while an upstream is slow or down.

#![warn(missing_debug_implementations, clippy::all)]

mod cache;
mod cli;
mod endpoints;
mod logging;
mod server;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
