//! Download statistics and star counts, served through a fetch-through cache.
//!
//! The interesting part of this crate lives in [`caching`]: a tiered store with request
//! coalescing, a month-aware freshness policy and change notifications. The
//! [`connectors`] talk to the upstream services, and [`services`] wires everything
//! together from a [`config::Config`].

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod connectors;
pub mod logging;
pub mod services;
pub mod types;
pub mod utils;
