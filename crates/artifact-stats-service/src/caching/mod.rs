//! # Caching infrastructure
//!
//! Upstream statistics services are slow, rate limited and not always reachable. Every value
//! this service hands out therefore goes through a [`FetchThroughCache`], which only asks the
//! upstream when it has no fresh enough value of its own.
//!
//! ## Cache Layers
//!
//! A lookup goes through the following steps:
//!
//! - First, it goes through the in-memory (hot) layer of the cache.
//! - On miss, it tries to load the entry from the [`durable`] (cold) layer, which is shared by
//!   every cache in the process and survives restarts. A hit is promoted into the hot layer.
//! - If the entry found is fresh according to the cache's [`FreshnessPolicy`], it is returned.
//! - Otherwise a refresh is started. Concurrent lookups of the same key wait for the same
//!   refresh instead of starting their own ([`SingleFlight`]).
//! - If the refresh fails and an older entry exists, the older entry is returned. Without an
//!   older entry the error is returned.
//! - A successful refresh is written to the hot layer, and unless the policy decides otherwise,
//!   to the durable layer too. Listeners registered on the cache's [`ChangeNotifier`] hear about
//!   values that actually changed.
//!
//! ### Metrics
//!
//! Each of these metrics is tagged with a `cache` field corresponding to the [`CacheKind`]:
//!
//! - `caches.access`: All accesses.
//! - `caches.memory.hit`: Accesses served by the in-memory layer.
//! - `caches.durable.hit`: Accesses served by the durable layer.
//! - `caches.flight.hit` / `caches.flight.miss`: Refreshes that were joined or started.
//! - `caches.fetch`: Time spent asking the upstream.
//! - `caches.fetch.failed`: Refreshes that failed without an older entry to fall back to.
//! - `caches.stale_fallback`: Refreshes that failed and were answered with an older entry.
//! - `caches.durable.size`: A histogram of the size of persisted entries, in bytes.
//! - `caches.durable.write_failed`: Entries that could not be persisted.
//! - `caches.listener.failed`: Change listeners that returned an error or panicked.
//!
//! ### Configuration
//!
//! The durable layer is selected by `durable_store` in the configuration. The freshness window
//! of each cache comes from the configuration of the connector that owns it.
//!
//! ## [`CacheKey`]
//!
//! The [`CacheKey`] is used both as the key for the in-memory layer and as the name of the
//! entry in the durable layer. It contains human-readable metadata describing the query, which
//! is SHA256-hashed to form the durable name.
//!
//! **NOTE**: Care must be taken to make sure that this metadata is stable, as it would otherwise
//! lead to bad cache reuse.

mod cache_error;
mod cache_key;
pub mod durable;
mod fetch_through;
pub mod freshness;
mod notifier;
mod single_flight;
mod tiered;

pub use cache_error::{CacheError, CacheResult};
pub use cache_key::{CacheKey, CacheKeyBuilder, CacheKind, KEY_VERSION};
pub use fetch_through::FetchThroughCache;
pub use freshness::{Decision, FreshnessPolicy};
pub use notifier::{Change, ChangeListener, ChangeNotifier, LoggingListener};
pub use single_flight::{LockKey, SingleFlight};
pub use tiered::{CacheEntry, TieredStore};
