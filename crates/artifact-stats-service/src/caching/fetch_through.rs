use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::durable::DurableStoreRef;
use super::freshness::FreshnessPolicy;
use super::{CacheEntry, CacheError, CacheKey, CacheResult, ChangeNotifier, SingleFlight, TieredStore};
use crate::utils::clock::ClockRef;

/// A cache that fetches missing or stale values from an upstream on demand.
///
/// Lookups go through the hot tier, then the durable tier. When no fresh entry is found, one
/// refresh per key is started and shared by everyone asking for that key meanwhile. If the
/// refresh fails while an older entry exists, that entry is served instead of the error.
pub struct FetchThroughCache<P: FreshnessPolicy> {
    store: TieredStore<P::Value>,
    flights: SingleFlight<P::Value>,
    policy: Arc<P>,
    notifier: ChangeNotifier<P::Value>,
    clock: ClockRef,
    fetch_timeout: Duration,
}

impl<P: FreshnessPolicy> Clone for FetchThroughCache<P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            flights: self.flights.clone(),
            policy: self.policy.clone(),
            notifier: self.notifier.clone(),
            clock: self.clock.clone(),
            fetch_timeout: self.fetch_timeout,
        }
    }
}

impl<P: FreshnessPolicy> fmt::Debug for FetchThroughCache<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchThroughCache")
            .field("store", &self.store)
            .field("flights", &self.flights)
            .field("window", &self.policy.window())
            .field("fetch_timeout", &self.fetch_timeout)
            .finish()
    }
}

impl<P: FreshnessPolicy> FetchThroughCache<P> {
    /// Creates a cache on top of the shared durable store.
    ///
    /// `scope` separates the in-flight refreshes of this cache from those of other caches.
    pub fn new(
        scope: impl Into<Arc<str>>,
        cold: DurableStoreRef,
        policy: P,
        clock: ClockRef,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            store: TieredStore::new(cold),
            flights: SingleFlight::new(scope),
            policy: Arc::new(policy),
            notifier: ChangeNotifier::default(),
            clock,
            fetch_timeout,
        }
    }

    /// The listeners of this cache.
    pub fn notifier(&self) -> &ChangeNotifier<P::Value> {
        &self.notifier
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Returns the cached value for `key`, refreshing it through `fetch` if it is missing or
    /// stale.
    ///
    /// `query` is handed to the freshness policy once a value was fetched. `fetch` is only
    /// called by the caller that starts the refresh; everybody else shares its outcome.
    pub async fn get_or_refresh<F, Fut>(
        &self,
        key: CacheKey,
        query: P::Query,
        fetch: F,
    ) -> CacheResult<P::Value>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<P::Value>> + Send + 'static,
    {
        metric!(counter("caches.access") += 1, "cache" => key.kind().as_ref());

        if let Some(entry) = self.store.get(&key).await {
            if self.policy.is_fresh(self.clock.now(), &entry) {
                return Ok(entry.value);
            }
        }

        let this = self.clone();
        let flight_key = key.clone();
        self.flights
            .run_exclusive(key, move || this.refresh(flight_key, query, fetch))
            .await
    }

    async fn refresh<F, Fut>(self, key: CacheKey, query: P::Query, fetch: F) -> CacheResult<P::Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<P::Value>>,
    {
        let cache = key.kind();

        // A refresh that finished just before this one was started may have made it moot.
        let old = self.store.get(&key).await;
        if let Some(old) = &old {
            if self.policy.is_fresh(self.clock.now(), old) {
                return Ok(old.value.clone());
            }
        }

        let started = Instant::now();
        let fetched = match tokio::time::timeout(self.fetch_timeout, fetch()).await {
            Ok(result) => result,
            Err(_elapsed) => Err(CacheError::Timeout(self.fetch_timeout)),
        };
        metric!(timer("caches.fetch") = started.elapsed(), "cache" => cache.as_ref());

        let value = match fetched {
            Ok(value) => value,
            Err(err) => {
                let Some(old) = old else {
                    metric!(counter("caches.fetch.failed") += 1, "cache" => cache.as_ref());
                    return Err(err);
                };
                metric!(counter("caches.stale_fallback") += 1, "cache" => cache.as_ref());
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    key = %key,
                    observed_at = %old.observed_at,
                    "Refresh failed, serving stale value"
                );
                return Ok(old.value);
            }
        };

        let decision = self
            .policy
            .decide(self.clock.now(), old.as_ref(), &value, &query);
        // observed_at never moves backwards for a key
        let effective_at = match &old {
            Some(old) => decision.effective_at.max(old.observed_at),
            None => decision.effective_at,
        };

        let entry = CacheEntry::new(value.clone(), effective_at);
        if let Err(err) = self.store.put(&key, entry, decision.persist).await {
            metric!(counter("caches.durable.write_failed") += 1, "cache" => cache.as_ref());
            tracing::error!(
                error = &err as &dyn std::error::Error,
                key = %key,
                "Failed to persist refreshed value"
            );
        }

        if decision.notify {
            if let Some(old) = &old {
                self.notifier.notify(&key, &value, &old.value);
            }
        }

        Ok(value)
    }

    /// Forgets the in-memory entries, keeping the durable ones.
    pub fn clear_hot(&self) {
        self.store.clear_hot();
    }

    /// Forgets every entry, including the durable ones of every cache sharing the store.
    ///
    /// Refreshes that are in flight are not interrupted and may store their result afterwards.
    pub async fn clear_all(&self) -> CacheResult<()> {
        self.store.clear_all().await
    }
}
