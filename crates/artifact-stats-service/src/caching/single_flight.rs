use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use sentry::{Hub, SentryFutureExt};

use super::{CacheError, CacheKey, CacheResult};
use crate::utils::defer::defer;

/// Identifies one flight: the coordinator's scope plus the cache key.
///
/// Two coordinators with different scopes never share a flight, even for equal cache keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LockKey {
    scope: Arc<str>,
    key: CacheKey,
}

type FlightChannel<T> = Shared<oneshot::Receiver<CacheResult<T>>>;
type FlightMap<T> = Arc<Mutex<BTreeMap<LockKey, FlightChannel<T>>>>;

/// Deduplicates concurrent work per key.
///
/// For every key at most one computation runs at a time. Callers arriving while it runs wait
/// for it and receive a clone of its result instead of starting their own.
pub struct SingleFlight<T> {
    scope: Arc<str>,
    current_flights: FlightMap<T>,
}

impl<T> Clone for SingleFlight<T> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            current_flights: self.current_flights.clone(),
        }
    }
}

impl<T> fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlight")
            .field("scope", &self.scope)
            .field("in flight", &self.current_flights.lock().len())
            .finish()
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a coordinator whose flights are tagged with `scope`.
    pub fn new(scope: impl Into<Arc<str>>) -> Self {
        Self {
            scope: scope.into(),
            current_flights: Default::default(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Number of computations currently running.
    pub fn in_flight(&self) -> usize {
        self.current_flights.lock().len()
    }

    /// Runs `computation` for `key` unless it is already running, and returns its result.
    ///
    /// The computation is spawned as its own task, so it runs to completion even if every
    /// caller stops waiting for it.
    pub async fn run_exclusive<F, Fut>(&self, key: CacheKey, computation: F) -> CacheResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        let lock_key = LockKey {
            scope: self.scope.clone(),
            key,
        };
        let cache = lock_key.key.kind();

        let channel = {
            let mut current_flights = self.current_flights.lock();
            if let Some(channel) = current_flights.get(&lock_key) {
                // A concurrent lookup was deduplicated.
                metric!(counter("caches.flight.hit") += 1, "cache" => cache.as_ref());
                channel.clone()
            } else {
                metric!(counter("caches.flight.miss") += 1, "cache" => cache.as_ref());
                let channel = self.spawn_flight(lock_key.clone(), computation());
                current_flights.insert(lock_key, channel.clone());
                channel
            }
        };

        channel.await.unwrap_or_else(|_cancelled| {
            tracing::error!(scope = %self.scope, "{} computation channel dropped", cache);
            Err(CacheError::InternalError)
        })
    }

    fn spawn_flight<Fut>(&self, lock_key: LockKey, computation: Fut) -> FlightChannel<T>
    where
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();

        let current_flights = self.current_flights.clone();
        let remove_flight_token = defer(move || {
            current_flights.lock().remove(&lock_key);
        });

        let flight = async move {
            let result = computation.await;
            // Drop the token first to evict from the map. This ensures that callers either
            // get a channel that will receive data, or they create a new one.
            drop(remove_flight_token);
            sender.send(result).ok();
        }
        .bind_hub(Hub::new_from_top(Hub::current()));

        tokio::spawn(flight);

        receiver.shared()
    }
}
