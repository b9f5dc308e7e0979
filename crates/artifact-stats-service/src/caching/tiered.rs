use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::durable::DurableStoreRef;
use super::{CacheError, CacheKey};

/// A cached value together with the instant it counts as observed.
///
/// `observed_at` is not necessarily the wall-clock time of the fetch: the freshness policy may
/// move it to steer when the value is due again. Entries are never mutated; a refresh produces
/// a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    pub observed_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, observed_at: DateTime<Utc>) -> Self {
        Self { value, observed_at }
    }
}

type HotTier<T> = moka::sync::Cache<CacheKey, CacheEntry<T>>;

/// An in-memory map layered over the shared durable store.
///
/// The hot tier belongs to one cache instance, the cold tier is shared between all of them.
/// The hot tier is unbounded; entries only leave it through [`clear_hot`](Self::clear_hot) or
/// [`clear_all`](Self::clear_all).
pub struct TieredStore<T> {
    hot: HotTier<T>,
    cold: DurableStoreRef,
}

impl<T: Clone + Send + Sync + 'static> Clone for TieredStore<T> {
    fn clone(&self) -> Self {
        Self {
            hot: self.hot.clone(),
            cold: self.cold.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> fmt::Debug for TieredStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredStore")
            .field("hot entries", &self.hot.entry_count())
            .field("cold", &self.cold)
            .finish()
    }
}

impl<T> TieredStore<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(cold: DurableStoreRef) -> Self {
        Self {
            hot: HotTier::builder().build(),
            cold,
        }
    }

    /// Looks at the hot tier only.
    pub fn peek_hot(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        self.hot.get(key)
    }

    /// Looks the entry up in the hot tier, then in the cold tier.
    ///
    /// A cold hit is promoted into the hot tier. Failures reading or decoding the cold tier are
    /// logged and treated like a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        if let Some(entry) = self.hot.get(key) {
            metric!(counter("caches.memory.hit") += 1, "cache" => key.kind().as_ref());
            return Some(entry);
        }

        let bytes = match self.cold.load(&key.durable_name()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    key = %key,
                    "Failed to read from durable store"
                );
                return None;
            }
        };

        let entry: CacheEntry<T> = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    key = %key,
                    "Discarding undecodable durable entry"
                );
                return None;
            }
        };

        metric!(counter("caches.durable.hit") += 1, "cache" => key.kind().as_ref());
        // Another caller might have stored something newer in the meantime.
        let entry = self
            .hot
            .entry(key.clone())
            .or_insert(entry)
            .into_value();
        Some(entry)
    }

    /// Stores an entry in the hot tier and, if `persist` is set, in the cold tier.
    ///
    /// The hot tier is always updated, even if the durable write fails. That failure is
    /// reported as [`CacheError::DurableWriteFailed`].
    pub async fn put(
        &self,
        key: &CacheKey,
        entry: CacheEntry<T>,
        persist: bool,
    ) -> Result<(), CacheError> {
        let bytes = if persist {
            Some(serde_json::to_vec(&entry)?)
        } else {
            None
        };

        self.hot.insert(key.clone(), entry);

        if let Some(bytes) = bytes {
            metric!(histogram("caches.durable.size") = bytes.len() as u64, "cache" => key.kind().as_ref());
            self.cold
                .store(&key.durable_name(), &bytes)
                .await
                .map_err(|err| {
                    let mut message = err.to_string();
                    if let Some(source) = std::error::Error::source(&err) {
                        message = format!("{message}: {source}");
                    }
                    CacheError::DurableWriteFailed(message)
                })?;
        }
        Ok(())
    }

    /// Discards the hot tier only.
    pub fn clear_hot(&self) {
        self.hot.invalidate_all();
    }

    /// Discards the hot tier and wipes the cold tier.
    ///
    /// This is an administrative reset: no change notifications are emitted.
    pub async fn clear_all(&self) -> Result<(), CacheError> {
        self.clear_hot();
        self.cold.clear().await.map_err(CacheError::from_std_error)
    }
}
