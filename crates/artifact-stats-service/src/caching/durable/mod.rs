//! The cold tier: a durable key/value store shared by every cache in the process.
//!
//! Keys are the [`durable_name`](super::CacheKey::durable_name) of a cache key, values are
//! opaque bytes. Three interchangeable backends exist:
//!
//! - [`FilesystemStore`] keeps one file per key.
//! - [`SqliteStore`] keeps one row per key.
//! - [`MemoryStore`] keeps everything in process memory, which is mostly useful for tests.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::config::{DurableBackend, DurableStoreConfig};

mod fs;
mod sqlite;

pub use fs::FilesystemStore;
pub use sqlite::SqliteStore;

/// An error from a durable store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error")]
    Io(#[from] std::io::Error),
    #[error("sqlite error")]
    Sqlite(#[from] rusqlite::Error),
    #[error("background task failed")]
    Task(#[from] tokio::task::JoinError),
}

/// The contract the caches need from durable storage.
///
/// Implementations do not have to be transactional across keys. A process is assumed to be the
/// only writer of its store.
#[async_trait]
pub trait DurableStore: fmt::Debug + Send + Sync {
    /// Returns the bytes stored under `key`, or `None` if there are none.
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stores `value` under `key`, replacing whatever was there.
    async fn store(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Removes the given keys. Missing keys are ignored.
    async fn delete(&self, keys: &[String]) -> Result<(), StoreError>;

    /// Removes everything. Clearing an empty store is not an error.
    async fn clear(&self) -> Result<(), StoreError>;
}

/// Shared handle to the configured durable store.
pub type DurableStoreRef = Arc<dyn DurableStore>;

/// Creates the durable store selected by the configuration.
pub fn from_config(config: &DurableStoreConfig) -> Result<DurableStoreRef, StoreError> {
    let store: DurableStoreRef = match config.backend {
        DurableBackend::Filesystem => Arc::new(FilesystemStore::new(config.path.clone())?),
        DurableBackend::Sqlite => Arc::new(SqliteStore::open(&config.path)?),
        DurableBackend::Memory => Arc::new(MemoryStore::default()),
    };
    tracing::info!(backend = ?config.backend, path = %config.path.display(), "Opened durable store");
    Ok(store)
}

/// A durable store that is not durable at all.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.items.lock().get(key).cloned())
    }

    async fn store(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.items.lock().insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut items = self.items.lock();
        for key in keys {
            items.remove(key);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.items.lock().clear();
        Ok(())
    }
}
