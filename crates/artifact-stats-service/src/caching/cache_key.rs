use std::fmt::{self, Write};
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// The version of the durable key layout.
///
/// Bumping this makes every previously persisted entry unreachable.
pub const KEY_VERSION: u32 = 1;

/// The kind of value a [`CacheKey`] points to.
///
/// This is the first thing written into every key, so keys of different kinds never collide
/// even if the rest of their metadata happens to be identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheKind {
    Stats,
    StarCount,
    LatestRelease,
    Catalog,
}

impl AsRef<str> for CacheKind {
    fn as_ref(&self) -> &str {
        match self {
            Self::Stats => "stats",
            Self::StarCount => "star-count",
            Self::LatestRelease => "latest-release",
            Self::Catalog => "catalog",
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Identifies one logical query across restarts.
///
/// The key is built from human-readable, stable metadata which is then hashed. Equality,
/// ordering and hashing only look at the hash.
#[derive(Debug, Clone, Eq)]
pub struct CacheKey {
    kind: CacheKind,
    metadata: Arc<str>,
    hash: [u8; 32],
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.durable_name())
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl PartialOrd for CacheKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CacheKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.hash.cmp(&other.hash)
    }
}

impl std::hash::Hash for CacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl CacheKey {
    /// Create a [`CacheKeyBuilder`] for a key of the given kind.
    pub fn builder(kind: CacheKind) -> CacheKeyBuilder {
        CacheKeyBuilder {
            kind,
            metadata: format!("kind: {kind}\n"),
        }
    }

    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    /// Returns the human-readable metadata that forms the basis of the [`CacheKey`].
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// Returns the relative path for this cache key.
    ///
    /// The relative path is a sha-256 hash hex-formatted like so:
    /// `v$version/aa/bbccdd/eeff...`
    pub fn cache_path(&self, version: u32) -> String {
        let mut path = format!("v{version}/{:02x}/", self.hash[0]);
        for b in &self.hash[1..4] {
            let _ = write!(path, "{b:02x}");
        }
        path.push('/');
        for b in &self.hash[4..] {
            let _ = write!(path, "{b:02x}");
        }
        path
    }

    /// The name under which this key is kept in the durable store.
    pub fn durable_name(&self) -> String {
        self.cache_path(KEY_VERSION)
    }

    #[cfg(test)]
    pub fn for_testing(key: impl Into<String>) -> Self {
        let mut builder = Self::builder(CacheKind::Stats);
        builder.metadata.push_str(&key.into());
        builder.build()
    }
}

/// A builder for [`CacheKey`]s.
///
/// This builder implements the [`Write`](std::fmt::Write) trait, and the intention of it is to
/// accept human readable, but most importantly **stable**, input.
pub struct CacheKeyBuilder {
    kind: CacheKind,
    metadata: String,
}

impl CacheKeyBuilder {
    /// Appends a `name: value` line.
    pub fn field(mut self, name: &str, value: impl fmt::Display) -> Self {
        let _ = writeln!(self.metadata, "{name}: {value}");
        self
    }

    /// Finalize the [`CacheKey`].
    pub fn build(self) -> CacheKey {
        let hash: [u8; 32] = Sha256::digest(&self.metadata).into();

        CacheKey {
            kind: self.kind,
            metadata: self.metadata.into(),
            hash,
        }
    }
}

impl fmt::Write for CacheKeyBuilder {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.metadata.write_str(s)
    }
}
