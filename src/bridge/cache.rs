//! Metadata response cache.
//!
//! Every metadata accessor of a format needs the same `properties` response,
//! and each bridge call may decode a large file. This cache keeps the non-raw
//! response per resolved source path so that a file is queried once.
//!
//! # Cache Key
//!
//! Entries are keyed by the resolved absolute path of the source file (see
//! [`resolve_key`]), so `./a.czi` and `/data/a.czi` share an entry.
//!
//! # Eviction
//!
//! The cache holds at most `capacity` entries and evicts the least recently
//! used one. With a TTL, an entry older than the TTL counts as a miss and is
//! replaced on the next fetch.
//!
//! # Concurrency
//!
//! The lock is never held while fetching. Two threads missing on the same
//! path at the same time may both call the bridge; the later insert wins.
//! Failed fetches are not cached.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::debug;

use crate::config::{BridgeConfig, DEFAULT_CACHE_CAPACITY};

use super::codec::BridgeResponse;

type Entry = (Instant, Arc<BridgeResponse>);

/// LRU cache of `properties` responses keyed by resolved path.
pub struct MetadataCache {
    entries: Mutex<LruCache<PathBuf, Entry>>,
    capacity: NonZeroUsize,
    ttl: Option<Duration>,
}

impl MetadataCache {
    /// Create a cache with the default capacity and no TTL.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY, None)
    }

    /// Create a cache holding at most `capacity` responses (minimum 1).
    pub fn with_capacity(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity,
            ttl,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::with_capacity(config.cache_capacity, config.cache_ttl())
    }

    /// Return the cached response for `key`, or run `fetch` and cache its
    /// result.
    ///
    /// `key` should come from [`resolve_key`].
    pub fn get_or_fetch<F, E>(&self, key: &Path, fetch: F) -> Result<Arc<BridgeResponse>, E>
    where
        F: FnOnce() -> Result<BridgeResponse, E>,
    {
        if let Some(response) = self.get(key) {
            debug!(path = %key.display(), "Metadata cache hit");
            return Ok(response);
        }

        debug!(path = %key.display(), "Metadata cache miss");
        let response = Arc::new(fetch()?);

        self.lock()
            .put(key.to_path_buf(), (Instant::now(), Arc::clone(&response)));
        Ok(response)
    }

    /// Get a live entry, marking it as recently used.
    pub fn get(&self, key: &Path) -> Option<Arc<BridgeResponse>> {
        let mut entries = self.lock();
        let expired = match entries.get(key) {
            Some((inserted, response)) => {
                if self.is_live(*inserted) {
                    return Some(Arc::clone(response));
                }
                true
            }
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    /// Check if a live entry exists without updating LRU order.
    pub fn contains(&self, key: &Path) -> bool {
        self.lock()
            .peek(key)
            .is_some_and(|(inserted, _)| self.is_live(*inserted))
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, expired ones included until they are touched.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn is_live(&self, inserted: Instant) -> bool {
        self.ttl.map_or(true, |ttl| inserted.elapsed() < ttl)
    }

    // A panic while holding the lock cannot leave the LRU half-updated.
    fn lock(&self) -> MutexGuard<'_, LruCache<PathBuf, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve `path` to the key used by the cache.
///
/// Existing files are canonicalized (symlinks and `..` resolved). Paths that
/// cannot be canonicalized are made absolute against the working directory.
pub fn resolve_key(path: &Path) -> PathBuf {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return resolved;
    }
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}
