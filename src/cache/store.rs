//! Cache backing stores.

use std::sync::RwLock;

use lru::LruCache;
use metrics::counter;
use time::OffsetDateTime;

use crate::domain::types::NodeId;

use super::config::CacheConfig;
use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};
use super::metadata::{CacheMetadata, MaxAge};

const SOURCE: &str = "cache::store";

/// One cached identifier set. Never mutated once stored; a fresh entry
/// replaces an expired one.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Vec<NodeId>,
    pub max_age: MaxAge,
    pub metadata: CacheMetadata,
    pub created_at: OffsetDateTime,
    /// `None` for permanent entries.
    pub expires_at: Option<OffsetDateTime>,
}

impl CacheEntry {
    pub fn new(
        key: CacheKey,
        payload: Vec<NodeId>,
        max_age: MaxAge,
        metadata: CacheMetadata,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            key,
            payload,
            max_age,
            metadata,
            created_at: now,
            expires_at: max_age.expires_at(now),
        }
    }

    pub fn is_fresh(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_none_or(|expires_at| now < expires_at)
    }

    /// Metadata to propagate to an embedding context at `now`: the stored
    /// dependencies with the entry's remaining lifetime.
    pub fn propagated_metadata(&self, now: OffsetDateTime) -> CacheMetadata {
        let mut metadata = self.metadata.clone();
        metadata.max_age = metadata
            .max_age
            .min(MaxAge::remaining(self.expires_at, now));
        metadata
    }
}

/// Backing store for the result cache. Reads and writes are synchronous and
/// keyed by the derived string key.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry>;

    fn set(&self, entry: CacheEntry);
}

/// In-process LRU backend.
pub struct MemoryCacheBackend {
    entries: RwLock<LruCache<CacheKey, CacheEntry>>,
}

impl MemoryCacheBackend {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.capacity_non_zero())),
        }
    }

    /// Drops every entry carrying `tag`. Returns how many were removed.
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "invalidate_tag");
        let doomed: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| entry.metadata.tags.contains(tag))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        rw_write(&self.entries, SOURCE, "get").get(key).cloned()
    }

    fn set(&self, entry: CacheEntry) {
        let key = entry.key.clone();
        let displaced = rw_write(&self.entries, SOURCE, "set").push(key.clone(), entry);
        // `push` also hands back the previous value when replacing `key`.
        let evicted = displaced.filter(|(displaced_key, _)| *displaced_key != key);
        if let Some((evicted_key, _)) = evicted {
            tracing::debug!(
                target = SOURCE,
                key = %evicted_key,
                "evicted random node cache entry"
            );
            counter!("tombola_result_cache_evict_total").increment(1);
        }
    }
}
