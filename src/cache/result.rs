//! Get-or-compute cache for sampled identifier sets.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, error};

use crate::domain::draw::SampledRecordSet;

use super::config::CacheConfig;
use super::keys::CacheKey;
use super::metadata::{CacheMetadata, MaxAge};
use super::store::{CacheBackend, CacheEntry};

const SOURCE: &str = "cache::result::ResultCache";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to init the random nodes cache for `{key}`: {message}")]
    InitFailed { key: CacheKey, message: String },
}

/// Outcome of a successful lookup.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub entry: CacheEntry,
    pub hit: bool,
    /// Dependencies the embedding context must absorb; max-age is the
    /// entry's remaining lifetime.
    pub metadata: CacheMetadata,
}

impl CacheLookup {
    pub fn ids(&self) -> &[crate::domain::types::NodeId] {
        &self.entry.payload
    }
}

/// Caches sampled identifier sets under keys derived from caller partition
/// keys.
///
/// Concurrent misses on the same key may both compute; the last write wins.
#[derive(Clone)]
pub struct ResultCache {
    backend: Arc<dyn CacheBackend>,
    enabled: bool,
}

impl ResultCache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            enabled: config.enabled,
        }
    }

    pub async fn get_or_compute<F, Fut, E>(
        &self,
        keys: &[String],
        max_age: MaxAge,
        caller_metadata: &CacheMetadata,
        compute: F,
    ) -> Result<CacheLookup, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SampledRecordSet, E>>,
        E: Display,
    {
        self.get_or_compute_at(
            OffsetDateTime::now_utc(),
            keys,
            max_age,
            caller_metadata,
            compute,
        )
        .await
    }

    /// Same as [`ResultCache::get_or_compute`] with an explicit clock reading.
    pub async fn get_or_compute_at<F, Fut, E>(
        &self,
        now: OffsetDateTime,
        keys: &[String],
        max_age: MaxAge,
        caller_metadata: &CacheMetadata,
        compute: F,
    ) -> Result<CacheLookup, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SampledRecordSet, E>>,
        E: Display,
    {
        let key = CacheKey::derive(keys);
        let max_age = if self.enabled && max_age.is_cacheable() {
            max_age
        } else {
            MaxAge::Uncacheable
        };

        if max_age.is_cacheable() {
            if let Some(entry) = self.backend.get(&key).filter(|entry| entry.is_fresh(now)) {
                counter!("tombola_result_cache_hit_total").increment(1);
                debug!(target = SOURCE, key = %key, "random nodes cache hit");
                let metadata = entry.propagated_metadata(now);
                return Ok(CacheLookup {
                    entry,
                    hit: true,
                    metadata,
                });
            }
            counter!("tombola_result_cache_miss_total").increment(1);
        }

        let sampled = match compute().await {
            Ok(sampled) => sampled,
            Err(err) => {
                counter!("tombola_result_cache_init_failed_total").increment(1);
                error!(
                    target = SOURCE,
                    key = %key,
                    error = %err,
                    "Failed to init the random nodes cache."
                );
                return Err(CacheError::InitFailed {
                    key,
                    message: err.to_string(),
                });
            }
        };

        let metadata = CacheMetadata::for_query(sampled.access_tags.iter())
            .merged(caller_metadata)
            .merged(&CacheMetadata::with_max_age(max_age));
        let entry = CacheEntry::new(key, sampled.ids, max_age, metadata, now);

        if max_age.is_cacheable() {
            self.backend.set(entry.clone());
            counter!("tombola_result_cache_store_total").increment(1);
            debug!(
                target = SOURCE,
                key = %entry.key,
                max_age = %max_age,
                ids = entry.payload.len(),
                "stored random nodes cache entry"
            );
        }

        let metadata = entry.propagated_metadata(now);
        Ok(CacheLookup {
            entry,
            hit: false,
            metadata,
        })
    }
}
