//! Result cache configuration.

use std::num::NonZeroUsize;

use serde::Deserialize;

use super::metadata::MaxAge;

const DEFAULT_CAPACITY: usize = 512;
const DEFAULT_MAX_AGE_SECS: i64 = 600;

/// Result cache configuration from the `[cache]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When disabled every lookup behaves as uncacheable.
    pub enabled: bool,
    /// Maximum number of cached identifier sets kept in memory.
    pub capacity: usize,
    /// Max-age in seconds used when a caller does not pick one. `0` disables
    /// caching and a negative value caches permanently.
    pub default_max_age_secs: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_CAPACITY,
            default_max_age_secs: DEFAULT_MAX_AGE_SECS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            capacity: settings.capacity.get(),
            default_max_age_secs: settings.default_max_age_secs,
        }
    }
}

impl CacheConfig {
    /// Returns the capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn default_max_age(&self) -> MaxAge {
        MaxAge::from_seconds(self.default_max_age_secs)
    }
}
