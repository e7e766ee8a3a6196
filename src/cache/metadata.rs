//! Cacheability metadata carried from cached data to whatever embeds it.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Cache tag invalidated whenever any node changes.
pub const NODE_LIST_TAG: &str = "node_list";

/// How long a cached value may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxAge {
    /// Never stored; computed on every request.
    Uncacheable,
    Seconds(u64),
    Permanent,
}

impl MaxAge {
    /// `0` is uncacheable and any negative value is permanent.
    pub fn from_seconds(seconds: i64) -> Self {
        match seconds {
            0 => Self::Uncacheable,
            s if s < 0 => Self::Permanent,
            s => Self::Seconds(s.unsigned_abs()),
        }
    }

    /// `Seconds(0)` is treated like [`MaxAge::Uncacheable`].
    pub fn is_cacheable(self) -> bool {
        !matches!(self, Self::Uncacheable | Self::Seconds(0))
    }

    /// Absolute expiry for an entry created at `now`; `None` never expires.
    pub fn expires_at(self, now: OffsetDateTime) -> Option<OffsetDateTime> {
        match self {
            Self::Uncacheable => Some(now),
            Self::Seconds(seconds) => {
                let seconds = i64::try_from(seconds).unwrap_or(i64::MAX);
                Some(now.saturating_add(Duration::seconds(seconds)))
            }
            Self::Permanent => None,
        }
    }

    /// Lifetime left for something expiring at `expires_at`, rounded up to
    /// whole seconds.
    pub fn remaining(expires_at: Option<OffsetDateTime>, now: OffsetDateTime) -> Self {
        let Some(expires_at) = expires_at else {
            return Self::Permanent;
        };
        let left = expires_at - now;
        if left <= Duration::ZERO {
            return Self::Uncacheable;
        }
        let mut seconds = left.whole_seconds();
        if left.subsec_nanoseconds() > 0 {
            seconds += 1;
        }
        Self::from_seconds(seconds)
    }

    fn rank(self) -> (u8, u64) {
        match self {
            Self::Uncacheable => (0, 0),
            Self::Seconds(seconds) => (1, seconds),
            Self::Permanent => (2, 0),
        }
    }
}

impl Ord for MaxAge {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for MaxAge {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MaxAge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uncacheable => f.write_str("0"),
            Self::Seconds(seconds) => write!(f, "{seconds}"),
            Self::Permanent => f.write_str("permanent"),
        }
    }
}

/// Expiry and invalidation dependencies of a cached or rendered value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub max_age: MaxAge,
    pub tags: BTreeSet<String>,
    pub contexts: BTreeSet<String>,
}

impl Default for CacheMetadata {
    fn default() -> Self {
        Self {
            max_age: MaxAge::Permanent,
            tags: BTreeSet::new(),
            contexts: BTreeSet::new(),
        }
    }
}

impl CacheMetadata {
    pub fn with_max_age(max_age: MaxAge) -> Self {
        Self {
            max_age,
            ..Self::default()
        }
    }

    /// Dependencies contributed by a random node query with these access tags.
    pub fn for_query<'a, I>(access_tags: I) -> Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut metadata = Self::default().tag(NODE_LIST_TAG);
        for access_tag in access_tags {
            metadata.contexts.insert(format!("access:{access_tag}"));
        }
        metadata
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.contexts.insert(context.into());
        self
    }

    /// Folds `other` in: tags and contexts are unioned and the shorter
    /// max-age wins, so the container never outlives what it embeds.
    pub fn merge(&mut self, other: &CacheMetadata) {
        self.max_age = self.max_age.min(other.max_age);
        self.tags.extend(other.tags.iter().cloned());
        self.contexts.extend(other.contexts.iter().cloned());
    }

    pub fn merged(mut self, other: &CacheMetadata) -> Self {
        self.merge(other);
        self
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn max_age_orders_uncacheable_below_permanent() {
        assert!(MaxAge::Uncacheable < MaxAge::Seconds(1));
        assert!(MaxAge::Seconds(1) < MaxAge::Seconds(600));
        assert!(MaxAge::Seconds(u64::MAX) < MaxAge::Permanent);
    }

    #[test]
    fn from_seconds_maps_sentinels() {
        assert_eq!(MaxAge::from_seconds(0), MaxAge::Uncacheable);
        assert_eq!(MaxAge::from_seconds(-1), MaxAge::Permanent);
        assert_eq!(MaxAge::from_seconds(600), MaxAge::Seconds(600));
    }

    #[test]
    fn zero_seconds_is_not_cacheable() {
        assert!(!MaxAge::Seconds(0).is_cacheable());
        assert!(!MaxAge::Uncacheable.is_cacheable());
        assert!(MaxAge::Seconds(1).is_cacheable());
        assert!(MaxAge::Permanent.is_cacheable());
    }

    #[test]
    fn merge_keeps_shorter_lifetime_and_unions_dependencies() {
        let mut outer = CacheMetadata::with_max_age(MaxAge::Seconds(3600)).tag("page");
        let inner = CacheMetadata::with_max_age(MaxAge::Seconds(600))
            .tag(NODE_LIST_TAG)
            .context("access:node_access");

        outer.merge(&inner);

        assert_eq!(outer.max_age, MaxAge::Seconds(600));
        assert!(outer.tags.contains("page"));
        assert!(outer.tags.contains(NODE_LIST_TAG));
        assert!(outer.contexts.contains("access:node_access"));
    }

    #[test]
    fn remaining_rounds_partial_seconds_up() {
        let now = datetime!(2024-05-01 10:00:00 UTC);
        let expires = datetime!(2024-05-01 10:00:10.5 UTC);
        assert_eq!(MaxAge::remaining(Some(expires), now), MaxAge::Seconds(11));
        assert_eq!(MaxAge::remaining(Some(now), now), MaxAge::Uncacheable);
        assert_eq!(MaxAge::remaining(None, now), MaxAge::Permanent);
    }

    #[test]
    fn query_metadata_carries_access_context() {
        let tags = [String::from("node_access")];
        let metadata = CacheMetadata::for_query(tags.iter());
        assert!(metadata.tags.contains(NODE_LIST_TAG));
        assert!(metadata.contexts.contains("access:node_access"));
        assert_eq!(metadata.max_age, MaxAge::Permanent);
    }
}
