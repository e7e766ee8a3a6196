//! Tombola result cache.
//!
//! Caches the identifier sets produced by the sampler so repeated renders
//! within the max-age window do not re-query the store:
//!
//! - **Keys** are derived from caller-chosen partition keys only.
//! - **Entries** carry a max-age and dependency metadata (tags, contexts)
//!   that the embedding render context absorbs.
//! - **Backends** are pluggable; the in-process LRU backend is the default.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! capacity = 512
//! default_max_age_secs = 600
//! ```

mod config;
mod keys;
pub(crate) mod lock;
mod metadata;
mod result;
mod store;

pub use config::CacheConfig;
pub use keys::CacheKey;
pub use metadata::{CacheMetadata, MaxAge, NODE_LIST_TAG};
pub use result::{CacheError, CacheLookup, ResultCache};
pub use store::{CacheBackend, CacheEntry, MemoryCacheBackend};
