//! Cache key derivation.
//!
//! A `CacheKey` is derived only from the ordered partition keys a caller
//! supplies. Two draws with different counts or quotas but the same partition
//! keys share one entry; callers fold anything that affects the output into
//! their keys.

use std::fmt;

use sha2::{Digest, Sha256};

const KEY_PREFIX: &str = "random_nodes";
const PART_SEPARATOR: u8 = 0x1f;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Deterministic key for an ordered sequence of partition keys. The empty
    /// sequence is a valid, global identity.
    pub fn derive<S: AsRef<str>>(parts: &[S]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((parts.len() as u64).to_be_bytes());
        for part in parts {
            hasher.update(part.as_ref().as_bytes());
            hasher.update([PART_SEPARATOR]);
        }
        Self(format!("{KEY_PREFIX}:{}", hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_parts_produce_same_key() {
        let first = CacheKey::derive(&["home", "sidebar"]);
        let second = CacheKey::derive(&["home".to_string(), "sidebar".to_string()]);
        assert_eq!(first, second);
        assert!(first.as_str().starts_with("random_nodes:"));
    }

    #[test]
    fn order_and_boundaries_matter() {
        assert_ne!(
            CacheKey::derive(&["home", "sidebar"]),
            CacheKey::derive(&["sidebar", "home"])
        );
        assert_ne!(
            CacheKey::derive(&["ab", "c"]),
            CacheKey::derive(&["a", "bc"])
        );
    }

    #[test]
    fn empty_sequence_is_a_distinct_global_key() {
        let global = CacheKey::derive::<&str>(&[]);
        assert_eq!(global, CacheKey::derive::<String>(&[]));
        assert_ne!(global, CacheKey::derive(&[""]));
    }
}
