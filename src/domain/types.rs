//! Shared domain value types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a node row (`node.nid`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct NodeId(pub i64);

impl NodeId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for NodeId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Presentation mode a node is rendered in.
///
/// `teaser` and `full` have dedicated templates; any other name renders with
/// the full template and is exposed to markup as a CSS modifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewMode(String);

impl ViewMode {
    pub const TEASER: &'static str = "teaser";
    pub const FULL: &'static str = "full";

    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Self::full();
        }
        Self(trimmed.to_string())
    }

    pub fn teaser() -> Self {
        Self(Self::TEASER.to_string())
    }

    pub fn full() -> Self {
        Self(Self::FULL.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_teaser(&self) -> bool {
        self.0 == Self::TEASER
    }
}

impl Default for ViewMode {
    fn default() -> Self {
        Self::full()
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
