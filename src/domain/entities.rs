//! Domain entities mirrored from persistent storage.

use serde::Serialize;

use crate::domain::types::NodeId;

/// A content node joined with its translated field data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRecord {
    pub nid: NodeId,
    pub bundle: String,
    pub langcode: String,
    pub title: String,
    pub status: i16,
    pub promote: bool,
    pub sticky: bool,
    pub uid: i64,
    pub summary: String,
    pub created: i64,
    pub changed: i64,
}

impl NodeRecord {
    pub fn is_published(&self) -> bool {
        self.status == 1
    }
}
