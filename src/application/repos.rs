//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::draw::PropertyFilters;
use crate::domain::entities::NodeRecord;
use crate::domain::types::NodeId;

/// Access tag attached to every random node query. Adapters must carry it
/// through untouched.
pub const NODE_ACCESS_TAG: &str = "node_access";

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// A filtered, randomly ordered select of node identifiers.
///
/// Cloning a query and narrowing the clone is how per-bundle sub-draws are
/// built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomNodeQuery {
    pub filters: PropertyFilters,
    /// `IN` restriction on the bundle column; empty means any bundle.
    pub bundles: Vec<String>,
    /// `NOT IN` restriction on the identifier column.
    pub exclude: Vec<NodeId>,
    pub limit: Option<u64>,
    pub access_tag: &'static str,
}

impl RandomNodeQuery {
    pub fn new(filters: PropertyFilters) -> Self {
        Self {
            filters,
            bundles: Vec::new(),
            exclude: Vec::new(),
            limit: None,
            access_tag: NODE_ACCESS_TAG,
        }
    }

    pub fn excluding(mut self, ids: &[NodeId]) -> Self {
        self.exclude = ids.to_vec();
        self
    }

    pub fn in_bundles(mut self, bundles: Vec<String>) -> Self {
        self.bundles = bundles;
        self
    }

    pub fn in_bundle(self, bundle: &str) -> Self {
        self.in_bundles(vec![bundle.to_string()])
    }

    pub fn range(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
pub trait NodesRepo: Send + Sync {
    /// Executes a random select and returns matching identifiers in the
    /// store's random order.
    async fn random_node_ids(&self, query: &RandomNodeQuery) -> Result<Vec<NodeId>, RepoError>;

    /// Loads full records for `ids`. Unknown identifiers are skipped; the
    /// returned order is unspecified.
    async fn load_nodes(&self, ids: &[NodeId]) -> Result<Vec<NodeRecord>, RepoError>;
}
