use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::application::repos::{NodesRepo, RepoError};
use crate::application::sampler::{Sampler, SamplerError};
use crate::domain::draw::{DrawRequest, DrawnIdSet, FilterValue, PropertyFilters, SampledRecordSet};
use crate::domain::entities::NodeRecord;
use crate::domain::types::NodeId;

const SOURCE: &str = "application::random_nodes::RandomNodeService";

/// Property filters applied to every draw unless the caller sets them.
#[derive(Debug, Clone, Default)]
pub struct DrawDefaults {
    pub filters: PropertyFilters,
}

impl DrawDefaults {
    /// Published nodes in `langcode`. Pinning the language keeps one node's
    /// translations from being drawn twice in a single query.
    pub fn published_in(langcode: impl Into<String>) -> Self {
        Self {
            filters: PropertyFilters::new()
                .with("status", FilterValue::Int(1))
                .with("langcode", FilterValue::Text(langcode.into())),
        }
    }
}

impl From<&crate::config::SamplerSettings> for DrawDefaults {
    fn from(settings: &crate::config::SamplerSettings) -> Self {
        let mut filters = PropertyFilters::new();
        if let Some(status) = settings.default_status {
            filters.insert("status", FilterValue::Int(status));
        }
        if let Some(langcode) = settings.langcode.as_ref() {
            filters.insert("langcode", FilterValue::Text(langcode.clone()));
        }
        Self { filters }
    }
}

#[derive(Clone)]
pub struct RandomNodeService {
    sampler: Sampler,
    nodes: Arc<dyn NodesRepo>,
    defaults: DrawDefaults,
}

impl RandomNodeService {
    pub fn new(nodes: Arc<dyn NodesRepo>, defaults: DrawDefaults) -> Self {
        Self {
            sampler: Sampler::new(nodes.clone()),
            nodes,
            defaults,
        }
    }

    /// Returns `request` with the default filters filled in.
    pub fn prepare(&self, request: &DrawRequest) -> DrawRequest {
        let mut prepared = request.clone();
        prepared.filters = prepared.filters.with_defaults(&self.defaults.filters);
        prepared
    }

    pub async fn draw(
        &self,
        request: &DrawRequest,
        drawn: &mut DrawnIdSet,
    ) -> Result<SampledRecordSet, SamplerError> {
        self.sampler.draw(&self.prepare(request), drawn).await
    }

    /// Draws and loads full records, in draw order.
    pub async fn random_nodes(
        &self,
        request: &DrawRequest,
        drawn: &mut DrawnIdSet,
    ) -> Result<Vec<NodeRecord>, SamplerError> {
        let sampled = self.draw(request, drawn).await?;
        self.load_in_order(&sampled.ids)
            .await
            .map_err(SamplerError::StoreUnavailable)
    }

    /// Bulk-loads `ids` and returns the records in the order of `ids`,
    /// skipping identifiers the store no longer knows.
    pub async fn load_in_order(&self, ids: &[NodeId]) -> Result<Vec<NodeRecord>, RepoError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_id: HashMap<NodeId, NodeRecord> = self
            .nodes
            .load_nodes(ids)
            .await
            .inspect_err(|err| {
                warn!(target = SOURCE, error = %err, ids = ids.len(), "bulk node load failed");
            })?
            .into_iter()
            .map(|record| (record.nid, record))
            .collect();

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }
}
