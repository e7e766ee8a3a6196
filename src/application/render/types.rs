use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::repos::RepoError;
use crate::cache::{CacheMetadata, MaxAge};
use crate::domain::draw::{BundleSelection, DrawCount, DrawRequest, PropertyFilters};
use crate::domain::entities::NodeRecord;
use crate::domain::types::{NodeId, ViewMode};

const DEFAULT_MAX_AGE_SECS: u64 = 600;

/// Identifying settings of a deferred random nodes element.
///
/// The result cache only sees `cache_keys`; include anything that changes the
/// output (count, bundles, filters) in them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomNodeSettings {
    pub request: DrawRequest,
    pub cache_keys: Vec<String>,
    /// Extra invalidation tags attached to the cached identifier set.
    pub cache_tags: Vec<String>,
    pub max_age: MaxAge,
    pub view_mode: ViewMode,
}

impl RandomNodeSettings {
    /// Teaser rendering of `count` nodes cached globally for ten minutes.
    pub fn new(count: u32) -> Self {
        Self::for_request(DrawRequest::new(DrawCount::Limited(count)))
    }

    pub fn for_request(request: DrawRequest) -> Self {
        Self {
            request,
            cache_keys: Vec::new(),
            cache_tags: Vec::new(),
            max_age: MaxAge::Seconds(DEFAULT_MAX_AGE_SECS),
            view_mode: ViewMode::teaser(),
        }
    }

    pub fn with_bundles(mut self, bundles: BundleSelection) -> Self {
        self.request.bundles = bundles;
        self
    }

    pub fn with_filters(mut self, filters: PropertyFilters) -> Self {
        self.request.filters = filters;
        self
    }

    pub fn with_cache_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cache_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_age(mut self, max_age: MaxAge) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_view_mode(mut self, view_mode: ViewMode) -> Self {
        self.view_mode = view_mode;
        self
    }

    pub(crate) fn caller_metadata(&self) -> CacheMetadata {
        self.cache_tags
            .iter()
            .fold(CacheMetadata::default(), |metadata, tag| metadata.tag(tag))
    }
}

/// Element freshly built; nothing resolved yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Initialized;

/// Identifiers to show are known.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolved {
    pub ids: Vec<NodeId>,
}

/// Terminal state: markup produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hydrated {
    pub markup: String,
}

/// Deferred element threaded through the pipeline phases. Each phase
/// consumes the previous state and returns the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct Element<S> {
    pub(crate) settings: Option<RandomNodeSettings>,
    pub(crate) metadata: CacheMetadata,
    pub(crate) state: S,
}

impl<S> Element<S> {
    pub fn settings(&self) -> Option<&RandomNodeSettings> {
        self.settings.as_ref()
    }

    /// Cacheability of this element, including everything it embeds.
    pub fn metadata(&self) -> &CacheMetadata {
        &self.metadata
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub(crate) fn advance<T>(self, state: T) -> Element<T> {
        Element {
            settings: self.settings,
            metadata: self.metadata,
            state,
        }
    }
}

impl Element<Initialized> {
    pub fn new(settings: RandomNodeSettings) -> Self {
        Self {
            settings: Some(settings),
            metadata: CacheMetadata::default(),
            state: Initialized,
        }
    }

    /// Element without random node settings. Every phase passes it through.
    pub fn bare() -> Self {
        Self {
            settings: None,
            metadata: CacheMetadata::default(),
            state: Initialized,
        }
    }
}

impl Element<Resolved> {
    pub fn ids(&self) -> &[NodeId] {
        &self.state.ids
    }
}

impl Element<Hydrated> {
    pub fn markup(&self) -> &str {
        &self.state.markup
    }

    pub fn into_markup(self) -> String {
        self.state.markup
    }
}

#[derive(Debug, Error)]
#[error("failed to render node {nid}: {message}")]
pub struct RenderError {
    pub nid: NodeId,
    pub message: String,
}

impl RenderError {
    pub fn new(nid: NodeId, message: impl Into<String>) -> Self {
        Self {
            nid,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("node store unavailable: {0}")]
    StoreUnavailable(#[source] RepoError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Turns loaded nodes into markup.
#[async_trait]
pub trait NodeRenderer: Send + Sync {
    async fn render_node(&self, node: &NodeRecord, view_mode: &ViewMode)
    -> Result<String, RenderError>;

    /// Joins rendered items into the element's markup.
    fn render_list(&self, items: Vec<String>, _view_mode: &ViewMode) -> String {
        items.concat()
    }
}
