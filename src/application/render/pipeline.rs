use std::sync::Arc;

use tracing::{debug, warn};

use crate::application::random_nodes::RandomNodeService;
use crate::cache::{CacheMetadata, MaxAge, ResultCache};
use crate::domain::draw::DrawnIdSet;

use super::guard;
use super::types::{
    Element, Hydrated, Initialized, NodeRenderer, PipelineError, RandomNodeSettings, Resolved,
};

const SOURCE: &str = "application::render::DeferredRenderPipeline";

/// Request-scoped state shared by every element rendered for one page.
#[derive(Debug, Default)]
pub struct RenderSession {
    pub drawn: DrawnIdSet,
    pub metadata: CacheMetadata,
}

impl RenderSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bubbles an embedded element's metadata up to the page.
    pub fn absorb(&mut self, metadata: &CacheMetadata) {
        self.metadata.merge(metadata);
    }
}

/// Builder for random nodes placeholders.
pub struct LazyRandomNodes;

impl LazyRandomNodes {
    pub fn build(settings: RandomNodeSettings) -> Element<Initialized> {
        Element::new(settings)
    }
}

#[derive(Clone)]
pub struct DeferredRenderPipeline {
    service: RandomNodeService,
    cache: ResultCache,
    renderer: Arc<dyn NodeRenderer>,
}

impl DeferredRenderPipeline {
    pub fn new(
        service: RandomNodeService,
        cache: ResultCache,
        renderer: Arc<dyn NodeRenderer>,
    ) -> Self {
        Self {
            service,
            cache,
            renderer,
        }
    }

    /// Decides which identifiers the element shows.
    ///
    /// Cache initialisation failures leave the element empty and uncacheable;
    /// the page keeps rendering.
    pub async fn resolve(
        &self,
        element: Element<Initialized>,
        session: &mut RenderSession,
    ) -> Element<Resolved> {
        let Some(settings) = element.settings.as_ref() else {
            return element.advance(Resolved::default());
        };

        if guard::is_sub_rendering() {
            debug!(target = SOURCE, "skipping nested random nodes element");
            return element.advance(Resolved::default());
        }

        let request = settings.request.clone();
        let caller = settings.caller_metadata();
        let service = &self.service;
        let drawn = &mut session.drawn;

        let lookup = self
            .cache
            .get_or_compute(&settings.cache_keys, settings.max_age, &caller, move || {
                async move { service.draw(&request, drawn).await }
            })
            .await;

        match lookup {
            Ok(lookup) => {
                if lookup.hit {
                    // Keep later draws on this page from repeating cached nodes.
                    session.drawn.extend(lookup.ids().iter().copied());
                }
                let ids = lookup.ids().to_vec();
                let mut element = element.advance(Resolved { ids });
                element.metadata.merge(&lookup.metadata);
                session.absorb(&lookup.metadata);
                element
            }
            Err(err) => {
                warn!(
                    target = SOURCE,
                    error = %err,
                    "random nodes element left empty"
                );
                let metadata = CacheMetadata::with_max_age(MaxAge::Uncacheable);
                let mut element = element.advance(Resolved::default());
                element.metadata.merge(&metadata);
                session.absorb(&metadata);
                element
            }
        }
    }

    /// Loads the resolved nodes and renders them.
    pub async fn hydrate(
        &self,
        element: Element<Resolved>,
        session: &mut RenderSession,
    ) -> Result<Element<Hydrated>, PipelineError> {
        let Some(settings) = element.settings.as_ref() else {
            return Ok(element.advance(Hydrated::default()));
        };
        if element.state.ids.is_empty() {
            return Ok(element.advance(Hydrated::default()));
        }

        let view_mode = settings.view_mode.clone();
        let nodes = self
            .service
            .load_in_order(&element.state.ids)
            .await
            .map_err(PipelineError::StoreUnavailable)?;
        if nodes.is_empty() {
            return Ok(element.advance(Hydrated::default()));
        }

        let renderer = self.renderer.clone();
        let items = guard::sub_rendering(async {
            let mut items = Vec::with_capacity(nodes.len());
            for node in &nodes {
                items.push(renderer.render_node(node, &view_mode).await?);
            }
            Ok::<_, PipelineError>(items)
        })
        .await?;

        let metadata = nodes
            .iter()
            .fold(CacheMetadata::default(), |metadata, node| {
                metadata.tag(format!("node:{}", node.nid))
            });
        session.absorb(&metadata);

        let markup = self.renderer.render_list(items, &view_mode);
        let mut element = element.advance(Hydrated { markup });
        element.metadata.merge(&metadata);
        Ok(element)
    }

    /// Runs both phases.
    pub async fn render(
        &self,
        element: Element<Initialized>,
        session: &mut RenderSession,
    ) -> Result<Element<Hydrated>, PipelineError> {
        let resolved = self.resolve(element, session).await;
        self.hydrate(resolved, session).await
    }
}
