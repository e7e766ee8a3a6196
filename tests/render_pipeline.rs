use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono_tz::Tz;
use serde_json::{Value, json};
use time::macros::datetime;
use tombola::application::extension::{
    CapabilityTable, ExtensionError, RANDOM_NODES, RandomNodeExtension,
};
use tombola::application::random_nodes::{DrawDefaults, RandomNodeService};
use tombola::application::render::{
    DeferredRenderPipeline, LazyRandomNodes, NodeRenderer, RandomNodeSettings, RenderError,
    RenderSession,
};
use tombola::cache::{CacheConfig, MaxAge, MemoryCacheBackend, NODE_LIST_TAG, ResultCache};
use tombola::domain::entities::NodeRecord;
use tombola::domain::types::ViewMode;
use tombola::infra::memory::MemoryNodesRepo;
use tombola::presentation::views::TemplateRenderer;

fn pipeline(repo: Arc<MemoryNodesRepo>, renderer: Arc<dyn NodeRenderer>) -> DeferredRenderPipeline {
    let config = CacheConfig::default();
    DeferredRenderPipeline::new(
        RandomNodeService::new(repo, DrawDefaults::published_in("en")),
        ResultCache::new(Arc::new(MemoryCacheBackend::new(&config)), &config),
        renderer,
    )
}

fn extension(repo: Arc<MemoryNodesRepo>) -> RandomNodeExtension {
    RandomNodeExtension::new(
        pipeline(repo, Arc::new(TemplateRenderer)),
        CapabilityTable::standard(),
        Tz::UTC,
    )
}

fn args(values: Value) -> Vec<Value> {
    match values {
        Value::Array(items) => items,
        other => vec![other],
    }
}

#[tokio::test]
async fn renders_teasers_from_template_arguments() {
    let repo = Arc::new(MemoryNodesRepo::demo_catalog());
    let extension = extension(repo.clone());
    let mut session = RenderSession::new();

    let markup = extension
        .invoke(&mut session, RANDOM_NODES, &args(json!([2, ["article"], "teaser"])))
        .await
        .expect("invocation succeeds");

    assert!(markup.contains("random-nodes--teaser"));
    assert_eq!(markup.matches("node--article").count(), 2);
    assert_eq!(session.drawn.len(), 2);
    assert!(session.metadata.tags.contains(NODE_LIST_TAG));
    assert!(session.metadata.contexts.contains("access:node_access"));
    for nid in session.drawn.as_slice() {
        assert!(session.metadata.tags.contains(&format!("node:{nid}")));
    }
    assert_eq!(session.metadata.max_age, MaxAge::Seconds(30_000));
    assert_eq!(repo.load_calls(), 1);
}

#[tokio::test]
async fn identical_invocations_reuse_the_cached_selection() {
    let repo = Arc::new(MemoryNodesRepo::demo_catalog());
    let extension = extension(repo.clone());
    let arguments = args(json!([3, ["event"], "teaser"]));

    let mut first_page = RenderSession::new();
    let first = extension
        .invoke(&mut first_page, RANDOM_NODES, &arguments)
        .await
        .expect("first render");

    let mut second_page = RenderSession::new();
    let second = extension
        .invoke(&mut second_page, RANDOM_NODES, &arguments)
        .await
        .expect("second render");

    assert_eq!(first, second);
    assert_eq!(repo.random_queries(), 1);
    assert_eq!(second_page.drawn.as_slice(), first_page.drawn.as_slice());
}

#[tokio::test]
async fn later_blocks_on_a_page_skip_nodes_already_shown() {
    let repo = Arc::new(MemoryNodesRepo::demo_catalog());
    let extension = extension(repo.clone());
    let mut session = RenderSession::new();

    extension
        .invoke(&mut session, RANDOM_NODES, &args(json!([3, ["article"], "teaser"])))
        .await
        .expect("first block");
    let second = extension
        .invoke(&mut session, RANDOM_NODES, &args(json!([5, ["article"], "full"])))
        .await
        .expect("second block");

    assert_eq!(session.drawn.len(), 5);
    assert_eq!(second.matches("random-node--full").count(), 2);
    assert_eq!(repo.queries()[1].exclude.len(), 3);
}

#[tokio::test]
async fn caller_cache_tags_reach_element_and_page_metadata() {
    let repo = Arc::new(MemoryNodesRepo::demo_catalog());
    let pipeline = pipeline(repo.clone(), Arc::new(TemplateRenderer));
    let settings = RandomNodeSettings::new(2)
        .with_cache_keys(["sidebar"])
        .with_cache_tags(["block:sidebar", "config:theme"]);

    let mut session = RenderSession::new();
    let resolved = pipeline
        .resolve(LazyRandomNodes::build(settings.clone()), &mut session)
        .await;

    for tag in ["block:sidebar", "config:theme", NODE_LIST_TAG] {
        assert!(resolved.metadata().tags.contains(tag), "element lacks {tag}");
        assert!(session.metadata.tags.contains(tag), "page lacks {tag}");
    }

    // served from the cache on the next page, tags included
    let mut next_page = RenderSession::new();
    pipeline
        .resolve(LazyRandomNodes::build(settings), &mut next_page)
        .await;
    assert_eq!(repo.random_queries(), 1);
    assert!(next_page.metadata.tags.contains("block:sidebar"));
    assert!(next_page.metadata.tags.contains("config:theme"));
}

#[tokio::test]
async fn cache_today_expires_at_local_midnight() {
    let repo = Arc::new(MemoryNodesRepo::demo_catalog());
    let extension = extension(repo);
    let mut session = RenderSession::new();

    extension
        .invoke_at(
            datetime!(2024-05-01 22:30:00 UTC),
            &mut session,
            RANDOM_NODES,
            &args(json!([1, null, "teaser", "today"])),
        )
        .await
        .expect("invocation succeeds");

    assert_eq!(session.metadata.max_age, MaxAge::Seconds(5_400));
}

#[tokio::test]
async fn store_outage_renders_empty_and_uncacheable() {
    let repo = Arc::new(MemoryNodesRepo::demo_catalog());
    repo.fail_with("connection refused");
    let extension = extension(repo.clone());
    let mut session = RenderSession::new();

    let markup = extension
        .invoke(&mut session, RANDOM_NODES, &args(json!([2])))
        .await
        .expect("outage does not fail the page");

    assert!(markup.is_empty());
    assert_eq!(session.metadata.max_age, MaxAge::Uncacheable);
    assert_eq!(repo.load_calls(), 0);
}

#[tokio::test]
async fn unknown_capability_is_rejected() {
    let extension = extension(Arc::new(MemoryNodesRepo::demo_catalog()));
    let mut session = RenderSession::new();

    let err = extension
        .invoke(&mut session, "latestNodes", &[])
        .await
        .expect_err("unknown capability");

    assert!(matches!(
        err,
        ExtensionError::InvalidCapabilityInvocation { ref name } if name == "latestNodes"
    ));
}

/// Renders each node and, while doing so, asks the extension for another
/// random nodes block the way a node template embedding one would.
struct NestingRenderer {
    extension: Arc<OnceLock<RandomNodeExtension>>,
}

#[async_trait]
impl NodeRenderer for NestingRenderer {
    async fn render_node(
        &self,
        node: &NodeRecord,
        _view_mode: &ViewMode,
    ) -> Result<String, RenderError> {
        let extension = self
            .extension
            .get()
            .ok_or_else(|| RenderError::new(node.nid, "extension not wired"))?;
        let mut nested_session = RenderSession::new();
        let nested = extension
            .invoke(&mut nested_session, RANDOM_NODES, &[json!(3)])
            .await
            .map_err(|err| RenderError::new(node.nid, err.to_string()))?;
        Ok(format!("<p>{}[{nested}]</p>", node.title))
    }
}

#[tokio::test]
async fn nested_blocks_render_empty() {
    let repo = Arc::new(MemoryNodesRepo::with_articles(4));
    let slot = Arc::new(OnceLock::new());
    let renderer = Arc::new(NestingRenderer {
        extension: slot.clone(),
    });
    let extension = RandomNodeExtension::new(
        pipeline(repo.clone(), renderer),
        CapabilityTable::standard(),
        Tz::UTC,
    );
    assert!(slot.set(extension.clone()).is_ok());

    let mut session = RenderSession::new();
    let markup = extension
        .invoke(&mut session, RANDOM_NODES, &args(json!([2, null, "teaser"])))
        .await
        .expect("outer block renders");

    assert_eq!(markup.matches("[]</p>").count(), 2);
    assert_eq!(repo.random_queries(), 1);
    assert_eq!(session.drawn.len(), 2);
}
