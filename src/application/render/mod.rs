//! Deferred rendering of random node elements.
//!
//! An element is built as a cacheable placeholder, resolved to a set of node
//! identifiers (through the result cache) and finally hydrated into markup.
//! Metadata gathered along the way bubbles into the request's
//! [`RenderSession`].

pub mod guard;
mod pipeline;
mod types;

pub use pipeline::{DeferredRenderPipeline, LazyRandomNodes, RenderSession};
pub use types::{
    Element, Hydrated, Initialized, NodeRenderer, PipelineError, RandomNodeSettings, RenderError,
    Resolved,
};
