use askama::{Error as AskamaError, Template};
use async_trait::async_trait;
use thiserror::Error;
use time::{OffsetDateTime, macros::format_description};
use tracing::warn;

use crate::application::render::{NodeRenderer, RenderError};
use crate::domain::entities::NodeRecord;
use crate::domain::types::{NodeId, ViewMode};

const SOURCE: &str = "presentation::views";

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

pub fn render_template<T: Template>(template: T) -> Result<String, TemplateRenderError> {
    template.render().map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
    })
}

#[derive(Clone)]
pub struct NodeCardView {
    pub nid: NodeId,
    pub bundle: String,
    pub title: String,
    pub summary: String,
    pub view_mode: String,
    pub promoted: bool,
    pub sticky: bool,
    /// `YYYY-MM-DD`, empty when unknown.
    pub created: String,
}

impl NodeCardView {
    pub fn new(node: &NodeRecord, view_mode: &ViewMode) -> Self {
        Self {
            nid: node.nid,
            bundle: node.bundle.clone(),
            title: node.title.clone(),
            summary: node.summary.clone(),
            view_mode: view_mode.as_str().to_string(),
            promoted: node.promote,
            sticky: node.sticky,
            created: format_created(node.created).unwrap_or_default(),
        }
    }
}

fn format_created(timestamp: i64) -> Option<String> {
    if timestamp <= 0 {
        return None;
    }
    OffsetDateTime::from_unix_timestamp(timestamp)
        .ok()?
        .format(format_description!("[year]-[month]-[day]"))
        .ok()
}

#[derive(Template)]
#[template(path = "random_nodes/teaser.html")]
pub struct TeaserTemplate {
    pub node: NodeCardView,
}

/// Used for `full` and any custom view mode.
#[derive(Template)]
#[template(path = "random_nodes/full.html")]
pub struct FullTemplate {
    pub node: NodeCardView,
}

#[derive(Template)]
#[template(path = "random_nodes/list.html")]
pub struct ListTemplate {
    pub view_mode: String,
    pub items: Vec<String>,
}

/// Askama-backed [`NodeRenderer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

#[async_trait]
impl NodeRenderer for TemplateRenderer {
    async fn render_node(
        &self,
        node: &NodeRecord,
        view_mode: &ViewMode,
    ) -> Result<String, RenderError> {
        let view = NodeCardView::new(node, view_mode);
        let rendered = if view_mode.is_teaser() {
            render_template(TeaserTemplate { node: view })
        } else {
            render_template(FullTemplate { node: view })
        };
        rendered.map_err(|err| RenderError::new(node.nid, err.error.to_string()))
    }

    fn render_list(&self, items: Vec<String>, view_mode: &ViewMode) -> String {
        let template = ListTemplate {
            view_mode: view_mode.as_str().to_string(),
            items,
        };
        match template.render() {
            Ok(markup) => markup,
            Err(err) => {
                warn!(target = SOURCE, error = %err, "random nodes wrapper failed to render");
                template.items.concat()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> NodeRecord {
        NodeRecord {
            nid: NodeId(7),
            bundle: "article".into(),
            langcode: "en".into(),
            title: "Fish & <Chips>".into(),
            status: 1,
            promote: true,
            sticky: false,
            uid: 1,
            summary: "Crispy.".into(),
            created: 1_714_557_600,
            changed: 1_714_557_600,
        }
    }

    #[tokio::test]
    async fn teaser_escapes_title() {
        let markup = TemplateRenderer
            .render_node(&node(), &ViewMode::teaser())
            .await
            .expect("teaser renders");

        assert!(markup.contains("random-node--teaser"));
        assert!(markup.contains("data-nid=\"7\""));
        assert!(markup.contains("Fish &#38; &#60;Chips&#62;") || markup.contains("Fish &amp; &lt;Chips&gt;"));
    }

    #[tokio::test]
    async fn custom_view_mode_uses_full_template() {
        let markup = TemplateRenderer
            .render_node(&node(), &ViewMode::new("card"))
            .await
            .expect("full renders");

        assert!(markup.contains("random-node--card"));
        assert!(markup.contains("is-promoted"));
        assert!(markup.contains("2024-05-01"));
    }

    #[test]
    fn list_wraps_items_without_escaping() {
        let markup = TemplateRenderer.render_list(
            vec!["<p>a</p>".into(), "<p>b</p>".into()],
            &ViewMode::teaser(),
        );

        assert!(markup.contains("random-nodes--teaser"));
        assert!(markup.contains("<p>a</p>"));
        assert!(markup.contains("<p>b</p>"));
    }
}
