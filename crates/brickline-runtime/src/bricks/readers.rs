use async_trait::async_trait;
use serde_json::{json, Value};

use brickline_types::Result;

use super::required_str;
use crate::brick::{Brick, BrickInput, BrickKind, BrickOptions};

// ---------------------------------------------------------------------------
// PageMetadataReader
// ---------------------------------------------------------------------------

/// Reads the page url and title, plus the selector and text of the root
/// when it is an element.
pub struct PageMetadataReader;

#[async_trait]
impl Brick for PageMetadataReader {
    fn id(&self) -> &str {
        "@brickline/page-metadata"
    }

    fn kind(&self) -> BrickKind {
        BrickKind::Reader
    }

    fn description(&self) -> &str {
        "Read the page url and title"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "url": {"type": "string"},
                "title": {"type": "string"},
                "selector": {"type": ["string", "null"]},
                "text": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["url", "title"]
        }))
    }

    async fn is_pure(&self) -> bool {
        true
    }

    async fn run(&self, _input: BrickInput, options: &BrickOptions) -> Result<Value> {
        let root = options.require_root()?;
        let page = root.page();
        let mut out = json!({
            "url": page.url(),
            "title": page.title(),
            "selector": root.selector(),
        });
        if !root.is_document() {
            out["text"] = json!(root.query_text(""));
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// ElementTextReader
// ---------------------------------------------------------------------------

/// Texts of the elements matching `selector` under the root.
pub struct ElementTextReader;

#[async_trait]
impl Brick for ElementTextReader {
    fn id(&self) -> &str {
        "@brickline/element-text"
    }

    fn kind(&self) -> BrickKind {
        BrickKind::Reader
    }

    fn description(&self) -> &str {
        "Read the text of matching elements"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"selector": {"type": "string", "minLength": 1}},
            "required": ["selector"]
        })
    }

    async fn is_pure(&self) -> bool {
        true
    }

    async fn run(&self, input: BrickInput, options: &BrickOptions) -> Result<Value> {
        let selector = required_str(&input, "selector")?;
        let root = options.require_root()?;
        Ok(json!(root.query_text(selector)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brickline_types::{RootHandle, RunContext, StaticDocument};
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn options(root: Option<RootHandle>) -> BrickOptions {
        let page = RootHandle::document(StaticDocument::new("u", "t"));
        BrickOptions {
            ctx: RunContext::new(page),
            root,
            instance_id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
        }
    }

    fn page() -> RootHandle {
        RootHandle::document(
            StaticDocument::new("https://example.com/a", "Example")
                .with_element("li", vec!["one".into(), "two".into()])
                .with_element("#list", vec!["one two".into()])
                .with_element("#list li", vec!["one".into()]),
        )
    }

    #[tokio::test]
    async fn metadata_for_document_root() {
        let out = PageMetadataReader
            .run(BrickInput::default(), &options(Some(page())))
            .await
            .unwrap();
        assert_eq!(out["url"], "https://example.com/a");
        assert_eq!(out["title"], "Example");
        assert!(out["selector"].is_null());
        assert!(out.get("text").is_none());
    }

    #[tokio::test]
    async fn metadata_for_element_root() {
        let out = PageMetadataReader
            .run(BrickInput::default(), &options(Some(page().scoped("#list"))))
            .await
            .unwrap();
        assert_eq!(out["selector"], "#list");
        assert_eq!(out["text"], json!(["one two"]));
    }

    #[tokio::test]
    async fn element_text_respects_root() {
        let input = BrickInput::new(json!({"selector": "li"}));
        let all = ElementTextReader.run(input.clone(), &options(Some(page()))).await.unwrap();
        assert_eq!(all, json!(["one", "two"]));
        let scoped = ElementTextReader
            .run(input, &options(Some(page().scoped("#list"))))
            .await
            .unwrap();
        assert_eq!(scoped, json!(["one"]));
    }

    #[tokio::test]
    async fn reader_without_root_is_defect() {
        let err = PageMetadataReader
            .run(BrickInput::default(), &options(None))
            .await
            .unwrap_err();
        assert!(err.should_report());
    }
}
