use async_trait::async_trait;
use serde_json::{json, Value};

use brickline_types::Result;

use super::required_str;
use crate::brick::{Brick, BrickInput, BrickKind, BrickOptions};

/// Renders `text` as the pipeline's final output.
pub struct TextRenderer;

#[async_trait]
impl Brick for TextRenderer {
    fn id(&self) -> &str {
        "@brickline/render-text"
    }

    fn kind(&self) -> BrickKind {
        BrickKind::Renderer
    }

    fn description(&self) -> &str {
        "Render plain text"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({"type": "string"}))
    }

    async fn is_pure(&self) -> bool {
        true
    }

    async fn run(&self, input: BrickInput, _options: &BrickOptions) -> Result<Value> {
        Ok(Value::String(required_str(&input, "text")?.to_string()))
    }
}
