use async_trait::async_trait;
use serde_json::{json, Value};

use brickline_types::Result;

use super::required_str;
use crate::brick::{Brick, BrickInput, BrickKind, BrickOptions};

/// Returns its resolved input unchanged.
pub struct IdentityBrick;

#[async_trait]
impl Brick for IdentityBrick {
    fn id(&self) -> &str {
        "@brickline/identity"
    }

    fn kind(&self) -> BrickKind {
        BrickKind::Transformer
    }

    fn description(&self) -> &str {
        "Return the input as-is"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "additionalProperties": true})
    }

    async fn is_pure(&self) -> bool {
        true
    }

    async fn run(&self, input: BrickInput, _options: &BrickOptions) -> Result<Value> {
        Ok(input.into_value())
    }
}

pub struct UppercaseBrick;

#[async_trait]
impl Brick for UppercaseBrick {
    fn id(&self) -> &str {
        "@brickline/uppercase"
    }

    fn kind(&self) -> BrickKind {
        BrickKind::Transformer
    }

    fn description(&self) -> &str {
        "Convert text to upper case"
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
        Ok(Value::String(required_str(&input, "text")?.to_uppercase()))
    }
}
