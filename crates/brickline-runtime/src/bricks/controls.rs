//! Control-flow bricks that run their nested pipelines.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use brickline_types::{BrickError, Result};

use super::output_or_null;
use crate::brick::{Brick, BrickInput, BrickKind, BrickOptions};
use crate::evaluator::is_truthy;

const DEFAULT_ELEMENT_KEY: &str = "element";

fn pipeline_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"__type__": {"const": "pipeline"}},
        "required": ["__type__", "__value__"]
    })
}

// ---------------------------------------------------------------------------
// ForEachBrick
// ---------------------------------------------------------------------------

/// Runs `body` once per element, binding the element under `elementKey`.
/// Returns the last iteration's output.
pub struct ForEachBrick;

#[async_trait]
impl Brick for ForEachBrick {
    fn id(&self) -> &str {
        "@brickline/for-each"
    }

    fn kind(&self) -> BrickKind {
        BrickKind::Transformer
    }

    fn description(&self) -> &str {
        "Run a pipeline for each element of a list"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "elements": {"type": "array"},
                "elementKey": {"type": "string", "pattern": "^[A-Za-z_][A-Za-z0-9_]*$"},
                "body": pipeline_schema()
            },
            "required": ["elements", "body"]
        })
    }

    async fn run(&self, input: BrickInput, options: &BrickOptions) -> Result<Value> {
        let body = input.require_pipeline("body")?;
        let element_key = input.get_str("elementKey").unwrap_or(DEFAULT_ELEMENT_KEY);
        let elements = input
            .get("elements")
            .and_then(Value::as_array)
            .ok_or_else(|| BrickError::Application("missing array field 'elements'".into()))?;

        let mut last = None;
        for element in elements {
            if options.cancel.is_cancelled() {
                return Err(BrickError::cancelled());
            }
            let mut bindings = Map::new();
            bindings.insert(element_key.to_string(), element.clone());
            last = body.run_with(bindings).await?;
        }
        Ok(output_or_null(last))
    }
}

// ---------------------------------------------------------------------------
// IfElseBrick
// ---------------------------------------------------------------------------

/// Runs `if` when `condition` is truthy, otherwise `else` when present.
pub struct IfElseBrick;

#[async_trait]
impl Brick for IfElseBrick {
    fn id(&self) -> &str {
        "@brickline/if-else"
    }

    fn kind(&self) -> BrickKind {
        BrickKind::Transformer
    }

    fn description(&self) -> &str {
        "Run one of two pipelines"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "condition": {},
                "if": pipeline_schema(),
                "else": pipeline_schema()
            },
            "required": ["condition", "if"]
        })
    }

    async fn run(&self, input: BrickInput, _options: &BrickOptions) -> Result<Value> {
        let condition = input.get("condition").unwrap_or(&Value::Null);
        let branch = if is_truthy(condition) {
            Some(input.require_pipeline("if")?)
        } else {
            input.pipeline("else")
        };
        match branch {
            Some(pipeline) => Ok(output_or_null(pipeline.run().await?)),
            None => Ok(Value::Null),
        }
    }
}
