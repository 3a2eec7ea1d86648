use async_trait::async_trait;
use serde_json::{json, Value};

use brickline_types::{BrickError, Result};

use super::required_str;
use crate::brick::{Brick, BrickInput, BrickKind, BrickOptions};

// ---------------------------------------------------------------------------
// LogBrick
// ---------------------------------------------------------------------------

/// Writes `message` to the log at `level`.
pub struct LogBrick;

#[async_trait]
impl Brick for LogBrick {
    fn id(&self) -> &str {
        "@brickline/log"
    }

    fn kind(&self) -> BrickKind {
        BrickKind::Effect
    }

    fn description(&self) -> &str {
        "Log a message"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {"type": "string"},
                "level": {"type": "string", "enum": ["debug", "info", "warn", "error"]},
                "data": {}
            },
            "required": ["message"]
        })
    }

    async fn run(&self, input: BrickInput, options: &BrickOptions) -> Result<Value> {
        let message = required_str(&input, "message")?;
        let data = input.get("data").cloned().unwrap_or(Value::Null);
        let instance = options.instance_id;
        match input.get_str("level").unwrap_or("info") {
            "debug" => tracing::debug!(instance = %instance, data = %data, "{message}"),
            "warn" => tracing::warn!(instance = %instance, data = %data, "{message}"),
            "error" => tracing::error!(instance = %instance, data = %data, "{message}"),
            _ => tracing::info!(instance = %instance, data = %data, "{message}"),
        }
        Ok(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// ErrorBrick
// ---------------------------------------------------------------------------

/// Fails the step with a business error carrying `message`.
pub struct ErrorBrick;

#[async_trait]
impl Brick for ErrorBrick {
    fn id(&self) -> &str {
        "@brickline/error"
    }

    fn kind(&self) -> BrickKind {
        BrickKind::Effect
    }

    fn description(&self) -> &str {
        "Stop the pipeline with an error"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"message": {"type": "string", "minLength": 1}},
            "required": ["message"]
        })
    }

    async fn run(&self, input: BrickInput, _options: &BrickOptions) -> Result<Value> {
        Err(BrickError::business(required_str(&input, "message")?))
    }
}
