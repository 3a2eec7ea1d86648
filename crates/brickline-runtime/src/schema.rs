//! Input schema validation with compiled schemas cached per brick id.

use std::collections::HashMap;
use std::sync::Arc;

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;
use tokio::sync::RwLock;

use brickline_types::{BrickError, Result, SchemaViolation};

use crate::brick::Brick;

/// Compile a draft-7 schema. A bad schema is a defect in the brick, not in
/// the pipeline.
pub fn compile_schema(schema: &Value) -> Result<JSONSchema> {
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .map_err(|e| BrickError::Application(format!("invalid input schema: {e}")))
}

/// Check `input` against `schema`, collecting every violation.
pub fn validate_input(schema: &JSONSchema, brick_id: &str, input: &Value) -> Result<()> {
    if let Err(errors) = schema.validate(input) {
        let violations: Vec<SchemaViolation> = errors
            .map(|e| SchemaViolation::new(format!("#{}", e.schema_path), e.to_string()))
            .collect();
        return Err(BrickError::InputValidation {
            brick_id: brick_id.to_string(),
            violations,
        });
    }
    Ok(())
}

#[derive(Default)]
pub struct SchemaCache {
    compiled: RwLock<HashMap<String, Arc<JSONSchema>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn validate(&self, brick: &dyn Brick, input: &Value) -> Result<()> {
        let schema = self.compiled_for(brick).await?;
        validate_input(&schema, brick.id(), input)
    }

    async fn compiled_for(&self, brick: &dyn Brick) -> Result<Arc<JSONSchema>> {
        if let Some(schema) = self.compiled.read().await.get(brick.id()) {
            return Ok(schema.clone());
        }
        let compiled = compile_schema(&brick.input_schema()).map_err(|e| {
            BrickError::Application(format!("brick '{}': {e}", brick.id()))
        })?;
        let compiled = Arc::new(compiled);
        self.compiled
            .write()
            .await
            .insert(brick.id().to_string(), compiled.clone());
        Ok(compiled)
    }

    pub async fn len(&self) -> usize {
        self.compiled.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> JSONSchema {
        compile_schema(&json!({
            "type": "object",
            "properties": {
                "text": {"type": "string"},
                "count": {"type": "integer", "minimum": 0}
            },
            "required": ["text"]
        }))
        .unwrap()
    }

    #[test]
    fn valid_input_passes() {
        assert!(validate_input(&schema(), "b", &json!({"text": "x", "count": 2})).is_ok());
    }

    #[test]
    fn violations_carry_keyword_locations() {
        let err = validate_input(&schema(), "@test/b", &json!({"count": -1})).unwrap_err();
        match err {
            BrickError::InputValidation { brick_id, violations } => {
                assert_eq!(brick_id, "@test/b");
                assert_eq!(violations.len(), 2);
                let locations: Vec<_> = violations
                    .iter()
                    .filter_map(|v| v.keyword_location.as_deref())
                    .collect();
                assert!(locations.contains(&"#/required"), "{locations:?}");
                assert!(locations.contains(&"#/properties/count/minimum"), "{locations:?}");
            }
            other => panic!("expected InputValidation, got {other:?}"),
        }
    }

    #[test]
    fn broken_schema_is_a_defect() {
        let err = compile_schema(&json!({"type": 12})).unwrap_err();
        assert!(err.should_report());
    }
}
