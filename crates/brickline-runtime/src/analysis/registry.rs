//! Checks that need the brick registry: unknown ids, missing required
//! config properties, and steps placed after a renderer.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use brickline_config::{Pipeline, PipelineDocument, RegistryId};
use brickline_types::BrickError;

use super::visitor::{walk_document, PipelineVisitor, VisitExtra};
use super::{Analysis, Annotation, AnnotationType, Position};
use crate::brick::BrickKind;
use crate::registry::BrickRegistry;

const ID: &str = "registry";

struct StepRef {
    position: Position,
    brick_id: RegistryId,
    config_keys: Vec<String>,
    followed: bool,
}

#[derive(Default)]
struct StepCollector {
    steps: Vec<StepRef>,
}

impl PipelineVisitor for StepCollector {
    fn visit_pipeline(&mut self, position: &Position, pipeline: &Pipeline, _extra: &VisitExtra) {
        for (index, step) in pipeline.iter().enumerate() {
            self.steps.push(StepRef {
                position: position.join(index),
                brick_id: step.brick_id.clone(),
                config_keys: step.config.keys().cloned().collect(),
                followed: index + 1 < pipeline.len(),
            });
        }
    }
}

pub struct RegistryAnalysis {
    registry: Arc<BrickRegistry>,
    annotations: Vec<Annotation>,
}

impl RegistryAnalysis {
    pub fn new(registry: Arc<BrickRegistry>) -> Self {
        Self {
            registry,
            annotations: Vec::new(),
        }
    }

    fn push(&mut self, position: Position, annotation_type: AnnotationType, message: String) {
        self.annotations
            .push(Annotation::new(ID, position, annotation_type, message));
    }
}

fn required_properties(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

#[async_trait]
impl Analysis for RegistryAnalysis {
    fn id(&self) -> &str {
        ID
    }

    async fn run(&mut self, doc: &PipelineDocument) {
        self.annotations.clear();
        let mut collector = StepCollector::default();
        walk_document(doc, &mut collector);

        for step in collector.steps {
            let brick = match self.registry.lookup(&step.brick_id).await {
                Ok(brick) => brick,
                Err(BrickError::BrickNotFound { .. }) => {
                    self.push(
                        step.position.join("id"),
                        AnnotationType::Error,
                        format!("Brick '{}' is not registered", step.brick_id),
                    );
                    continue;
                }
                Err(e) => {
                    self.push(step.position.join("id"), AnnotationType::Error, e.to_string());
                    continue;
                }
            };

            let schema = brick.input_schema();
            for prop in required_properties(&schema) {
                if !step.config_keys.iter().any(|k| k == prop) {
                    self.push(
                        step.position.join("config").join(prop),
                        AnnotationType::Error,
                        format!("Required property '{prop}' is missing"),
                    );
                }
            }

            if brick.kind() == BrickKind::Renderer && step.followed {
                self.push(
                    step.position.clone(),
                    AnnotationType::Warning,
                    format!(
                        "Renderer '{}' ends the pipeline; later steps never run",
                        step.brick_id
                    ),
                );
            }
        }
    }

    fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bricks::default_registry;
    use brickline_config::{BrickInvocation, Expression};

    async fn run(pipeline: Pipeline) -> Vec<Annotation> {
        let mut analysis = RegistryAnalysis::new(Arc::new(default_registry()));
        analysis.run(&PipelineDocument::new("r", pipeline)).await;
        analysis.annotations().to_vec()
    }

    #[tokio::test]
    async fn unknown_brick_in_nested_pipeline() {
        let body = Pipeline::new(vec![BrickInvocation::new("@acme/nope")]);
        let found = run(Pipeline::new(vec![BrickInvocation::new("@brickline/for-each")
            .with_config("elements", Expression::literal(serde_json::json!([])))
            .with_config("body", Expression::Pipeline(body))]))
        .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].position.path, "pipeline.0.config.body.__value__.0.id");
        assert!(found[0].message.contains("@acme/nope"));
    }

    #[tokio::test]
    async fn missing_required_config() {
        let found = run(Pipeline::new(vec![BrickInvocation::new("@brickline/uppercase")])).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].position.path, "pipeline.0.config.text");
        assert_eq!(found[0].annotation_type, AnnotationType::Error);
    }

    #[tokio::test]
    async fn renderer_followed_by_steps_warns() {
        let found = run(Pipeline::new(vec![
            BrickInvocation::new("@brickline/render-text").with_config("text", Expression::literal("x")),
            BrickInvocation::new("@brickline/identity"),
        ]))
        .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].annotation_type, AnnotationType::Warning);
        assert_eq!(found[0].position.path, "pipeline.0");
    }
}
