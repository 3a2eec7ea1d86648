use async_trait::async_trait;

use brickline_config::{is_valid_output_key, BrickInvocation, PipelineDocument};

use super::visitor::{walk_document, PipelineVisitor, VisitExtra};
use super::{Analysis, Annotation, AnnotationType, Position};

const ID: &str = "output-key";

/// Flags output keys that are not identifiers or that shadow a key already
/// in scope.
#[derive(Default)]
pub struct OutputKeyAnalysis {
    annotations: Vec<Annotation>,
}

impl OutputKeyAnalysis {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PipelineVisitor for OutputKeyAnalysis {
    fn visit_brick(&mut self, position: &Position, invocation: &BrickInvocation, extra: &VisitExtra) {
        let Some(key) = &invocation.output_key else {
            return;
        };
        let pos = position.join("outputKey");
        if !is_valid_output_key(key) {
            self.annotations.push(Annotation::new(
                ID,
                pos,
                AnnotationType::Error,
                format!("Output key '{key}' must be an identifier without the '@' prefix"),
            ));
        } else if extra.is_bound(key) {
            self.annotations.push(Annotation::new(
                ID,
                pos,
                AnnotationType::Warning,
                format!("Output key '{key}' shadows a key bound earlier"),
            ));
        }
    }
}

#[async_trait]
impl Analysis for OutputKeyAnalysis {
    fn id(&self) -> &str {
        ID
    }

    async fn run(&mut self, doc: &PipelineDocument) {
        self.annotations.clear();
        walk_document(doc, self);
    }

    fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }
}
