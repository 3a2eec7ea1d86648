//! Variable reference checks against the keys bound before each step.

use async_trait::async_trait;

use brickline_config::{BrickInvocation, Expression, PipelineDocument};

use super::visitor::{invocation_expressions, walk_document, PipelineVisitor, VisitExtra};
use super::{Analysis, Annotation, AnnotationType, Position};
use crate::evaluator::parse_var_path;

const ID: &str = "var";

/// Flags malformed `var` paths and references to keys no preceding step
/// binds. Inside sub-pipelines an unknown key is only a warning, since the
/// enclosing brick may bind it when it runs the pipeline.
#[derive(Default)]
pub struct VarAnalysis {
    annotations: Vec<Annotation>,
}

impl VarAnalysis {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PipelineVisitor for VarAnalysis {
    fn visit_brick(&mut self, position: &Position, invocation: &BrickInvocation, extra: &VisitExtra) {
        for (pos, expr) in invocation_expressions(position, invocation) {
            let Expression::Var(path) = expr else {
                continue;
            };
            let segments = match parse_var_path(path) {
                Ok(segments) => segments,
                Err(e) => {
                    self.annotations
                        .push(Annotation::new(ID, pos, AnnotationType::Error, e.to_string()));
                    continue;
                }
            };
            if extra.is_bound(segments[0]) {
                continue;
            }
            let (annotation_type, message) = if extra.depth() == 0 {
                (
                    AnnotationType::Error,
                    format!("Variable '{path}' is not bound by a preceding step"),
                )
            } else {
                (
                    AnnotationType::Warning,
                    format!("Variable '{path}' is not bound by a preceding step or ancestor"),
                )
            };
            self.annotations
                .push(Annotation::new(ID, pos, annotation_type, message));
        }
    }
}

#[async_trait]
impl Analysis for VarAnalysis {
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
