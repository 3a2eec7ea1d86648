//! Template checks: unsupported engines, syntax errors, and plain strings
//! that look like they were meant to be templates.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use serde_json::Value;

use brickline_config::{BrickInvocation, Expression, PipelineDocument, TemplateEngine};

use super::visitor::{invocation_expressions, walk_document, PipelineVisitor, VisitExtra};
use super::{Analysis, Annotation, AnnotationType, Position};
use crate::templates::TemplateRenderers;

static TEMPLATE_MARKERS_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\{\{.*?\}\}|\{%.*?%\}").unwrap());

const ID: &str = "template";

pub struct TemplateAnalysis {
    renderers: Arc<TemplateRenderers>,
    allowed: Vec<TemplateEngine>,
    annotations: Vec<Annotation>,
}

impl TemplateAnalysis {
    /// Allow every engine `renderers` can render.
    pub fn new(renderers: Arc<TemplateRenderers>) -> Self {
        let allowed = TemplateEngine::ALL
            .iter()
            .copied()
            .filter(|e| renderers.has(*e))
            .collect();
        Self {
            renderers,
            allowed,
            annotations: Vec::new(),
        }
    }

    pub fn with_allowed(mut self, allowed: Vec<TemplateEngine>) -> Self {
        self.allowed = allowed;
        self
    }

    fn check(&mut self, position: Position, expr: &Expression) {
        match expr {
            Expression::Template { engine, source } => {
                if !self.allowed.contains(engine) {
                    self.annotations.push(Annotation::new(
                        ID,
                        position,
                        AnnotationType::Error,
                        format!("Unsupported template engine '{engine}'"),
                    ));
                } else if let Err(e) = self.renderers.check(*engine, source) {
                    self.annotations
                        .push(Annotation::new(ID, position, AnnotationType::Error, e.to_string()));
                }
            }
            Expression::Literal(Value::String(text)) if TEMPLATE_MARKERS_RE.is_match(text) => {
                self.annotations.push(Annotation::new(
                    ID,
                    position,
                    AnnotationType::Warning,
                    "Text looks like a template but is a plain string; tag it with a template engine to interpolate it",
                ));
            }
            _ => {}
        }
    }
}

impl PipelineVisitor for TemplateAnalysis {
    fn visit_brick(&mut self, position: &Position, invocation: &BrickInvocation, _extra: &VisitExtra) {
        for (pos, expr) in invocation_expressions(position, invocation) {
            self.check(pos, expr);
        }
    }
}

#[async_trait]
impl Analysis for TemplateAnalysis {
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
