//! Static analysis of pipeline documents.
//!
//! Analyses walk the pipeline tree with a [`PipelineVisitor`] and report
//! [`Annotation`]s keyed by the dotted path of the offending node. Call
//! [`analyze`] to run a set of analyses over a document.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use brickline_config::{check_structure, PipelineDocument};
use brickline_types::Result;

use crate::registry::BrickRegistry;
use crate::templates::TemplateRenderers;

pub mod brick_ids;
pub mod output_keys;
pub mod registry;
pub mod templates;
pub mod vars;
pub mod visitor;

pub use brick_ids::BrickIdVisitor;
pub use output_keys::OutputKeyAnalysis;
pub use registry::RegistryAnalysis;
pub use templates::TemplateAnalysis;
pub use vars::VarAnalysis;
pub use visitor::{walk_document, walk_pipeline, PipelineVisitor, VisitExtra};

// ---------------------------------------------------------------------------
// Annotation types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationType {
    Error,
    Warning,
    Info,
}

impl fmt::Display for AnnotationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnnotationType::Error => "ERROR",
            AnnotationType::Warning => "WARN",
            AnnotationType::Info => "INFO",
        };
        f.write_str(s)
    }
}

/// Dotted path into a document, e.g. `pipeline.2.config.body.__value__.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub path: String,
}

impl Position {
    /// Position of the document's top-level pipeline.
    pub fn root() -> Self {
        Self {
            path: "pipeline".into(),
        }
    }

    pub fn join(&self, segment: impl fmt::Display) -> Self {
        Self {
            path: format!("{}.{segment}", self.path),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub analysis_id: String,
    pub position: Position,
    pub message: String,
    #[serde(rename = "type")]
    pub annotation_type: AnnotationType,
}

impl Annotation {
    pub fn new(
        analysis_id: &str,
        position: Position,
        annotation_type: AnnotationType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            analysis_id: analysis_id.to_string(),
            position,
            message: message.into(),
            annotation_type,
        }
    }

    pub fn is_error(&self) -> bool {
        self.annotation_type == AnnotationType::Error
    }
}

// ---------------------------------------------------------------------------
// Analysis trait
// ---------------------------------------------------------------------------

/// A read-only pass over a document that accumulates annotations.
///
/// `run` replaces the annotations of any previous run.
#[async_trait]
pub trait Analysis: Send + Sync {
    fn id(&self) -> &str;

    async fn run(&mut self, doc: &PipelineDocument);

    fn annotations(&self) -> &[Annotation];
}

/// The built-in analyses, sharing the interpreter's registry and renderers.
pub fn default_analyses(
    registry: Arc<BrickRegistry>,
    renderers: Arc<TemplateRenderers>,
) -> Vec<Box<dyn Analysis>> {
    vec![
        Box::new(RegistryAnalysis::new(registry)),
        Box::new(TemplateAnalysis::new(renderers)),
        Box::new(VarAnalysis::new()),
        Box::new(OutputKeyAnalysis::new()),
    ]
}

/// Check the document's structure against the same nesting limit the
/// interpreter enforces, then run each analysis in order and collect their
/// annotations.
pub async fn analyze(
    doc: &PipelineDocument,
    analyses: &mut [Box<dyn Analysis>],
    max_depth: usize,
) -> Result<Vec<Annotation>> {
    check_structure(&doc.pipeline, max_depth)?;
    let mut annotations = Vec::new();
    for analysis in analyses.iter_mut() {
        analysis.run(doc).await;
        tracing::debug!(
            analysis = analysis.id(),
            count = analysis.annotations().len(),
            "Analysis finished"
        );
        annotations.extend_from_slice(analysis.annotations());
    }
    Ok(annotations)
}

pub fn has_errors(annotations: &[Annotation]) -> bool {
    annotations.iter().any(Annotation::is_error)
}
