//! Tree walker over pipelines and their nested sub-pipelines.

use uuid::Uuid;

use brickline_config::{BrickInvocation, Expression, Pipeline, PipelineDocument};
use brickline_types::MOD_VARIABLES_KEY;

use super::Position;

/// Ancestry of the node being visited.
#[derive(Debug, Clone, Default)]
pub struct VisitExtra {
    /// Instance ids of the enclosing invocations, outermost first.
    pub ancestors: Vec<Uuid>,
    /// Config keys of the enclosing sub-pipelines, outermost first.
    pub branch_path: Vec<String>,
    /// Output keys bound before the current step, including by ancestors.
    pub bound_keys: Vec<String>,
}

impl VisitExtra {
    /// Nesting depth: zero for the top-level pipeline.
    pub fn depth(&self) -> usize {
        self.ancestors.len()
    }

    pub fn is_bound(&self, key: &str) -> bool {
        self.bound_keys.iter().any(|k| k == key)
    }
}

/// Callbacks invoked by [`walk_pipeline`]. Traversal into nested pipelines is
/// done by the walker, so implementors only handle the nodes they care about.
pub trait PipelineVisitor {
    fn visit_pipeline(&mut self, _position: &Position, _pipeline: &Pipeline, _extra: &VisitExtra) {}

    fn visit_brick(&mut self, _position: &Position, _invocation: &BrickInvocation, _extra: &VisitExtra) {}
}

/// Visit `pipeline`, each of its invocations in order, and every pipeline
/// nested in their config, depth first.
pub fn walk_pipeline<V: PipelineVisitor + ?Sized>(
    pipeline: &Pipeline,
    position: &Position,
    extra: &VisitExtra,
    visitor: &mut V,
) {
    visitor.visit_pipeline(position, pipeline, extra);

    let mut scope = extra.clone();
    for (index, step) in pipeline.iter().enumerate() {
        let step_position = position.join(index);
        visitor.visit_brick(&step_position, step, &scope);

        for sub in step.sub_pipelines() {
            let mut child = scope.clone();
            child.ancestors.push(step.instance_id);
            child.branch_path.push(sub.key.clone());
            walk_pipeline(sub.pipeline, &step_position.join(&sub.path), &child, visitor);
        }

        if let Some(key) = &step.output_key {
            scope.bound_keys.push(key.clone());
        }
    }
}

/// Walk a document's pipeline with its mod variables in scope.
pub fn walk_document<V: PipelineVisitor + ?Sized>(doc: &PipelineDocument, visitor: &mut V) {
    let extra = VisitExtra {
        bound_keys: vec![MOD_VARIABLES_KEY.to_string()],
        ..Default::default()
    };
    walk_pipeline(&doc.pipeline, &Position::root(), &extra, visitor);
}

/// Every non-pipeline expression of `invocation` with its position: the
/// condition, the root selector, and each config leaf.
pub fn invocation_expressions<'a>(
    position: &Position,
    invocation: &'a BrickInvocation,
) -> Vec<(Position, &'a Expression)> {
    let mut found = Vec::new();
    if let Some(condition) = &invocation.condition {
        found.push((position.join("if"), condition));
    }
    if let Some(root) = &invocation.root {
        found.push((position.join("root"), root));
    }
    for (key, value) in &invocation.config {
        value.for_each_expression(&format!("config.{key}"), &mut |path, expr| {
            if !matches!(expr, Expression::Pipeline(_)) {
                found.push((position.join(path), expr));
            }
        });
    }
    found
}
