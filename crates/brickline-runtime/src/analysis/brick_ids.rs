use std::collections::BTreeSet;

use brickline_config::{BrickInvocation, Pipeline, RegistryId};

use super::visitor::{walk_pipeline, PipelineVisitor, VisitExtra};
use super::Position;

/// Collects the id of every brick used anywhere in a pipeline.
#[derive(Debug, Default)]
pub struct BrickIdVisitor {
    ids: BTreeSet<RegistryId>,
}

impl BrickIdVisitor {
    pub fn collect_brick_ids(pipeline: &Pipeline) -> BTreeSet<RegistryId> {
        let mut visitor = Self::default();
        walk_pipeline(pipeline, &Position::root(), &VisitExtra::default(), &mut visitor);
        visitor.ids
    }
}

impl PipelineVisitor for BrickIdVisitor {
    fn visit_brick(&mut self, _position: &Position, invocation: &BrickInvocation, _extra: &VisitExtra) {
        self.ids.insert(invocation.brick_id.clone());
    }
}
