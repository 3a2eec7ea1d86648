//! Structural checks that must pass before a pipeline is analyzed or run.

use std::collections::HashSet;
use std::sync::LazyLock;

use brickline_types::{BrickError, Result};
use uuid::Uuid;

use crate::model::Pipeline;

/// Default limit on sub-pipeline nesting.
pub const DEFAULT_MAX_DEPTH: usize = 32;

static OUTPUT_KEY_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Output keys are plain identifiers, written without the `@` sigil.
pub fn is_valid_output_key(key: &str) -> bool {
    OUTPUT_KEY_RE.is_match(key)
}

/// Reject pipelines whose instance ids repeat anywhere in the tree, or whose
/// nesting exceeds `max_depth`.
pub fn check_structure(pipeline: &Pipeline, max_depth: usize) -> Result<()> {
    let mut seen = HashSet::new();
    check_level(pipeline, 0, max_depth, &mut seen)
}

fn check_level(
    pipeline: &Pipeline,
    depth: usize,
    max_depth: usize,
    seen: &mut HashSet<Uuid>,
) -> Result<()> {
    if depth > max_depth {
        return Err(BrickError::InvalidPipeline(format!(
            "sub-pipelines nested deeper than {max_depth} levels"
        )));
    }
    for step in pipeline.iter() {
        if !seen.insert(step.instance_id) {
            return Err(BrickError::InvalidPipeline(format!(
                "duplicate instanceId {} (brick '{}')",
                step.instance_id, step.brick_id
            )));
        }
        for sub in step.sub_pipelines() {
            check_level(sub.pipeline, depth + 1, max_depth, seen)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Expression;
    use crate::model::BrickInvocation;

    fn nest(levels: usize) -> Pipeline {
        let mut pipeline = Pipeline::new(vec![BrickInvocation::new("@brickline/identity")]);
        for _ in 0..levels {
            pipeline = Pipeline::new(vec![BrickInvocation::new("@brickline/for-each")
                .with_config("body", Expression::Pipeline(pipeline))]);
        }
        pipeline
    }

    #[test]
    fn unique_ids_pass() {
        assert!(check_structure(&nest(3), DEFAULT_MAX_DEPTH).is_ok());
    }

    #[test]
    fn duplicate_id_in_nested_pipeline_rejected() {
        let child = BrickInvocation::new("@brickline/identity");
        let mut parent = BrickInvocation::new("@brickline/for-each")
            .with_config("body", Expression::Pipeline(Pipeline::new(vec![child.clone()])));
        parent.instance_id = child.instance_id;

        let err = check_structure(&Pipeline::new(vec![parent]), DEFAULT_MAX_DEPTH).unwrap_err();
        assert!(matches!(err, BrickError::InvalidPipeline(ref m) if m.contains("duplicate")));
    }

    #[test]
    fn depth_limit_enforced() {
        assert!(check_structure(&nest(2), 2).is_ok());
        let err = check_structure(&nest(3), 2).unwrap_err();
        assert!(err.to_string().contains("nested deeper"), "{err}");
    }

    #[test]
    fn output_key_syntax() {
        assert!(is_valid_output_key("ctx"));
        assert!(is_valid_output_key("_tmp2"));
        assert!(!is_valid_output_key("@ctx"));
        assert!(!is_valid_output_key("2fast"));
        assert!(!is_valid_output_key("a.b"));
        assert!(!is_valid_output_key(""));
    }
}
