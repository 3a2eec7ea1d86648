//! The run context threaded through one pipeline execution.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::page::RootHandle;

/// Data key under which mod-scoped variables are bound at pipeline entry.
pub const MOD_VARIABLES_KEY: &str = "mod";

/// Identifies one sub-pipeline invocation for trace correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchTag {
    pub key: String,
    pub counter: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub mod_id: Option<String>,
    pub branches: Vec<BranchTag>,
}

impl RunMetadata {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mod_id: None,
            branches: Vec::new(),
        }
    }

    /// Nesting depth: zero for the top-level pipeline.
    pub fn depth(&self) -> usize {
        self.branches.len()
    }
}

impl Default for RunMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulator of bound outputs plus the current root and run metadata.
///
/// Cloning yields an independent copy; sub-pipelines receive one via
/// [`branch`](RunContext::branch) so their bindings never leak back.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub data: Map<String, Value>,
    pub root: RootHandle,
    pub meta: RunMetadata,
}

impl RunContext {
    pub fn new(root: RootHandle) -> Self {
        Self {
            data: Map::new(),
            root,
            meta: RunMetadata::new(),
        }
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.meta.run_id = run_id;
        self
    }

    pub fn with_mod_id(mut self, mod_id: impl Into<String>) -> Self {
        self.meta.mod_id = Some(mod_id.into());
        self
    }

    /// Bind mod-scoped variables under [`MOD_VARIABLES_KEY`].
    pub fn with_mod_variables(mut self, variables: Map<String, Value>) -> Self {
        self.data
            .insert(MOD_VARIABLES_KEY.to_string(), Value::Object(variables));
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.bind(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Bind a value for all subsequent readers of this context.
    pub fn bind(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if self.data.contains_key(&key) {
            tracing::debug!(key = %key, "Rebinding existing context key");
        }
        self.data.insert(key, value);
    }

    /// Copy of this context for a sub-pipeline, tagged with `tag`.
    pub fn branch(&self, tag: BranchTag) -> RunContext {
        let mut child = self.clone();
        child.meta.branches.push(tag);
        child
    }

    /// The data map as a JSON object, as seen by template engines.
    pub fn data_value(&self) -> Value {
        Value::Object(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::StaticDocument;
    use serde_json::json;

    fn ctx() -> RunContext {
        RunContext::new(RootHandle::document(StaticDocument::default()))
    }

    #[test]
    fn bind_and_get() {
        let mut ctx = ctx();
        ctx.bind("answer", json!(42));
        assert_eq!(ctx.get("answer"), Some(&json!(42)));
        assert!(ctx.contains("answer"));
        assert!(!ctx.contains("missing"));
    }

    #[test]
    fn mod_variables_bound_under_mod_key() {
        let mut vars = Map::new();
        vars.insert("threshold".into(), json!(3));
        let ctx = ctx().with_mod_variables(vars);
        assert_eq!(ctx.get(MOD_VARIABLES_KEY), Some(&json!({"threshold": 3})));
    }

    #[test]
    fn branch_is_isolated_from_parent() {
        let parent = ctx().with_value("a", json!(1));
        let mut child = parent.branch(BranchTag {
            key: "body".into(),
            counter: 0,
        });
        child.bind("b", json!(2));
        child.bind("a", json!(99));

        assert_eq!(parent.get("a"), Some(&json!(1)));
        assert!(parent.get("b").is_none());
        assert_eq!(child.meta.depth(), 1);
        assert_eq!(parent.meta.depth(), 0);
        assert_eq!(child.meta.run_id, parent.meta.run_id);
    }

    #[test]
    fn data_value_is_object() {
        let ctx = ctx().with_value("x", json!("y"));
        assert_eq!(ctx.data_value(), json!({"x": "y"}));
    }

    #[test]
    fn branch_tag_serialization() {
        let tag = BranchTag {
            key: "if".into(),
            counter: 2,
        };
        assert_eq!(
            serde_json::to_value(&tag).unwrap(),
            json!({"key": "if", "counter": 2})
        );
    }
}
