//! The brick contract: the unit of work a pipeline step invokes.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use brickline_types::{BrickError, Result, RootHandle, RunContext};

use crate::interpreter::PipelineClosure;

/// The behavioral category of a brick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrickKind {
    /// Reads data from the page; root-aware by default.
    Reader,
    /// Performs side effects; its output is discarded.
    Effect,
    /// Computes a value from its input.
    Transformer,
    /// Produces the final rendered output; ends the pipeline.
    Renderer,
}

impl fmt::Display for BrickKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BrickKind::Reader => "reader",
            BrickKind::Effect => "effect",
            BrickKind::Transformer => "transformer",
            BrickKind::Renderer => "renderer",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Brick trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Brick: Send + Sync {
    /// Registry id, e.g. `@brickline/uppercase`.
    fn id(&self) -> &str;

    fn kind(&self) -> BrickKind;

    fn description(&self) -> &str {
        ""
    }

    /// JSON Schema (draft 7) the resolved input must satisfy.
    fn input_schema(&self) -> Value;

    fn output_schema(&self) -> Option<Value> {
        None
    }

    /// Whether the brick can run in the current context. Unavailable bricks
    /// are skipped, not failed.
    async fn is_available(&self, _ctx: &RunContext) -> Result<bool> {
        Ok(true)
    }

    /// Pure bricks have no side effects and depend only on their input.
    async fn is_pure(&self) -> bool {
        false
    }

    /// Root-aware bricks receive a resolved root in [`BrickOptions::root`].
    async fn is_root_aware(&self) -> bool {
        self.kind() == BrickKind::Reader
    }

    async fn run(&self, input: BrickInput, options: &BrickOptions) -> Result<Value>;
}

// ---------------------------------------------------------------------------
// Input and options
// ---------------------------------------------------------------------------

/// A brick's resolved arguments.
///
/// `value` is the JSON object validated against the input schema; nested
/// pipelines appear there in wire form and are callable via [`pipeline`].
///
/// [`pipeline`]: BrickInput::pipeline
#[derive(Debug, Clone, Default)]
pub struct BrickInput {
    value: Value,
    pipelines: BTreeMap<String, PipelineClosure>,
}

impl BrickInput {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            pipelines: BTreeMap::new(),
        }
    }

    pub(crate) fn with_pipelines(mut self, pipelines: BTreeMap<String, PipelineClosure>) -> Self {
        self.pipelines = pipelines;
        self
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.value.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Callable form of the sub-pipeline under config `key`. Pipelines nested
    /// below the top level use their dotted path, e.g. `branches.0`.
    pub fn pipeline(&self, key: &str) -> Option<&PipelineClosure> {
        self.pipelines.get(key)
    }

    pub fn pipeline_keys(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    /// Like [`pipeline`](Self::pipeline) but a business error when absent.
    pub fn require_pipeline(&self, key: &str) -> Result<&PipelineClosure> {
        self.pipeline(key)
            .ok_or_else(|| BrickError::business(format!("'{key}' must be a pipeline")))
    }
}

/// Everything a brick sees besides its input.
#[derive(Debug, Clone)]
pub struct BrickOptions {
    pub ctx: RunContext,
    /// Set only for root-aware bricks.
    pub root: Option<RootHandle>,
    pub instance_id: Uuid,
    pub cancel: CancellationToken,
}

impl BrickOptions {
    pub fn require_root(&self) -> Result<&RootHandle> {
        self.root
            .as_ref()
            .ok_or_else(|| BrickError::Application("brick ran without a resolved root".into()))
    }
}
