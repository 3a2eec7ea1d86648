use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use brickline_types::{BrickError, Result, RootHandle, RunContext};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::expression::{ConfigValue, Expression, VALUE_KEY};

static REGISTRY_ID_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^(@[a-z0-9][a-z0-9._-]*/)?[a-z0-9][a-z0-9._/-]*$").unwrap()
});

/// Stable external identifier of a brick, resolved against the registry at
/// run time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistryId(String);

impl RegistryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `@scope/name` or bare `name`, lowercase.
    pub fn is_valid(&self) -> bool {
        REGISTRY_ID_RE.is_match(&self.0)
    }
}

impl fmt::Display for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RegistryId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RegistryId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// How a root-aware brick picks its root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootMode {
    #[default]
    Inherit,
    Element,
    Document,
}

impl RootMode {
    pub fn is_inherit(&self) -> bool {
        *self == RootMode::Inherit
    }
}

/// One step in a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrickInvocation {
    #[serde(default = "uuid::Uuid::new_v4")]
    pub instance_id: Uuid,
    #[serde(rename = "id", alias = "brickId")]
    pub brick_id: RegistryId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub config: BTreeMap<String, ConfigValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
    #[serde(default, skip_serializing_if = "RootMode::is_inherit")]
    pub root_mode: RootMode,
    /// Selector used when `root_mode` is `element`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<Expression>,
    #[serde(rename = "if", alias = "condition", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Expression>,
}

/// A pipeline nested in an invocation's config.
#[derive(Debug, Clone)]
pub struct SubPipeline<'a> {
    /// Top-level config key holding the pipeline.
    pub key: String,
    /// Dotted path of the pipeline relative to the invocation.
    pub path: String,
    pub pipeline: &'a Pipeline,
}

impl BrickInvocation {
    pub fn new(brick_id: impl Into<RegistryId>) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            brick_id: brick_id.into(),
            label: None,
            config: BTreeMap::new(),
            output_key: None,
            root_mode: RootMode::Inherit,
            root: None,
            condition: None,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn with_condition(mut self, condition: Expression) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_root(mut self, mode: RootMode, selector: Option<Expression>) -> Self {
        self.root_mode = mode;
        self.root = selector;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Every pipeline nested anywhere in this invocation's config, with paths.
    pub fn sub_pipelines(&self) -> Vec<SubPipeline<'_>> {
        let mut found = Vec::new();
        for (key, value) in &self.config {
            value.for_each_expression(&format!("config.{key}"), &mut |path, expr| {
                if let Expression::Pipeline(pipeline) = expr {
                    found.push(SubPipeline {
                        key: key.clone(),
                        path: format!("{path}.{VALUE_KEY}"),
                        pipeline,
                    });
                }
            });
        }
        found
    }
}

/// An ordered sequence of brick invocations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pipeline {
    pub steps: Vec<BrickInvocation>,
}

impl Pipeline {
    pub fn new(steps: Vec<BrickInvocation>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BrickInvocation> {
        self.steps.iter()
    }
}

impl From<Vec<BrickInvocation>> for Pipeline {
    fn from(steps: Vec<BrickInvocation>) -> Self {
        Self { steps }
    }
}

/// File-level format: a named pipeline plus its mod-scoped variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
    pub pipeline: Pipeline,
}

impl PipelineDocument {
    pub fn new(name: impl Into<String>, pipeline: Pipeline) -> Self {
        Self {
            name: name.into(),
            variables: Map::new(),
            pipeline,
        }
    }

    /// A fresh run context for this document: variables bound under `@mod`
    /// and the document name as the mod id.
    pub fn run_context(&self, root: RootHandle) -> RunContext {
        let ctx = RunContext::new(root).with_mod_variables(self.variables.clone());
        if self.name.is_empty() {
            ctx
        } else {
            ctx.with_mod_id(self.name.clone())
        }
    }

    pub fn from_json_str(source: &str) -> Result<Self> {
        serde_json::from_str(source).map_err(|e| BrickError::Config(format!("invalid pipeline JSON: {e}")))
    }

    pub fn from_yaml_str(source: &str) -> Result<Self> {
        crate::yaml::from_yaml_str(source)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        crate::yaml::to_yaml_string(self)
    }

    /// Read a document from `path`; `.yaml`/`.yml` files use the tagged YAML
    /// form, anything else is parsed as JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        if is_yaml_path(path) {
            Self::from_yaml_str(&source)
        } else {
            Self::from_json_str(&source)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let out = if is_yaml_path(path) {
            self.to_yaml_string()?
        } else {
            self.to_json_string()?
        };
        std::fs::write(path, out)?;
        Ok(())
    }
}

fn is_yaml_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}
