//! Resolution of [`Expression`]s against a [`RunContext`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use brickline_config::{ConfigValue, Expression};
use brickline_types::{BrickError, Result, RunContext};
use serde_json::{Map, Value};

use crate::templates::TemplateRenderers;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Strings that count as true in a condition, compared case-insensitively.
const TRUTHY_STRINGS: &[&str] = &["true", "t", "yes", "y", "on", "1"];

#[derive(Clone)]
pub struct ExpressionEvaluator {
    renderers: Arc<TemplateRenderers>,
    strict_references: bool,
}

impl ExpressionEvaluator {
    pub fn new(renderers: Arc<TemplateRenderers>) -> Self {
        Self {
            renderers,
            strict_references: false,
        }
    }

    /// When set, a `var` whose first segment is unbound is a
    /// [`BrickError::Reference`] instead of resolving to null.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_references = strict;
        self
    }

    pub fn renderers(&self) -> &Arc<TemplateRenderers> {
        &self.renderers
    }

    pub async fn resolve(&self, expr: &Expression, ctx: &RunContext) -> Result<Value> {
        match expr {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Var(path) => {
                let segments = parse_var_path(path)?;
                if self.strict_references && !ctx.contains(segments[0]) {
                    return Err(BrickError::Reference {
                        path: path.clone(),
                        message: format!("'{}' is not bound by a preceding step", segments[0]),
                    });
                }
                Ok(lookup_segments(&segments, &ctx.data))
            }
            Expression::Template { engine, source } => self
                .renderers
                .render(*engine, source, &ctx.data_value())
                .await
                .map(Value::String),
            // Sub-pipelines are not evaluated here; the interpreter binds them
            // as closures and the wire form stands in for schema checks.
            Expression::Pipeline(_) => Ok(expr.to_json()),
        }
    }

    /// Resolve every expression nested in `value`, keeping its shape.
    pub fn resolve_config<'a>(
        &'a self,
        value: &'a ConfigValue,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            match value {
                ConfigValue::Expression(expr) => self.resolve(expr, ctx).await,
                ConfigValue::Object(entries) => {
                    let mut out = Map::new();
                    for (key, entry) in entries {
                        out.insert(key.clone(), self.resolve_config(entry, ctx).await?);
                    }
                    Ok(Value::Object(out))
                }
                ConfigValue::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.resolve_config(item, ctx).await?);
                    }
                    Ok(Value::Array(out))
                }
            }
        })
    }

    /// Resolve an invocation's config map into the brick's input object.
    pub async fn resolve_args(
        &self,
        config: &std::collections::BTreeMap<String, ConfigValue>,
        ctx: &RunContext,
    ) -> Result<Value> {
        let mut out = Map::new();
        for (key, value) in config {
            out.insert(key.clone(), self.resolve_config(value, ctx).await?);
        }
        Ok(Value::Object(out))
    }
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new(Arc::new(TemplateRenderers::default()))
    }
}

// ---------------------------------------------------------------------------
// Variable paths
// ---------------------------------------------------------------------------

/// Split a `var` path such as `@ctx.items.0.title` or `@ctx?.title` into its
/// segments. The leading `@` and optional-chaining `?` markers are dropped.
pub fn parse_var_path(path: &str) -> Result<Vec<&str>> {
    let trimmed = path.trim();
    let body = trimmed.strip_prefix('@').unwrap_or(trimmed);
    if body.is_empty() {
        return Err(BrickError::Reference {
            path: path.to_string(),
            message: "empty variable path".into(),
        });
    }

    body.split('.')
        .map(|segment| {
            let segment = segment.strip_suffix('?').unwrap_or(segment);
            if segment.is_empty() || segment.chars().any(char::is_whitespace) {
                Err(BrickError::Reference {
                    path: path.to_string(),
                    message: format!("malformed segment '{segment}'"),
                })
            } else {
                Ok(segment)
            }
        })
        .collect()
}

/// Look up `path` in `data`. Missing segments resolve to null.
pub fn lookup_var(path: &str, data: &Map<String, Value>) -> Result<Value> {
    let segments = parse_var_path(path)?;
    Ok(lookup_segments(&segments, data))
}

fn lookup_segments(segments: &[&str], data: &Map<String, Value>) -> Value {
    let Some((first, rest)) = segments.split_first() else {
        return Value::Null;
    };
    let Some(mut current) = data.get(*first) else {
        return Value::Null;
    };
    for segment in rest {
        let next = match current {
            Value::Object(map) => map.get(*segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// Condition semantics: null, false, zero and blank strings are false;
/// strings are true only when they spell an affirmative; collections are true.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => {
            let s = s.trim();
            TRUTHY_STRINGS.iter().any(|t| s.eq_ignore_ascii_case(t))
        }
        Value::Array(_) | Value::Object(_) => true,
    }
}
