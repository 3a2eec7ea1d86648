//! Expressions and config values, and their JSON wire form.
//!
//! A non-literal expression is written as
//! `{"__type__": "<kind>", "__value__": <payload>}`. Every other JSON value is
//! a literal. Objects carrying `__type__` that do not match one of the known
//! shapes are rejected when loading, never at run time.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::Pipeline;

pub const TYPE_KEY: &str = "__type__";
pub const VALUE_KEY: &str = "__value__";

/// Template dialects a `template` expression may be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateEngine {
    Mustache,
    Nunjucks,
    Handlebars,
}

impl TemplateEngine {
    pub const ALL: [TemplateEngine; 3] = [
        TemplateEngine::Mustache,
        TemplateEngine::Nunjucks,
        TemplateEngine::Handlebars,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TemplateEngine::Mustache => "mustache",
            TemplateEngine::Nunjucks => "nunjucks",
            TemplateEngine::Handlebars => "handlebars",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "mustache" => Some(TemplateEngine::Mustache),
            "nunjucks" => Some(TemplateEngine::Nunjucks),
            "handlebars" => Some(TemplateEngine::Handlebars),
            _ => None,
        }
    }
}

impl fmt::Display for TemplateEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A config value that is resolved against the run context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Expression {
    Literal(Value),
    Var(String),
    Template {
        engine: TemplateEngine,
        source: String,
    },
    Pipeline(Pipeline),
}

impl Expression {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn var(path: impl Into<String>) -> Self {
        Expression::Var(path.into())
    }

    pub fn template(engine: TemplateEngine, source: impl Into<String>) -> Self {
        Expression::Template {
            engine,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Expression::Literal(_) => "literal",
            Expression::Var(_) => "var",
            Expression::Template { engine, .. } => engine.as_str(),
            Expression::Pipeline(_) => "pipeline",
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Expression::Literal(_))
    }

    /// The wire form of this expression.
    pub fn to_json(&self) -> Value {
        match self {
            Expression::Literal(value) => value.clone(),
            Expression::Var(path) => tagged("var", Value::String(path.clone())),
            Expression::Template { engine, source } => {
                tagged(engine.as_str(), Value::String(source.clone()))
            }
            Expression::Pipeline(pipeline) => tagged(
                "pipeline",
                serde_json::to_value(pipeline).unwrap_or_default(),
            ),
        }
    }
}

fn tagged(kind: &str, payload: Value) -> Value {
    let mut map = Map::new();
    map.insert(TYPE_KEY.to_string(), Value::String(kind.to_string()));
    map.insert(VALUE_KEY.to_string(), payload);
    Value::Object(map)
}

/// Returns the kind name if `map` is written in the tagged expression form.
pub fn expression_kind(map: &Map<String, Value>) -> Option<&str> {
    map.get(TYPE_KEY).and_then(Value::as_str)
}

fn parse_tagged(map: &Map<String, Value>) -> Result<Expression, String> {
    let kind = map
        .get(TYPE_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("'{TYPE_KEY}' must be a string"))?;
    if map.len() != 2 || !map.contains_key(VALUE_KEY) {
        return Err(format!(
            "expression objects must contain exactly '{TYPE_KEY}' and '{VALUE_KEY}'"
        ));
    }
    let payload = &map[VALUE_KEY];

    if kind == "var" {
        let path = payload
            .as_str()
            .ok_or_else(|| "var expression must hold a string path".to_string())?;
        return Ok(Expression::Var(path.to_string()));
    }
    if let Some(engine) = TemplateEngine::from_tag(kind) {
        let source = payload
            .as_str()
            .ok_or_else(|| format!("{kind} expression must hold a template string"))?;
        return Ok(Expression::Template {
            engine,
            source: source.to_string(),
        });
    }
    if kind == "pipeline" {
        let pipeline: Pipeline = serde_json::from_value(payload.clone())
            .map_err(|e| format!("invalid pipeline expression: {e}"))?;
        return Ok(Expression::Pipeline(pipeline));
    }
    Err(format!("unknown expression type '{kind}'"))
}

impl TryFrom<Value> for Expression {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match &value {
            Value::Object(map) if map.contains_key(TYPE_KEY) => parse_tagged(map),
            _ => Ok(Expression::Literal(value)),
        }
    }
}

impl From<Expression> for Value {
    fn from(expr: Expression) -> Self {
        expr.to_json()
    }
}

/// A brick config value: an expression, or an object/array that may contain
/// expressions at any depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum ConfigValue {
    Expression(Expression),
    Object(BTreeMap<String, ConfigValue>),
    Array(Vec<ConfigValue>),
}

impl ConfigValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        ConfigValue::Expression(Expression::Literal(value.into()))
    }

    pub fn as_expression(&self) -> Option<&Expression> {
        match self {
            ConfigValue::Expression(expr) => Some(expr),
            _ => None,
        }
    }

    /// Visit every expression reachable from this value together with its
    /// dotted path, `prefix` being the path of this value.
    pub fn for_each_expression<'a>(&'a self, prefix: &str, f: &mut dyn FnMut(&str, &'a Expression)) {
        match self {
            ConfigValue::Expression(expr) => f(prefix, expr),
            ConfigValue::Object(map) => {
                for (key, value) in map {
                    value.for_each_expression(&format!("{prefix}.{key}"), f);
                }
            }
            ConfigValue::Array(items) => {
                for (index, value) in items.iter().enumerate() {
                    value.for_each_expression(&format!("{prefix}.{index}"), f);
                }
            }
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ConfigValue::Expression(expr) => expr.to_json(),
            ConfigValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            ConfigValue::Array(items) => Value::Array(items.iter().map(ConfigValue::to_json).collect()),
        }
    }
}

impl From<Expression> for ConfigValue {
    fn from(expr: Expression) -> Self {
        ConfigValue::Expression(expr)
    }
}

impl TryFrom<Value> for ConfigValue {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) if map.contains_key(TYPE_KEY) => {
                parse_tagged(&map).map(ConfigValue::Expression)
            }
            Value::Object(map) => {
                let mut out = BTreeMap::new();
                for (key, value) in map {
                    let parsed = ConfigValue::try_from(value).map_err(|e| format!("{key}: {e}"))?;
                    out.insert(key, parsed);
                }
                Ok(ConfigValue::Object(out))
            }
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| ConfigValue::try_from(v).map_err(|e| format!("{i}: {e}")))
                .collect::<Result<Vec<_>, _>>()
                .map(ConfigValue::Array),
            scalar => Ok(ConfigValue::Expression(Expression::Literal(scalar))),
        }
    }
}

impl From<ConfigValue> for Value {
    fn from(value: ConfigValue) -> Self {
        value.to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_json_is_literal() {
        let expr: Expression = serde_json::from_value(json!({"a": 1})).unwrap();
        assert_eq!(expr, Expression::literal(json!({"a": 1})));
    }

    #[test]
    fn var_expression_from_wire() {
        let expr: Expression =
            serde_json::from_value(json!({"__type__": "var", "__value__": "@ctx.title"})).unwrap();
        assert_eq!(expr, Expression::var("@ctx.title"));
    }

    #[test]
    fn template_expression_from_wire() {
        let expr: Expression =
            serde_json::from_value(json!({"__type__": "nunjucks", "__value__": "{{ x }}"})).unwrap();
        assert_eq!(expr, Expression::template(TemplateEngine::Nunjucks, "{{ x }}"));
        assert_eq!(expr.kind(), "nunjucks");
    }

    #[test]
    fn unknown_type_rejected() {
        let result: Result<Expression, _> =
            serde_json::from_value(json!({"__type__": "jinja", "__value__": "{{ x }}"}));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("unknown expression type"), "{err}");
    }

    #[test]
    fn ambiguous_object_rejected() {
        let result: Result<Expression, _> = serde_json::from_value(
            json!({"__type__": "var", "__value__": "@a", "extra": true}),
        );
        assert!(result.is_err());

        let missing_value: Result<Expression, _> =
            serde_json::from_value(json!({"__type__": "var"}));
        assert!(missing_value.is_err());
    }

    #[test]
    fn var_payload_must_be_string() {
        let result: Result<Expression, _> =
            serde_json::from_value(json!({"__type__": "var", "__value__": 3}));
        assert!(result.is_err());
    }

    #[test]
    fn pipeline_expression_from_wire() {
        let expr: Expression = serde_json::from_value(json!({
            "__type__": "pipeline",
            "__value__": [{"id": "@brickline/identity"}]
        }))
        .unwrap();
        match expr {
            Expression::Pipeline(p) => {
                assert_eq!(p.len(), 1);
                assert_eq!(p.steps[0].brick_id.as_str(), "@brickline/identity");
            }
            other => panic!("expected pipeline, got {other:?}"),
        }
    }

    #[test]
    fn wire_form_serialization() {
        let value = serde_json::to_value(Expression::var("@x")).unwrap();
        assert_eq!(value, json!({"__type__": "var", "__value__": "@x"}));
        let literal = serde_json::to_value(Expression::literal(5)).unwrap();
        assert_eq!(literal, json!(5));
    }

    #[test]
    fn nested_config_value_parses_expressions() {
        let value: ConfigValue = serde_json::from_value(json!({
            "headers": {"auth": {"__type__": "var", "__value__": "@token"}},
            "items": [1, {"__type__": "mustache", "__value__": "{{ name }}"}]
        }))
        .unwrap();

        let mut seen = Vec::new();
        value.for_each_expression("config", &mut |path, expr| {
            if !expr.is_literal() {
                seen.push((path.to_string(), expr.kind()));
            }
        });
        assert_eq!(
            seen,
            vec![
                ("config.headers.auth".to_string(), "var"),
                ("config.items.1".to_string(), "mustache"),
            ]
        );
    }

    #[test]
    fn nested_invalid_expression_reports_path() {
        let result: Result<ConfigValue, _> = serde_json::from_value(json!({
            "outer": [{"__type__": "bogus", "__value__": ""}]
        }));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("outer: 0:"), "{err}");
    }

    #[test]
    fn engine_tags_round_trip() {
        for engine in TemplateEngine::ALL {
            assert_eq!(TemplateEngine::from_tag(engine.as_str()), Some(engine));
        }
        assert_eq!(TemplateEngine::from_tag("jinja"), None);
    }
}
