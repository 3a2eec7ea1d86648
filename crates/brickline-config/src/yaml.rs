//! Tagged YAML form of pipeline documents.
//!
//! Expressions are written with custom tags instead of the JSON wire objects:
//!
//! ```yaml
//! pipeline:
//!   - id: "@brickline/uppercase"
//!     config:
//!       text: !var "@ctx.title"
//!   - id: "@brickline/for-each"
//!     config:
//!       body: !pipeline
//!         - id: "@brickline/log"
//!           config:
//!             message: !mustache "item {{ element }}"
//! ```
//!
//! Loading maps each tagged node to its wire object before deserializing;
//! writing maps wire objects back to tagged nodes, so both directions agree.

use brickline_types::{BrickError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use serde_yaml::value::{Tag, TaggedValue};
use serde_yaml::Value as YamlValue;

use crate::expression::{expression_kind, TemplateEngine, TYPE_KEY, VALUE_KEY};

/// Tags accepted on load, besides the template engine names.
const VAR_TAG: &str = "var";
const PIPELINE_TAG: &str = "pipeline";

fn is_string_tag(name: &str) -> bool {
    name == VAR_TAG || TemplateEngine::from_tag(name).is_some()
}

/// Parse tagged YAML into `T`.
pub fn from_yaml_str<T: DeserializeOwned>(source: &str) -> Result<T> {
    let yaml: YamlValue = serde_yaml::from_str(source)
        .map_err(|e| BrickError::Config(format!("YAML parse error: {e}")))?;
    let json = yaml_to_json(yaml)?;
    serde_json::from_value(json).map_err(|e| BrickError::Config(format!("invalid pipeline: {e}")))
}

/// Serialize `value` to tagged YAML.
pub fn to_yaml_string<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_value(value)?;
    serde_yaml::to_string(&json_to_yaml(json))
        .map_err(|e| BrickError::Config(format!("YAML write error: {e}")))
}

fn yaml_to_json(value: YamlValue) -> Result<Value> {
    match value {
        YamlValue::Null => Ok(Value::Null),
        YamlValue::Bool(b) => Ok(Value::Bool(b)),
        YamlValue::Number(n) => Ok(if let Some(i) = n.as_i64() {
            Value::from(i)
        } else if let Some(u) = n.as_u64() {
            Value::from(u)
        } else {
            n.as_f64()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }),
        YamlValue::String(s) => Ok(Value::String(s)),
        YamlValue::Sequence(items) => items
            .into_iter()
            .map(yaml_to_json)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        YamlValue::Mapping(mapping) => {
            let mut map = Map::new();
            for (key, value) in mapping {
                let key = match key {
                    YamlValue::String(s) => s,
                    YamlValue::Number(n) => n.to_string(),
                    YamlValue::Bool(b) => b.to_string(),
                    other => {
                        return Err(BrickError::Config(format!(
                            "unsupported mapping key: {other:?}"
                        )))
                    }
                };
                map.insert(key, yaml_to_json(value)?);
            }
            Ok(Value::Object(map))
        }
        YamlValue::Tagged(tagged) => tagged_to_json(*tagged),
    }
}

fn tagged_to_json(tagged: TaggedValue) -> Result<Value> {
    let tag = tagged.tag.to_string();
    let name = tag.trim_start_matches('!');

    let payload = if is_string_tag(name) {
        match tagged.value {
            YamlValue::String(s) => Value::String(s),
            other => {
                return Err(BrickError::Config(format!(
                    "!{name} expects a string, got {other:?}"
                )))
            }
        }
    } else if name == PIPELINE_TAG {
        yaml_to_json(tagged.value)?
    } else {
        return Err(BrickError::Config(format!("unsupported YAML tag '{tag}'")));
    };

    let mut map = Map::new();
    map.insert(TYPE_KEY.to_string(), Value::String(name.to_string()));
    map.insert(VALUE_KEY.to_string(), payload);
    Ok(Value::Object(map))
}

fn json_to_yaml(value: Value) -> YamlValue {
    match value {
        Value::Null => YamlValue::Null,
        Value::Bool(b) => YamlValue::Bool(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                YamlValue::Number(i.into())
            } else if let Some(u) = n.as_u64() {
                YamlValue::Number(u.into())
            } else {
                YamlValue::Number(n.as_f64().unwrap_or_default().into())
            }
        }
        Value::String(s) => YamlValue::String(s),
        Value::Array(items) => YamlValue::Sequence(items.into_iter().map(json_to_yaml).collect()),
        Value::Object(mut map) => {
            let kind = expression_kind(&map).map(str::to_string);
            if let Some(kind) = kind {
                if map.len() == 2 && (is_string_tag(&kind) || kind == PIPELINE_TAG) {
                    if let Some(payload) = map.remove(VALUE_KEY) {
                        return YamlValue::Tagged(Box::new(TaggedValue {
                            tag: Tag::new(kind),
                            value: json_to_yaml(payload),
                        }));
                    }
                }
            }
            let mut mapping = serde_yaml::Mapping::new();
            for (key, value) in map {
                mapping.insert(YamlValue::String(key), json_to_yaml(value));
            }
            YamlValue::Mapping(mapping)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{ConfigValue, Expression};
    use crate::model::{BrickInvocation, Pipeline, PipelineDocument, RootMode};

    const SAMPLE: &str = r##"
name: page-title
variables:
  greeting: hi
pipeline:
  - id: "@brickline/page-metadata"
    outputKey: ctx
  - id: "@brickline/uppercase"
    config:
      text: !var "@ctx.title"
    outputKey: upper
  - id: "@brickline/for-each"
    if: !nunjucks "{{ upper }}"
    config:
      elements: [1, 2]
      body: !pipeline
        - id: "@brickline/log"
          config:
            message: !mustache "item {{ element }}"
            level: !handlebars "{{#if debug}}debug{{else}}info{{/if}}"
  - id: "@brickline/render-text"
    rootMode: element
    root: "#main"
    config:
      text: !var "@upper"
"##;

    #[test]
    fn tags_deserialize_into_expressions() {
        let doc: PipelineDocument = from_yaml_str(SAMPLE).unwrap();
        assert_eq!(doc.name, "page-title");
        assert_eq!(doc.variables["greeting"], "hi");
        assert_eq!(doc.pipeline.len(), 4);

        let upper = &doc.pipeline.steps[1];
        assert_eq!(
            upper.config["text"],
            ConfigValue::Expression(Expression::var("@ctx.title"))
        );

        let each = &doc.pipeline.steps[2];
        assert_eq!(
            each.condition,
            Some(Expression::template(TemplateEngine::Nunjucks, "{{ upper }}"))
        );
        let body = match each.config["body"].as_expression() {
            Some(Expression::Pipeline(p)) => p,
            other => panic!("expected pipeline, got {other:?}"),
        };
        assert_eq!(
            body.steps[0].config["message"],
            ConfigValue::Expression(Expression::template(
                TemplateEngine::Mustache,
                "item {{ element }}"
            ))
        );

        let render = &doc.pipeline.steps[3];
        assert_eq!(render.root_mode, RootMode::Element);
        assert_eq!(render.root, Some(Expression::literal("#main")));
    }

    #[test]
    fn round_trip_preserves_expressions() {
        let doc: PipelineDocument = from_yaml_str(SAMPLE).unwrap();
        let written = to_yaml_string(&doc).unwrap();
        assert!(written.contains("!var"), "{written}");
        assert!(written.contains("!pipeline"), "{written}");
        assert!(written.contains("!mustache"), "{written}");
        let reloaded: PipelineDocument = from_yaml_str(&written).unwrap();
        assert_eq!(reloaded, doc);
    }

    #[test]
    fn unknown_tag_rejected() {
        let err = from_yaml_str::<Pipeline>("- id: x\n  config:\n    a: !jinja \"{{ x }}\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("unsupported YAML tag"), "{err}");
    }

    #[test]
    fn var_tag_requires_string() {
        let err = from_yaml_str::<Pipeline>("- id: x\n  config:\n    a: !var [1]\n").unwrap_err();
        assert!(err.to_string().contains("expects a string"), "{err}");
    }

    #[test]
    fn plain_literals_survive_round_trip() {
        let pipeline = Pipeline::new(vec![BrickInvocation::new("@brickline/identity")
            .with_config(
                "value",
                ConfigValue::try_from(serde_json::json!({"n": 1.5, "ok": true, "list": [1, "a", null]}))
                    .unwrap(),
            )]);
        let written = to_yaml_string(&pipeline).unwrap();
        let reloaded: Pipeline = from_yaml_str(&written).unwrap();
        assert_eq!(reloaded, pipeline);
    }
}
