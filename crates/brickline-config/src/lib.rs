//! Pipeline configuration model with JSON and tagged-YAML formats.
//!
//! A pipeline is an ordered list of [`BrickInvocation`]s whose config values
//! are [`Expression`]s, possibly nesting further pipelines. Documents load
//! from JSON (expressions as `{"__type__", "__value__"}` objects) or from
//! YAML with `!var`, `!mustache`, `!nunjucks`, `!handlebars` and `!pipeline`
//! tags.
//!
//! # Example
//! ```
//! let yaml = r#"
//! pipeline:
//!   - id: "@brickline/uppercase"
//!     config:
//!       text: !var "@ctx.title"
//! "#;
//! let doc = brickline_config::PipelineDocument::from_yaml_str(yaml).unwrap();
//! assert_eq!(doc.pipeline.len(), 1);
//! ```

pub mod expression;
pub mod model;
pub mod structure;
pub mod yaml;

pub use expression::{ConfigValue, Expression, TemplateEngine, TYPE_KEY, VALUE_KEY};
pub use model::{BrickInvocation, Pipeline, PipelineDocument, RegistryId, RootMode, SubPipeline};
pub use structure::{check_structure, is_valid_output_key, DEFAULT_MAX_DEPTH};
pub use yaml::{from_yaml_str, to_yaml_string};
