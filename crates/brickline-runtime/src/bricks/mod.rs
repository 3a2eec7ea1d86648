//! Built-in bricks.

pub mod controls;
pub mod effects;
pub mod readers;
pub mod renderers;
pub mod transformers;

pub use controls::{ForEachBrick, IfElseBrick};
pub use effects::{ErrorBrick, LogBrick};
pub use readers::{ElementTextReader, PageMetadataReader};
pub use renderers::TextRenderer;
pub use transformers::{IdentityBrick, UppercaseBrick};

use serde_json::Value;

use brickline_types::{BrickError, Result};

use crate::brick::BrickInput;
use crate::registry::BrickRegistry;

/// Create a registry with every built-in brick registered.
pub fn default_registry() -> BrickRegistry {
    let mut reg = BrickRegistry::new();
    reg.register(PageMetadataReader);
    reg.register(ElementTextReader);
    reg.register(IdentityBrick);
    reg.register(UppercaseBrick);
    reg.register(LogBrick);
    reg.register(ErrorBrick);
    reg.register(ForEachBrick);
    reg.register(IfElseBrick);
    reg.register(TextRenderer);
    reg
}

/// Required string field. Schema validation runs first, so a miss here means
/// the brick's schema and code disagree.
fn required_str<'a>(input: &'a BrickInput, key: &str) -> Result<&'a str> {
    input
        .get_str(key)
        .ok_or_else(|| BrickError::Application(format!("missing string field '{key}'")))
}

fn output_or_null(output: Option<Value>) -> Value {
    output.unwrap_or(Value::Null)
}
