//! Shared errors, run context, and page handles for the Brickline runtime.
//!
//! This crate provides the foundational types used across all other Brickline crates:
//! - `BrickError`: unified error taxonomy with business/cancel/defect classification
//! - `RunContext`: the data accumulator threaded through one pipeline run
//! - `RootHandle` / `Document`: the page a pipeline runs against

use serde::{Deserialize, Serialize};

pub mod context;
pub mod page;

pub use context::{BranchTag, RunContext, RunMetadata, MOD_VARIABLES_KEY};
pub use page::{Document, RootHandle, StaticDocument};

/// One `{keywordLocation, error}` pair reported by input schema validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaViolation {
    pub keyword_location: Option<String>,
    pub error: Option<String>,
}

impl SchemaViolation {
    pub fn new(keyword_location: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            keyword_location: Some(keyword_location.into()),
            error: Some(error.into()),
        }
    }
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.keyword_location.as_deref(), self.error.as_deref()) {
            (Some(location), Some(error)) => write!(f, "{location}: {error}"),
            (Some(location), None) => f.write_str(location),
            (None, Some(error)) => f.write_str(error),
            (None, None) => Ok(()),
        }
    }
}

fn format_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Unified error type for all Brickline subsystems.
#[derive(Debug, thiserror::Error)]
pub enum BrickError {
    // === Expected, user-actionable ===
    #[error("{message}")]
    Business { message: String },

    #[error("Invalid input for brick '{brick_id}': {}", format_violations(.violations))]
    InputValidation {
        brick_id: String,
        violations: Vec<SchemaViolation>,
    },

    #[error("Invalid {engine} template: {message}")]
    InvalidTemplate { engine: String, message: String },

    #[error("Invalid variable reference '{path}': {message}")]
    Reference { path: String, message: String },

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("{0}")]
    Cancelled(String),

    // === Defects ===
    #[error("Brick '{id}' is not registered")]
    BrickNotFound { id: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Application(String),
}

/// Coarse classification used for propagation and reporting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Business,
    Cancel,
    Defect,
}

impl BrickError {
    pub fn business(message: impl Into<String>) -> Self {
        BrickError::Business {
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        BrickError::Cancelled("Run cancelled".into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BrickError::Business { .. }
            | BrickError::InputValidation { .. }
            | BrickError::InvalidTemplate { .. }
            | BrickError::Reference { .. }
            | BrickError::InvalidPipeline(_) => ErrorKind::Business,
            BrickError::Cancelled(_) => ErrorKind::Cancel,
            BrickError::BrickNotFound { .. }
            | BrickError::Config(_)
            | BrickError::Io(_)
            | BrickError::Json(_)
            | BrickError::Application(_) => ErrorKind::Defect,
        }
    }

    /// Returns `true` for expected failures that are not treated as defects.
    pub fn is_business(&self) -> bool {
        matches!(self.kind(), ErrorKind::Business | ErrorKind::Cancel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancel
    }

    /// Returns `true` if the error indicates a defect worth reporting upstream.
    pub fn should_report(&self) -> bool {
        self.kind() == ErrorKind::Defect
    }
}

/// A convenience alias for `Result<T, BrickError>`.
pub type Result<T> = std::result::Result<T, BrickError>;
