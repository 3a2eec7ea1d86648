//! Brick pipeline interpreter, template engines, tracing, and static analysis.
//!
//! This crate implements the Brickline runtime: expression resolution across
//! three template dialects, the brick contract and registry, the step-by-step
//! interpreter with sub-pipeline closures and cooperative cancellation, per-step
//! trace records, and visitor-based analyses that annotate documents.

pub mod analysis;
pub mod brick;
pub mod bricks;
pub mod evaluator;
pub mod interpreter;
pub mod registry;
pub mod reporter;
pub mod schema;
pub mod templates;
pub mod trace;

pub use analysis::{
    analyze, default_analyses, has_errors, Analysis, Annotation, AnnotationType, BrickIdVisitor,
    OutputKeyAnalysis, PipelineVisitor, Position, RegistryAnalysis, TemplateAnalysis, VarAnalysis,
    VisitExtra,
};
pub use brick::{Brick, BrickInput, BrickKind, BrickOptions};
pub use bricks::default_registry;
pub use evaluator::{is_truthy, lookup_var, parse_var_path, ExpressionEvaluator};
pub use interpreter::{
    Interpreter, InterpreterBuilder, InterpreterConfig, PipelineClosure, RunOptions,
};
pub use registry::{BrickRegistry, BrickSource, LookupCache};
pub use reporter::{ErrorReporter, MemoryReporter, TracingReporter};
pub use schema::{compile_schema, validate_input, SchemaCache};
pub use templates::{
    HandlebarsRenderer, MustacheRenderer, NunjucksRenderer, TemplateRenderer, TemplateRenderers,
};
pub use trace::{
    BroadcastTraceSink, MemoryTraceSink, NoopTraceSink, TraceError, TraceRecord, TraceSink,
};
