//! Pipeline interpreter: runs invocations in order against a [`RunContext`].
//!
//! Each step goes through condition, root resolution, availability, input
//! resolution with schema validation, execution, and output binding. Nested
//! pipelines in a step's config are handed to the brick as
//! [`PipelineClosure`]s that run on a copy of the context.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use brickline_config::{check_structure, BrickInvocation, Pipeline, PipelineDocument, RootMode, DEFAULT_MAX_DEPTH};
use brickline_types::{BranchTag, BrickError, Result, RootHandle, RunContext};

use crate::brick::{BrickInput, BrickKind, BrickOptions};
use crate::bricks::default_registry;
use crate::evaluator::{is_truthy, BoxFuture, ExpressionEvaluator};
use crate::registry::BrickRegistry;
use crate::reporter::{ErrorReporter, TracingReporter};
use crate::schema::SchemaCache;
use crate::templates::TemplateRenderers;
use crate::trace::{NoopTraceSink, TraceRecord, TraceSink};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InterpreterConfig {
    /// Maximum sub-pipeline nesting, checked statically and at run time.
    pub max_depth: usize,
    /// Treat `var` references to unbound keys as errors instead of null.
    pub strict_references: bool,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            strict_references: false,
        }
    }
}

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub cancel: Option<CancellationToken>,
}

impl RunOptions {
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Drives pipeline execution. Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct Interpreter {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<BrickRegistry>,
    evaluator: ExpressionEvaluator,
    schemas: SchemaCache,
    sink: Arc<dyn TraceSink>,
    reporter: Arc<dyn ErrorReporter>,
    config: InterpreterConfig,
}

pub struct InterpreterBuilder {
    registry: Arc<BrickRegistry>,
    renderers: Option<Arc<TemplateRenderers>>,
    sink: Arc<dyn TraceSink>,
    reporter: Arc<dyn ErrorReporter>,
    config: InterpreterConfig,
}

impl InterpreterBuilder {
    pub fn renderers(mut self, renderers: Arc<TemplateRenderers>) -> Self {
        self.renderers = Some(renderers);
        self
    }

    pub fn trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(mut self, config: InterpreterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Interpreter {
        let renderers = self
            .renderers
            .unwrap_or_else(|| Arc::new(TemplateRenderers::default()));
        let evaluator = ExpressionEvaluator::new(renderers).strict(self.config.strict_references);
        Interpreter {
            inner: Arc::new(Inner {
                registry: self.registry,
                evaluator,
                schemas: SchemaCache::new(),
                sink: self.sink,
                reporter: self.reporter,
                config: self.config,
            }),
        }
    }
}

enum StepOutcome {
    Skipped,
    Completed { value: Value, kind: BrickKind },
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

impl Interpreter {
    pub fn builder(registry: BrickRegistry) -> InterpreterBuilder {
        Self::builder_shared(Arc::new(registry))
    }

    /// Builder over a registry shared with other consumers, e.g. analyses.
    pub fn builder_shared(registry: Arc<BrickRegistry>) -> InterpreterBuilder {
        InterpreterBuilder {
            registry,
            renderers: None,
            sink: Arc::new(NoopTraceSink),
            reporter: Arc::new(TracingReporter),
            config: InterpreterConfig::default(),
        }
    }

    pub fn new(registry: BrickRegistry) -> Self {
        Self::builder(registry).build()
    }

    /// Create an interpreter pre-loaded with the built-in bricks.
    pub fn with_default_registry() -> Self {
        Self::new(default_registry())
    }

    pub fn registry(&self) -> &Arc<BrickRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.inner.config
    }

    /// Run `pipeline` to completion and return the last executed step's
    /// output, or `None` if every step was skipped.
    ///
    /// Defects are reported once here; business errors and cancellation are
    /// only returned.
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        ctx: RunContext,
        options: RunOptions,
    ) -> Result<Option<Value>> {
        check_structure(pipeline, self.inner.config.max_depth)?;

        let run_id = ctx.meta.run_id;
        let cancel = options.cancel.unwrap_or_default();
        let start = Instant::now();
        tracing::info!(run_id = %run_id, steps = pipeline.len(), "Pipeline run started");

        let result = self.run_branch(pipeline, ctx, &cancel).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::info!(run_id = %run_id, duration_ms, "Pipeline run completed"),
            Err(e) if e.is_cancelled() => {
                tracing::info!(run_id = %run_id, duration_ms, "Pipeline run cancelled")
            }
            Err(e) if e.should_report() => self.inner.reporter.report(run_id, e),
            Err(e) => tracing::warn!(run_id = %run_id, error = %e, "Pipeline run failed"),
        }
        result
    }

    /// Run a document's pipeline with its variables bound under `@mod`.
    pub async fn run_document(
        &self,
        doc: &PipelineDocument,
        root: RootHandle,
        options: RunOptions,
    ) -> Result<Option<Value>> {
        self.run(&doc.pipeline, doc.run_context(root), options).await
    }

    fn run_branch<'a>(
        &'a self,
        pipeline: &'a Pipeline,
        mut ctx: RunContext,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move {
            if ctx.meta.depth() > self.inner.config.max_depth {
                return Err(BrickError::InvalidPipeline(format!(
                    "sub-pipelines nested deeper than {} levels",
                    self.inner.config.max_depth
                )));
            }

            let mut output = None;
            for (index, step) in pipeline.iter().enumerate() {
                if cancel.is_cancelled() {
                    tracing::debug!(brick = %step.brick_id, "Cancelled before step");
                    return Err(BrickError::cancelled());
                }

                match self.execute_step(step, &ctx, cancel).await? {
                    StepOutcome::Skipped => {}
                    StepOutcome::Completed { value, kind } => {
                        if let Some(key) = &step.output_key {
                            ctx.bind(key.clone(), value.clone());
                        }
                        output = Some(value);
                        if kind == BrickKind::Renderer && index + 1 < pipeline.len() {
                            tracing::warn!(
                                brick = %step.brick_id,
                                skipped = pipeline.len() - index - 1,
                                "Renderer ends the pipeline; ignoring later steps"
                            );
                            break;
                        }
                    }
                }
            }
            Ok(output)
        })
    }

    /// Run one step and finalize its trace record.
    async fn execute_step(
        &self,
        step: &BrickInvocation,
        ctx: &RunContext,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        let mut record = TraceRecord::begin(ctx, step);
        self.inner.sink.record(&record);
        let start = Instant::now();

        let result = self.attempt_step(step, ctx, cancel, &mut record).await;

        record.duration_ms = Some(start.elapsed().as_millis() as u64);
        match &result {
            Ok(StepOutcome::Skipped) => record.finish_skipped(),
            Ok(StepOutcome::Completed { value, .. }) => record.finish_output(value.clone()),
            Err(e) => record.finish_error(e),
        }
        self.inner.sink.record(&record);
        result
    }

    async fn attempt_step(
        &self,
        step: &BrickInvocation,
        ctx: &RunContext,
        cancel: &CancellationToken,
        record: &mut TraceRecord,
    ) -> Result<StepOutcome> {
        let inner = &self.inner;

        if let Some(condition) = &step.condition {
            let value = inner.evaluator.resolve(condition, ctx).await?;
            if !is_truthy(&value) {
                tracing::debug!(brick = %step.brick_id, "Condition false; skipping step");
                return Ok(StepOutcome::Skipped);
            }
        }

        let brick = inner.registry.lookup(&step.brick_id).await?;

        let root = if brick.is_root_aware().await {
            Some(self.resolve_root(step, ctx).await?)
        } else {
            None
        };

        if !brick.is_available(ctx).await? {
            tracing::info!(brick = %step.brick_id, "Brick not available; skipping step");
            return Ok(StepOutcome::Skipped);
        }

        let value = inner.evaluator.resolve_args(&step.config, ctx).await?;
        record.input = Some(value.clone());
        inner.schemas.validate(brick.as_ref(), &value).await?;

        let input = BrickInput::new(value).with_pipelines(self.bind_sub_pipelines(step, ctx, cancel));
        let options = BrickOptions {
            ctx: ctx.clone(),
            root,
            instance_id: step.instance_id,
            cancel: cancel.clone(),
        };

        let kind = brick.kind();
        tracing::debug!(brick = %step.brick_id, kind = %kind, "Running brick");
        let output = brick.run(input, &options).await?;
        let value = match kind {
            BrickKind::Effect => Value::Null,
            _ => output,
        };
        Ok(StepOutcome::Completed { value, kind })
    }

    async fn resolve_root(&self, step: &BrickInvocation, ctx: &RunContext) -> Result<RootHandle> {
        match step.root_mode {
            RootMode::Inherit => Ok(ctx.root.clone()),
            RootMode::Document => Ok(ctx.root.to_document()),
            RootMode::Element => {
                let expr = step.root.as_ref().ok_or_else(|| {
                    BrickError::InvalidPipeline(format!(
                        "brick '{}' uses rootMode 'element' without a root selector",
                        step.brick_id
                    ))
                })?;
                let value = self.inner.evaluator.resolve(expr, ctx).await?;
                let selector = value
                    .as_str()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        BrickError::business(format!("root selector must be a non-empty string, got {value}"))
                    })?;
                let root = ctx.root.scoped(selector);
                let full = root.selector().unwrap_or(selector);
                if !root.page().matches(full) {
                    return Err(BrickError::business(format!(
                        "No element found for root selector '{full}'"
                    )));
                }
                Ok(root)
            }
        }
    }

    fn bind_sub_pipelines(
        &self,
        step: &BrickInvocation,
        ctx: &RunContext,
        cancel: &CancellationToken,
    ) -> BTreeMap<String, PipelineClosure> {
        step.sub_pipelines()
            .into_iter()
            .map(|sub| {
                let name = closure_name(&sub.path);
                let closure = PipelineClosure {
                    interpreter: self.clone(),
                    pipeline: Arc::new(sub.pipeline.clone()),
                    key: name.clone(),
                    ctx: ctx.clone(),
                    cancel: cancel.clone(),
                    calls: Arc::new(AtomicUsize::new(0)),
                };
                (name, closure)
            })
            .collect()
    }
}

/// `config.body.__value__` -> `body`, `config.branches.0.__value__` -> `branches.0`.
fn closure_name(path: &str) -> String {
    let path = path.strip_prefix("config.").unwrap_or(path);
    let path = path
        .strip_suffix(brickline_config::VALUE_KEY)
        .and_then(|p| p.strip_suffix('.'))
        .unwrap_or(path);
    path.to_string()
}

// ---------------------------------------------------------------------------
// PipelineClosure
// ---------------------------------------------------------------------------

/// A nested pipeline bound to the context of the step that received it.
///
/// Each call runs on a fresh copy of that context, tagged with the config key
/// and a per-closure call counter, so bindings made inside never reach the
/// caller and trace records from repeated calls stay distinct.
#[derive(Clone)]
pub struct PipelineClosure {
    interpreter: Interpreter,
    pipeline: Arc<Pipeline>,
    key: String,
    ctx: RunContext,
    cancel: CancellationToken,
    calls: Arc<AtomicUsize>,
}

impl PipelineClosure {
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn run(&self) -> Result<Option<Value>> {
        self.run_with(Map::new()).await
    }

    /// Run with extra bindings visible to the nested steps, e.g. the current
    /// element of a loop.
    pub async fn run_with(&self, bindings: Map<String, Value>) -> Result<Option<Value>> {
        let counter = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut ctx = self.ctx.branch(BranchTag {
            key: self.key.clone(),
            counter,
        });
        for (key, value) in bindings {
            ctx.bind(key, value);
        }
        self.interpreter
            .run_branch(&self.pipeline, ctx, &self.cancel)
            .await
    }

    /// Number of times this closure has been called.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for PipelineClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineClosure")
            .field("key", &self.key)
            .field("steps", &self.pipeline.len())
            .field("calls", &self.call_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use brickline_config::{Expression, TemplateEngine};
    use brickline_types::StaticDocument;
    use serde_json::json;

    use crate::brick::Brick;
    use crate::trace::MemoryTraceSink;

    fn page() -> RootHandle {
        RootHandle::document(
            StaticDocument::new("https://example.com", "hello")
                .with_element("#main", vec!["Main".into()])
                .with_element("#main h1", vec!["Heading".into()]),
        )
    }

    fn ctx() -> RunContext {
        RunContext::new(page())
    }

    fn traced() -> (Interpreter, MemoryTraceSink) {
        let sink = MemoryTraceSink::new();
        let interpreter = Interpreter::builder(default_registry())
            .trace_sink(Arc::new(sink.clone()))
            .build();
        (interpreter, sink)
    }

    #[test]
    fn closure_names() {
        assert_eq!(closure_name("config.body.__value__"), "body");
        assert_eq!(closure_name("config.branches.0.__value__"), "branches.0");
    }

    #[tokio::test]
    async fn empty_pipeline_returns_none() {
        let interpreter = Interpreter::with_default_registry();
        let out = interpreter
            .run(&Pipeline::default(), ctx(), RunOptions::default())
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn output_keys_bind_for_later_steps() {
        let (interpreter, _) = traced();
        let pipeline = Pipeline::new(vec![
            BrickInvocation::new("@brickline/identity")
                .with_config("value", Expression::literal("hi"))
                .with_output_key("first"),
            BrickInvocation::new("@brickline/uppercase")
                .with_config("text", Expression::var("@first.value")),
        ]);
        let out = interpreter.run(&pipeline, ctx(), RunOptions::default()).await.unwrap();
        assert_eq!(out, Some(json!("HI")));
    }

    #[tokio::test]
    async fn false_condition_skips_and_binds_nothing() {
        let (interpreter, sink) = traced();
        let skipped = BrickInvocation::new("@brickline/identity")
            .with_config("value", Expression::literal(1))
            .with_condition(Expression::template(TemplateEngine::Nunjucks, "{{ 'no' }}"))
            .with_output_key("x");
        let probe = BrickInvocation::new("@brickline/identity").with_config("seen", Expression::var("@x"));
        let pipeline = Pipeline::new(vec![skipped.clone(), probe]);

        let out = interpreter.run(&pipeline, ctx(), RunOptions::default()).await.unwrap();
        assert_eq!(out, Some(json!({"seen": null})));

        let records = sink.for_instance(skipped.instance_id);
        assert_eq!(records.len(), 1);
        assert!(records[0].skipped_run);
        assert!(records[0].is_final);
        assert!(records[0].input.is_none());
    }

    #[tokio::test]
    async fn template_reading_skipped_output_renders_blank() {
        let interpreter = Interpreter::with_default_registry();
        let pipeline = Pipeline::new(vec![
            BrickInvocation::new("@brickline/page-metadata")
                .with_condition(Expression::literal(false))
                .with_output_key("ctx"),
            BrickInvocation::new("@brickline/render-text").with_config(
                "text",
                Expression::template(TemplateEngine::Nunjucks, "title={{ ctx.title }}"),
            ),
        ]);
        let out = interpreter.run(&pipeline, ctx(), RunOptions::default()).await.unwrap();
        assert_eq!(out, Some(json!("title=")));
    }

    #[tokio::test]
    async fn template_text_reaches_bricks_unescaped() {
        let interpreter = Interpreter::with_default_registry();
        let pipeline = Pipeline::new(vec![BrickInvocation::new("@brickline/uppercase")
            .with_config("text", Expression::template(TemplateEngine::Mustache, "{{mod.t}}"))]);
        let ctx = ctx().with_mod_variables(
            serde_json::from_value(json!({"t": "A & <b>"})).unwrap(),
        );
        let out = interpreter.run(&pipeline, ctx, RunOptions::default()).await.unwrap();
        assert_eq!(out, Some(json!("A & <B>")));
    }

    #[tokio::test]
    async fn renderer_is_terminal() {
        let (interpreter, sink) = traced();
        let after = BrickInvocation::new("@brickline/identity");
        let pipeline = Pipeline::new(vec![
            BrickInvocation::new("@brickline/render-text").with_config("text", Expression::literal("done")),
            after.clone(),
        ]);
        let out = interpreter.run(&pipeline, ctx(), RunOptions::default()).await.unwrap();
        assert_eq!(out, Some(json!("done")));
        assert!(sink.for_instance(after.instance_id).is_empty());
    }

    #[tokio::test]
    async fn effect_output_is_discarded() {
        let (interpreter, _) = traced();
        let pipeline = Pipeline::new(vec![BrickInvocation::new("@brickline/log")
            .with_config("message", Expression::literal("hello"))
            .with_output_key("logged")]);
        let out = interpreter.run(&pipeline, ctx(), RunOptions::default()).await.unwrap();
        assert_eq!(out, Some(Value::Null));
    }

    #[tokio::test]
    async fn element_root_scopes_readers() {
        let interpreter = Interpreter::with_default_registry();
        let pipeline = Pipeline::new(vec![BrickInvocation::new("@brickline/element-text")
            .with_config("selector", Expression::literal("h1"))
            .with_root(RootMode::Element, Some(Expression::literal("#main")))]);
        let out = interpreter.run(&pipeline, ctx(), RunOptions::default()).await.unwrap();
        assert_eq!(out, Some(json!(["Heading"])));
    }

    #[tokio::test]
    async fn missing_element_root_is_business_error() {
        let interpreter = Interpreter::with_default_registry();
        let pipeline = Pipeline::new(vec![BrickInvocation::new("@brickline/page-metadata")
            .with_root(RootMode::Element, Some(Expression::literal("#nowhere")))]);
        let err = interpreter.run(&pipeline, ctx(), RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, BrickError::Business { ref message } if message.contains("#nowhere")));
    }

    #[tokio::test]
    async fn document_root_resets_scope() {
        let interpreter = Interpreter::with_default_registry();
        let scoped = RunContext::new(page().scoped("#main"));
        let pipeline = Pipeline::new(vec![
            BrickInvocation::new("@brickline/page-metadata").with_root(RootMode::Document, None)
        ]);
        let out = interpreter.run(&pipeline, scoped, RunOptions::default()).await.unwrap().unwrap();
        assert!(out.get("selector").map_or(true, Value::is_null), "{out}");
    }

    #[tokio::test]
    async fn sub_pipeline_bindings_do_not_leak() {
        let (interpreter, _) = traced();
        let body = Pipeline::new(vec![BrickInvocation::new("@brickline/identity")
            .with_config("value", Expression::var("@element"))
            .with_output_key("inner")]);
        let pipeline = Pipeline::new(vec![
            BrickInvocation::new("@brickline/for-each")
                .with_config("elements", Expression::literal(json!([1, 2])))
                .with_config("body", Expression::Pipeline(body)),
            BrickInvocation::new("@brickline/identity").with_config("inner", Expression::var("@inner")),
        ]);
        let out = interpreter.run(&pipeline, ctx(), RunOptions::default()).await.unwrap();
        assert_eq!(out, Some(json!({"inner": null})));
    }

    #[tokio::test]
    async fn strict_references_reject_unbound_keys() {
        let interpreter = Interpreter::builder(default_registry())
            .config(InterpreterConfig {
                strict_references: true,
                ..Default::default()
            })
            .build();
        let pipeline = Pipeline::new(vec![
            BrickInvocation::new("@brickline/identity").with_config("v", Expression::var("@later")),
            BrickInvocation::new("@brickline/identity").with_output_key("later"),
        ]);
        let err = interpreter.run(&pipeline, ctx(), RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, BrickError::Reference { .. }));
    }

    struct Unavailable;

    #[async_trait]
    impl Brick for Unavailable {
        fn id(&self) -> &str {
            "@test/unavailable"
        }

        fn kind(&self) -> BrickKind {
            BrickKind::Transformer
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn is_available(&self, _ctx: &RunContext) -> Result<bool> {
            Ok(false)
        }

        async fn run(&self, _input: BrickInput, _options: &BrickOptions) -> Result<Value> {
            Err(BrickError::Application("should not run".into()))
        }
    }

    #[tokio::test]
    async fn unavailable_brick_is_skipped() {
        let mut registry = default_registry();
        registry.register(Unavailable);
        let sink = MemoryTraceSink::new();
        let interpreter = Interpreter::builder(registry)
            .trace_sink(Arc::new(sink.clone()))
            .build();
        let step = BrickInvocation::new("@test/unavailable").with_output_key("u");
        let out = interpreter
            .run(&Pipeline::new(vec![step.clone()]), ctx(), RunOptions::default())
            .await
            .unwrap();
        assert!(out.is_none());
        assert!(sink.for_instance(step.instance_id)[0].skipped_run);
    }

    #[tokio::test]
    async fn duplicate_instance_ids_rejected_before_running() {
        let (interpreter, sink) = traced();
        let step = BrickInvocation::new("@brickline/identity");
        let pipeline = Pipeline::new(vec![step.clone(), step]);
        let err = interpreter.run(&pipeline, ctx(), RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, BrickError::InvalidPipeline(_)));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn run_document_binds_mod_variables() {
        let interpreter = Interpreter::with_default_registry();
        let mut doc = PipelineDocument::new(
            "greeter",
            Pipeline::new(vec![BrickInvocation::new("@brickline/uppercase")
                .with_config("text", Expression::var("@mod.greeting"))]),
        );
        doc.variables.insert("greeting".into(), json!("hey"));
        let out = interpreter.run_document(&doc, page(), RunOptions::default()).await.unwrap();
        assert_eq!(out, Some(json!("HEY")));
    }
}
