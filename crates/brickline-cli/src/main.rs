//! CLI binary for running and validating Brickline pipelines.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use brickline_config::{BrickInvocation, Pipeline, PipelineDocument, DEFAULT_MAX_DEPTH};
use brickline_runtime::{
    analyze, default_analyses, default_registry, Annotation, AnnotationType, BrickIdVisitor,
    Interpreter, InterpreterConfig, MemoryTraceSink, PipelineVisitor, Position, RunOptions,
    TemplateRenderers, VisitExtra,
};
use brickline_types::{RootHandle, StaticDocument};

#[derive(Parser)]
#[command(name = "brickline", version, about = "Run and validate brick pipelines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline document
    Run {
        /// Path to the pipeline (.json, .yaml or .yml)
        pipeline: PathBuf,

        /// Page snapshot JSON to run against (default: an empty page)
        #[arg(long)]
        page: Option<PathBuf>,

        /// Override a mod variable, e.g. --var threshold=3. Values parse as JSON
        /// when possible and fall back to strings.
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, Value)>,

        /// Write the trace records of the run to this file as JSON
        #[arg(long)]
        trace_out: Option<PathBuf>,

        /// Maximum sub-pipeline nesting depth
        #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
        max_depth: usize,

        /// Fail on references to variables no preceding step binds
        #[arg(long)]
        strict: bool,
    },

    /// Run static analyses over a pipeline document
    Validate {
        /// Path to the pipeline (.json, .yaml or .yml)
        pipeline: PathBuf,

        /// Maximum sub-pipeline nesting depth
        #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
        max_depth: usize,
    },

    /// Show information about a pipeline document
    Info {
        /// Path to the pipeline (.json, .yaml or .yml)
        pipeline: PathBuf,
    },

    /// Convert a pipeline document between JSON and tagged YAML
    Convert {
        /// Input document
        pipeline: PathBuf,

        /// Output path; the format follows its extension
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            pipeline,
            page,
            vars,
            trace_out,
            max_depth,
            strict,
        } => {
            let config = InterpreterConfig {
                max_depth,
                strict_references: strict,
            };
            cmd_run(&pipeline, page.as_deref(), vars, trace_out.as_deref(), config).await?;
        }
        Commands::Validate { pipeline, max_depth } => {
            cmd_validate(&pipeline, max_depth).await?;
        }
        Commands::Info { pipeline } => {
            cmd_info(&pipeline)?;
        }
        Commands::Convert { pipeline, output } => {
            cmd_convert(&pipeline, &output)?;
        }
    }

    Ok(())
}

/// `key=value`, with `value` parsed as JSON when it is valid JSON.
fn parse_var(arg: &str) -> Result<(String, Value), String> {
    let (key, raw) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{arg}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in '{arg}'"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn load_document(path: &Path) -> anyhow::Result<PipelineDocument> {
    Ok(PipelineDocument::load(path)?)
}

async fn cmd_run(
    path: &Path,
    page: Option<&Path>,
    vars: Vec<(String, Value)>,
    trace_out: Option<&Path>,
    config: InterpreterConfig,
) -> anyhow::Result<()> {
    let mut doc = load_document(path)?;
    for (key, value) in vars {
        doc.variables.insert(key, value);
    }

    let page = match page {
        Some(p) => StaticDocument::load(p)?,
        None => StaticDocument::new("about:blank", ""),
    };

    let sink = MemoryTraceSink::new();
    let interpreter = Interpreter::builder(default_registry())
        .config(config)
        .trace_sink(Arc::new(sink.clone()))
        .build();

    let ctx = doc.run_context(RootHandle::document(page));
    let run_id = ctx.meta.run_id;

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received; cancelling after the current step");
                cancel.cancel();
            }
        })
    };

    let result = interpreter
        .run(&doc.pipeline, ctx, RunOptions::default().with_cancel(cancel))
        .await;
    ctrl_c.abort();

    if let Some(out) = trace_out {
        let records = sink.for_run(run_id);
        std::fs::write(out, serde_json::to_string_pretty(&records)?)?;
        eprintln!("Wrote {} trace records to {}", records.len(), out.display());
    }

    match result {
        Ok(Some(value)) => println!("{}", serde_json::to_string_pretty(&value)?),
        Ok(None) => println!("(no output)"),
        Err(e) if e.is_cancelled() => {
            eprintln!("Run cancelled");
            std::process::exit(130);
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn print_annotation(annotation: &Annotation) {
    println!(
        "[{}] {}: {} ({})",
        annotation.annotation_type, annotation.position, annotation.message, annotation.analysis_id
    );
}

async fn cmd_validate(path: &Path, max_depth: usize) -> anyhow::Result<()> {
    let doc = load_document(path)?;
    let mut analyses = default_analyses(
        Arc::new(default_registry()),
        Arc::new(TemplateRenderers::default()),
    );
    let annotations = analyze(&doc, &mut analyses, max_depth).await?;

    if annotations.is_empty() {
        println!("Pipeline is valid");
        return Ok(());
    }

    let mut has_error = false;
    for annotation in &annotations {
        has_error |= annotation.annotation_type == AnnotationType::Error;
        print_annotation(annotation);
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

/// Prints one indented line per step.
struct TreePrinter;

impl PipelineVisitor for TreePrinter {
    fn visit_brick(&mut self, _position: &Position, invocation: &BrickInvocation, extra: &VisitExtra) {
        let indent = "  ".repeat(extra.depth() + 1);
        let branch = extra.branch_path.last().map(|b| format!("{b}: ")).unwrap_or_default();
        let label = invocation
            .label
            .as_deref()
            .map(|l| format!(" \"{l}\""))
            .unwrap_or_default();
        let output = invocation
            .output_key
            .as_deref()
            .map(|k| format!(" -> @{k}"))
            .unwrap_or_default();
        let condition = if invocation.condition.is_some() { " [if]" } else { "" };
        println!("{indent}{branch}{}{label}{output}{condition}", invocation.brick_id);
    }
}

fn count_steps(pipeline: &Pipeline) -> usize {
    pipeline
        .iter()
        .map(|step| {
            1 + step
                .sub_pipelines()
                .iter()
                .map(|sub| count_steps(sub.pipeline))
                .sum::<usize>()
        })
        .sum()
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let doc = load_document(path)?;

    let name = if doc.name.is_empty() { "(unnamed)" } else { &doc.name };
    println!("Pipeline: {name}");
    println!("Top-level steps: {}", doc.pipeline.len());
    println!("Total steps: {}", count_steps(&doc.pipeline));

    let ids = BrickIdVisitor::collect_brick_ids(&doc.pipeline);
    println!("Bricks used: {}", ids.len());
    for id in &ids {
        println!("  {id}");
    }

    if !doc.variables.is_empty() {
        println!("\nVariables:");
        for (key, value) in &doc.variables {
            println!("  @mod.{key} = {value}");
        }
    }

    println!("\nSteps:");
    brickline_runtime::analysis::walk_document(&doc, &mut TreePrinter);

    Ok(())
}

fn cmd_convert(input: &Path, output: &Path) -> anyhow::Result<()> {
    let doc = load_document(input)?;
    doc.save(output)?;
    println!("Wrote {}", output.display());
    Ok(())
}
