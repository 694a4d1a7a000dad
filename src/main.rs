//! Command-line entry point for editorial-orchestrator.
//!
//! ```bash
//! editorial-orchestrator --config editorial.toml generate "Retry Strategies" --words 1200
//! editorial-orchestrator audit guide-1 guide-2 --mode quick
//! editorial-orchestrator improve guide-1 --dry-run
//! ```
//!
//! Prints one JSON batch report on stdout. Exit codes: 0 every item
//! succeeded, 1 partial failure (see the report), 2 fatal configuration error.
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json`: structured JSON logs on stderr (overrides the config file)
//! - `RUST_LOG=info`: log level filter

use clap::{Args, Parser, Subcommand};
use editorial_orchestrator::audit::AuditMode;
use editorial_orchestrator::config::loader::load_from_file;
use editorial_orchestrator::config::{export_schema, EditorialConfig};
use editorial_orchestrator::improve::ImproveOptions;
use editorial_orchestrator::report::{BatchReport, ItemReport, EXIT_FATAL_CONFIG};
use editorial_orchestrator::search::KeywordIndex;
use editorial_orchestrator::store::{ContentFilter, FileStore};
use editorial_orchestrator::{
    init_tracing_with, metrics, AuditEngine, CancelHandle, CancelSignal, ContentId, EngineContext,
    GenerationRequest, ImprovementEngine, Orchestrator,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

/// Generate, audit and improve long-form content with LLM agents.
#[derive(Debug, Parser)]
#[command(name = "editorial-orchestrator", version, about)]
struct Cli {
    /// TOML configuration file; built-in defaults (simulated provider) when omitted.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Directory of the JSON content store.
    #[arg(long, global = true, default_value = ".editorial")]
    store_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a new content item from a topic.
    Generate(GenerateArgs),
    /// Score existing items and append a new audit record to each.
    Audit(AuditArgs),
    /// Regenerate weak fields of items using their latest audit.
    Improve(ImproveArgs),
    /// Continue failed or interrupted generation runs.
    Resume(IdsArgs),
    /// Print the configuration JSON Schema.
    Schema,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    /// Subject of the item.
    topic: String,
    /// Content-type tag.
    #[arg(long, default_value = "guide")]
    category: String,
    /// Target length in words.
    #[arg(long)]
    words: Option<usize>,
    /// Id to create.
    #[arg(long)]
    id: Option<String>,
}

#[derive(Debug, Args)]
struct AuditArgs {
    /// Items to audit.
    #[arg(required = true)]
    ids: Vec<String>,
    /// `full` or `quick`.
    #[arg(long, default_value = "full")]
    mode: AuditMode,
}

#[derive(Debug, Args)]
struct ImproveArgs {
    /// Items to improve.
    #[arg(required = true)]
    ids: Vec<String>,
    /// Report proposed changes without writing.
    #[arg(long)]
    dry_run: bool,
    /// Audit first, in this mode, when an item has no audit record.
    #[arg(long)]
    audit_if_missing: Option<AuditMode>,
}

#[derive(Debug, Args)]
struct IdsArgs {
    /// Items to resume.
    #[arg(required = true)]
    ids: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Command::Schema = cli.command {
        return match export_schema() {
            Ok(schema) => {
                println!("{schema}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("schema export failed: {e}");
                ExitCode::from(EXIT_FATAL_CONFIG as u8)
            }
        };
    }

    let config = match &cli.config {
        Some(path) => load_from_file(path),
        None => Ok(EditorialConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(EXIT_FATAL_CONFIG as u8);
        }
    };

    let format = std::env::var("LOG_FORMAT")
        .unwrap_or_else(|_| config.observability.log_format.as_str().to_string());
    if let Err(e) = init_tracing_with(&format) {
        eprintln!("tracing disabled: {e}");
    }
    if let Err(e) = metrics::init_metrics() {
        warn!(error = %e, "metrics disabled");
    }

    let ctx = match build_context(config, &cli.store_dir).await {
        Ok(ctx) => ctx,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(EXIT_FATAL_CONFIG as u8);
        }
    };

    let cancel = CancelHandle::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling in-flight work");
            on_signal.cancel();
        }
    });

    let items = run(cli.command, &ctx, &cancel.signal()).await;
    let batch = BatchReport::new(items).with_cost(ctx.invoker.pool().ledger().snapshot());
    match serde_json::to_string_pretty(&batch) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("report serialisation failed: {e}"),
    }
    info!(
        succeeded = batch.succeeded,
        partial = batch.partial,
        failed = batch.failed,
        "batch finished"
    );
    ExitCode::from(batch.exit_code() as u8)
}

async fn build_context(config: EditorialConfig, store_dir: &Path) -> Result<EngineContext, String> {
    let store = FileStore::open(store_dir)
        .await
        .map_err(|e| format!("cannot open store at {}: {e}", store_dir.display()))?;
    let store = Arc::new(store);
    let ctx = EngineContext::from_config(config, store.clone()).map_err(|e| e.to_string())?;

    match KeywordIndex::from_store(store.as_ref(), &ContentFilter::default()).await {
        Ok(index) if !index.is_empty() => Ok(ctx.with_search(Arc::new(index))),
        Ok(_) => Ok(ctx),
        Err(e) => {
            warn!(error = %e, "search index unavailable, generating without retrieval");
            Ok(ctx)
        }
    }
}

async fn run(command: Command, ctx: &EngineContext, cancel: &CancelSignal) -> Vec<ItemReport> {
    let mut reports = Vec::new();
    match command {
        Command::Generate(args) => {
            let mut request = GenerationRequest::new(args.topic, args.category);
            if let Some(words) = args.words {
                request = request.with_target_words(words);
            }
            let id = ContentId::new(args.id.unwrap_or_else(|| ContentId::generate().to_string()));
            request = request.with_content_id(id.clone());
            let orchestrator = Orchestrator::new(ctx.clone());
            reports.push(match orchestrator.generate_with_cancel(request, cancel).await {
                Ok(run) => ItemReport::from_run("generate", &run),
                Err(e) => ItemReport::from_error("generate", id, &e),
            });
        }
        Command::Resume(args) => {
            let orchestrator = Orchestrator::new(ctx.clone());
            for id in args.ids.into_iter().map(ContentId::new) {
                reports.push(match orchestrator.resume_with_cancel(&id, cancel).await {
                    Ok(run) => ItemReport::from_run("resume", &run),
                    Err(e) => ItemReport::from_error("resume", id, &e),
                });
            }
        }
        Command::Audit(args) => {
            let ids: Vec<ContentId> = args.ids.into_iter().map(ContentId::new).collect();
            let results = AuditEngine::new(ctx.clone()).audit_many(&ids, args.mode, cancel).await;
            reports.extend(results.into_iter().map(|(id, result)| match result {
                Ok(outcome) => ItemReport::from_audit(&outcome),
                Err(e) => ItemReport::from_error("audit", id, &e),
            }));
        }
        Command::Improve(args) => {
            let options = ImproveOptions {
                dry_run: args.dry_run,
                audit_if_missing: args.audit_if_missing,
            };
            let ids: Vec<ContentId> = args.ids.into_iter().map(ContentId::new).collect();
            let results = ImprovementEngine::new(ctx.clone())
                .improve_many(&ids, options, cancel)
                .await;
            reports.extend(results.into_iter().map(|(id, result)| match result {
                Ok(report) => ItemReport::from_improvement(&report),
                Err(e) => ItemReport::from_error("improve", id, &e),
            }));
        }
        Command::Schema => {}
    }
    reports
}
