use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{bail, Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use graphsec_core::config::{ConflictPolicy, DEFAULT_GRAPH_PATH};
use graphsec_core::graph::{schema, GraphStore};
use graphsec_core::llm::{Provider, LLM};
use graphsec_core::{
    Config, IngestionRequest, IngestionService, IngestionState, IngestionStatus,
    InvestigationReport, MemoryGraphStore, SourcesSinksWorkflow, SurrealGraphStore,
};

/// Snapshots of finished runs, so `status` works from a later invocation.
const DEFAULT_STATUS_DIR: &str = ".graphsec/status";

#[derive(Parser)]
#[command(name = "graphsec")]
#[command(about = "Ingest repositories into a code graph and hunt for sources and sinks", long_about = None)]
struct Cli {
    /// Config file; defaults to ./graphsec.toml, then the user config.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a repository into the graph
    Ingest {
        /// Local repository path
        path: Option<PathBuf>,
        /// Git URI to clone instead of a local path
        #[arg(long, conflicts_with = "path")]
        uri: Option<String>,
        /// Branch to clone (requires --uri)
        #[arg(long, requires = "uri")]
        branch: Option<String>,
        /// Documentation directory or file
        #[arg(long)]
        doc_path: Option<PathBuf>,
        /// Documentation URL
        #[arg(long, conflicts_with = "doc_path")]
        doc_uri: Option<String>,
        /// Summarizer workers
        #[arg(long)]
        max_parallel: Option<usize>,
        /// Summarizer context budget in tokens
        #[arg(long)]
        context_tokens: Option<usize>,
        /// Stop after mapping; makes no LLM calls
        #[arg(long)]
        parse_only: bool,
        /// Re-ingest into an existing ingestion id
        #[arg(long)]
        id: Option<String>,
        /// Print the final status as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the status of an ingestion
    Status {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Delete an ingested repository or an investigation
    Delete {
        id: String,
        /// Treat the id as an investigation
        #[arg(long)]
        investigation: bool,
    },
    /// Run the sources-and-sinks workflow
    Investigate {
        /// Ingestion ids to search; the whole graph when omitted
        repositories: Vec<String>,
        /// Minimum analyzer confidence
        #[arg(long)]
        threshold: Option<f64>,
        /// How disagreeing analyzers are reconciled
        #[arg(long, value_enum)]
        policy: Option<Policy>,
        /// Re-run an existing investigation
        #[arg(long)]
        rerun: Option<String>,
        /// Print the report as JSON instead of markdown
        #[arg(long)]
        json: bool,
    },
    /// Show node and relationship counts
    Stats,
    /// Write a default graphsec.toml
    InitConfig {
        #[arg(default_value = "graphsec.toml")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    Any,
    Majority,
    Unanimous,
}

impl From<Policy> for ConflictPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Any => ConflictPolicy::Any,
            Policy::Majority => ConflictPolicy::Majority,
            Policy::Unanimous => ConflictPolicy::Unanimous,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_logging(cli.log_json);

    if let Commands::InitConfig { path, force } = &cli.command {
        return init_config(path, *force);
    }

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .wrap_err_with(|| format!("failed to load {}", path.display()))?,
        None => Config::load().wrap_err("failed to load configuration")?,
    };
    if config.status.persist_dir.is_none() {
        config.status.persist_dir = Some(PathBuf::from(DEFAULT_STATUS_DIR));
    }
    let store = open_store(&config).await?;

    match cli.command {
        Commands::Ingest {
            path,
            uri,
            branch,
            doc_path,
            doc_uri,
            max_parallel,
            context_tokens,
            parse_only,
            id,
            json,
        } => {
            let request = IngestionRequest {
                local_path: if uri.is_none() {
                    Some(path.unwrap_or_else(|| PathBuf::from(".")))
                } else {
                    None
                },
                repo_uri: uri,
                branch,
                doc_path,
                doc_uri,
                max_parallel,
                context_token_limit: context_tokens,
                parse_only,
                ingestion_id: id,
            };
            let llm = if parse_only { None } else { Some(build_llm(&config)?) };
            let service = IngestionService::new(config, store, llm);
            let status = ingest(&service, request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
            if status.state == IngestionState::Failed {
                bail!("ingestion {} failed", status.id);
            }
        }
        Commands::Status { id, json } => {
            let service = IngestionService::new(config, store, None);
            let status = service.get_status(&id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
        Commands::Delete { id, investigation } => {
            if investigation {
                // Deleting needs no analyzers, so skip building a workflow.
                match store.get_node(&id).await? {
                    Some(node) if node.has_label(schema::INVESTIGATION) => {
                        store.delete_scope(&id).await?
                    }
                    _ => bail!("investigation {} not found", id),
                }
            } else {
                let service = IngestionService::new(config, store, None);
                service.delete_repository(&id).await?;
            }
            println!("Deleted {}", id);
        }
        Commands::Investigate {
            repositories,
            threshold,
            policy,
            rerun,
            json,
        } => {
            if threshold.is_some() {
                config.sources_sinks.confidence_threshold = threshold;
            }
            if let Some(policy) = policy {
                config.sources_sinks.conflict_policy = Some(policy.into());
            }
            let llm = if config.sources_sinks.analyzers.iter().any(|a| a == "llm") {
                Some(build_llm(&config)?)
            } else {
                None
            };
            let workflow = SourcesSinksWorkflow::from_config(store, llm, &config)?;
            let investigation_id = match rerun {
                Some(id) => id,
                None => workflow.create_investigation(&repositories).await?,
            };
            let report = investigate(&workflow, &investigation_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.to_markdown());
            }
        }
        Commands::Stats => {
            let stats = store.stats().await?;
            println!("Nodes:         {}", stats.nodes);
            println!("Relationships: {}", stats.relationships);
        }
        Commands::InitConfig { path, force } => init_config(&path, force)?,
    }

    Ok(())
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    std::fs::write(path, Config::default_config_string())
        .wrap_err_with(|| format!("failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    println!("Set sources_sinks.confidence_threshold and conflict_policy before investigating.");
    Ok(())
}

async fn open_store(config: &Config) -> Result<Arc<dyn GraphStore>> {
    match config.graph.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryGraphStore::new())),
        _ => {
            let path = if config.graph.path.is_empty() {
                PathBuf::from(DEFAULT_GRAPH_PATH)
            } else {
                PathBuf::from(&config.graph.path)
            };
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = SurrealGraphStore::open(&path)
                .await
                .wrap_err_with(|| format!("failed to open graph at {}", path.display()))?;
            Ok(Arc::new(store))
        }
    }
}

fn build_llm(config: &Config) -> Result<Arc<dyn LLM>> {
    let llm = Provider::from_config(&config.llm)?
        .build()
        .wrap_err("failed to configure the LLM provider")?;
    Ok(llm)
}

/// Run an ingestion in the background and follow it on a progress bar.
/// Ctrl-C cancels the run and waits for it to wind down.
async fn ingest(service: &IngestionService, request: IngestionRequest) -> Result<IngestionStatus> {
    let id = service.start_ingestion(request)?;
    tracing::info!(ingestion_id = %id, "ingestion started");

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>3}% {msg}")?
            .progress_chars("##-"),
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancelled = false;

    let status = loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut ctrl_c, if !cancelled => {
                cancelled = true;
                bar.set_message("cancelling");
                service.cancel(&id);
                continue;
            }
        }

        let status = service.get_status(&id)?;
        bar.set_position(status.progress.clamp(0.0, 100.0) as u64);
        if !cancelled {
            bar.set_message(format!(
                "{} ({}/{} files)",
                status.state.as_str(),
                status.files_processed,
                status.total_files
            ));
        }
        if status.state.is_terminal() {
            break status;
        }
    };

    bar.finish_with_message(status.state.as_str().to_string());
    Ok(status)
}

async fn investigate(
    workflow: &SourcesSinksWorkflow,
    investigation_id: &str,
) -> Result<InvestigationReport> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_message(format!("analyzing {}", investigation_id));
    spinner.enable_steady_tick(Duration::from_millis(120));
    let report = workflow.run(investigation_id).await;
    spinner.finish_and_clear();
    Ok(report?)
}

fn print_status(status: &IngestionStatus) {
    println!("Ingestion {} (run {})", status.id, status.run);
    println!("  State:     {}", status.state.as_str());
    println!("  Progress:  {:.0}%", status.progress);
    println!("  Files:     {}/{}", status.files_processed, status.total_files);
    println!(
        "  Parsing:   {} files, {} nodes, {} calls resolved ({})",
        status.parsing_stats.files_parsed,
        status.parsing_stats.nodes_created,
        status.parsing_stats.calls_resolved,
        status.parsing_stats.parser
    );
    println!(
        "  Mapping:   {} mapped, {} unmapped, {} ambiguous",
        status.mapping_stats.mapped, status.mapping_stats.unmapped, status.mapping_stats.ambiguous
    );
    println!(
        "  Summaries: {} done, {} failed, {} skipped, {} LLM calls",
        status.summarization_stats.processed,
        status.summarization_stats.failed,
        status.summarization_stats.skipped,
        status.summarization_stats.llm_calls
    );
    println!(
        "  Docs:      {} documents, {} references",
        status.docs_stats.documents,
        status.docs_stats.file_references + status.docs_stats.ast_references
    );
    if let Some(failure) = &status.failure {
        println!("  Failure:   {}", failure);
    }
    if !status.errors.is_empty() {
        println!("  Errors:    {}", status.errors.len());
        for error in status.errors.iter().take(10) {
            println!("    - [{:?}] {}: {}", error.kind, error.item_id, error.message);
        }
        if status.errors.len() > 10 {
            println!("    ... and {} more", status.errors.len() - 10);
        }
    }
}
