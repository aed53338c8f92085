//! Ingestion pipeline driver.
//!
//! [`IngestionService`] runs the stages in order, all writing into the same
//! graph scope (the ingestion id):
//!
//! | Stage | Progress |
//! |---|---|
//! | repository access | 0-5 |
//! | filesystem graph | 5-15 |
//! | parsing | 15-35 |
//! | AST-to-File mapping | 35-45 |
//! | summarization | 45-95 |
//! | documentation | 95-100 |
//!
//! Stage-level errors abort the run and mark it `failed`; item-level errors
//! are collected in the status record. Cancellation stops between and inside
//! stages and marks the run `cancelled`.

pub mod builder;
pub mod status;

pub use builder::{build_filesystem_graph, repository_node_id, FilesystemGraph};
pub use status::{IngestionState, IngestionStatus, StatusHandle, StatusTracker};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::docs::DocumentationProcessor;
use crate::error::IngestError;
use crate::fs::{FileSystem, LocalFileSystem};
use crate::graph::{GraphStore, Properties};
use crate::llm::LLM;
use crate::mapper::AstFileMapper;
use crate::parser::{CodeParser, ParseContext, ParserRegistry};
use crate::repository::{materialize, MaterializeOptions, RepositorySource};
use crate::summarizer::{CodeSummarizer, LlmSummarizer, SummarizerSettings, SummaryPipeline};

/// Caller input for one ingestion.
#[derive(Debug, Clone, Default)]
pub struct IngestionRequest {
    pub local_path: Option<PathBuf>,
    pub repo_uri: Option<String>,
    pub branch: Option<String>,
    pub doc_path: Option<PathBuf>,
    pub doc_uri: Option<String>,
    /// Summarizer workers; config default when `None`.
    pub max_parallel: Option<usize>,
    /// Summarizer context budget in tokens; config default when `None`.
    pub context_token_limit: Option<usize>,
    /// Stop after mapping; no LLM calls are made.
    pub parse_only: bool,
    /// Reuse an id to re-ingest into the same scope.
    pub ingestion_id: Option<String>,
}

impl IngestionRequest {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn git(uri: impl Into<String>, branch: Option<String>) -> Self {
        Self {
            repo_uri: Some(uri.into()),
            branch,
            ..Self::default()
        }
    }
}

/// A validated request ready to run.
struct Prepared {
    id: String,
    source: RepositorySource,
    parser: Arc<dyn CodeParser>,
    status: StatusHandle,
    cancel: CancellationToken,
}

/// Entry point for ingestion runs.
#[derive(Clone)]
pub struct IngestionService {
    config: Arc<Config>,
    store: Arc<dyn GraphStore>,
    fs: Arc<dyn FileSystem>,
    parsers: ParserRegistry,
    summarizer: Option<Arc<dyn CodeSummarizer>>,
    tracker: Arc<StatusTracker>,
    running: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl IngestionService {
    /// Service over the local filesystem and the built-in parsers. Without
    /// an LLM only `parse_only` requests are accepted.
    pub fn new(config: Config, store: Arc<dyn GraphStore>, llm: Option<Arc<dyn LLM>>) -> Self {
        let summarizer = llm.map(|llm| {
            Arc::new(LlmSummarizer::new(llm, config.summarizer.max_summary_tokens))
                as Arc<dyn CodeSummarizer>
        });
        Self {
            parsers: ParserRegistry::with_defaults(&config),
            tracker: Arc::new(StatusTracker::new(config.status.persist_dir.clone())),
            config: Arc::new(config),
            store,
            fs: Arc::new(LocalFileSystem),
            summarizer,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn with_parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = parsers;
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn CodeSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<StatusTracker> {
        &self.tracker
    }

    /// Validate the request and start it in the background.
    ///
    /// Input errors are returned here, before any id is handed out.
    pub fn start_ingestion(&self, request: IngestionRequest) -> Result<String, IngestError> {
        let prepared = self.prepare(&request)?;
        let id = prepared.id.clone();
        let service = self.clone();
        tokio::spawn(async move {
            service.drive(prepared, request).await;
        });
        Ok(id)
    }

    /// Validate and run to completion, returning the final status.
    pub async fn run_ingestion(
        &self,
        request: IngestionRequest,
    ) -> Result<IngestionStatus, IngestError> {
        let prepared = self.prepare(&request)?;
        Ok(self.drive(prepared, request).await)
    }

    pub fn get_status(&self, ingestion_id: &str) -> Result<IngestionStatus, IngestError> {
        self.tracker
            .get(ingestion_id)
            .ok_or_else(|| IngestError::NotFound(ingestion_id.to_string()))
    }

    /// Request cancellation. Returns `false` when the run is not active.
    pub fn cancel(&self, ingestion_id: &str) -> bool {
        match self.running.lock().get(ingestion_id) {
            Some(token) => {
                tracing::info!(ingestion_id, "cancelling ingestion");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Delete a repository subtree and its status record.
    pub async fn delete_repository(&self, ingestion_id: &str) -> Result<(), IngestError> {
        if self.running.lock().contains_key(ingestion_id) {
            return Err(IngestError::InvalidInput(format!(
                "ingestion {} is still running",
                ingestion_id
            )));
        }
        let known = self.tracker.get(ingestion_id).is_some()
            || self
                .store
                .get_node(&repository_node_id(ingestion_id))
                .await?
                .is_some();
        if !known {
            return Err(IngestError::NotFound(ingestion_id.to_string()));
        }
        self.store.delete_scope(ingestion_id).await?;
        self.tracker.remove(ingestion_id);
        tracing::info!(ingestion_id, "repository deleted");
        Ok(())
    }

    fn prepare(&self, request: &IngestionRequest) -> Result<Prepared, IngestError> {
        let source = RepositorySource::from_parts(
            request.local_path.clone(),
            request.repo_uri.clone(),
            request.branch.clone(),
        )?;
        if request.max_parallel == Some(0) {
            return Err(IngestError::InvalidInput("max_parallel must be at least 1".into()));
        }
        if request.context_token_limit == Some(0) {
            return Err(IngestError::InvalidInput(
                "context_token_limit must be positive".into(),
            ));
        }
        if !request.parse_only && self.summarizer.is_none() {
            return Err(IngestError::InvalidInput(
                "summarization requires an LLM; configure one or use parse_only".into(),
            ));
        }
        let parser = self.parsers.get(&self.config.ingestion.parser)?;

        let id = match &request.ingestion_id {
            Some(id) if id.trim().is_empty() => {
                return Err(IngestError::InvalidInput("ingestion id is empty".into()))
            }
            Some(id) => id.clone(),
            None => format!("ingest-{}", Uuid::new_v4()),
        };

        let cancel = CancellationToken::new();
        {
            let mut running = self.running.lock();
            if running.contains_key(&id) {
                return Err(IngestError::InvalidInput(format!(
                    "ingestion {} is already running",
                    id
                )));
            }
            running.insert(id.clone(), cancel.clone());
        }
        let status = self.tracker.register(&id);

        Ok(Prepared {
            id,
            source,
            parser,
            status,
            cancel,
        })
    }

    async fn drive(&self, prepared: Prepared, request: IngestionRequest) -> IngestionStatus {
        let Prepared {
            id,
            source,
            parser,
            status,
            cancel,
        } = prepared;
        tracing::info!(ingestion_id = %id, source = %source.display(), "ingestion started");

        let result = self
            .execute(&id, &request, source, parser, &status, &cancel)
            .await;
        match result {
            Ok(()) if cancel.is_cancelled() => status.cancel(),
            Ok(()) => status.complete(),
            Err(IngestError::Cancelled) => status.cancel(),
            Err(e) => {
                tracing::error!(ingestion_id = %id, error = %e, "ingestion failed");
                status.fail(e.to_string());
            }
        }

        let final_status = status.snapshot();
        self.mark_repository(&id, final_status.state.as_str()).await;
        self.running.lock().remove(&id);
        final_status
    }

    async fn execute(
        &self,
        id: &str,
        request: &IngestionRequest,
        source: RepositorySource,
        parser: Arc<dyn CodeParser>,
        status: &StatusHandle,
        cancel: &CancellationToken,
    ) -> Result<(), IngestError> {
        parser.ensure_available().await?;

        status.enter(IngestionState::Materializing, 0.0);
        let options = MaterializeOptions {
            clone_dir: self.config.ingestion.clone_dir.clone(),
            clone_timeout: Duration::from_secs(self.config.ingestion.clone_timeout_secs),
        };
        let repo = tokio::select! {
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            repo = materialize(source, &options) => repo?,
        };

        status.enter(IngestionState::BuildingFilesystem, 5.0);
        let layout =
            build_filesystem_graph(&self.store, &repo, id, &self.config.ingestion, cancel).await?;
        status.update(|s| {
            s.repository_id = Some(layout.repository_id.clone());
            s.total_files = layout.files.len();
        });
        tracing::info!(
            ingestion_id = id,
            files = layout.files.len(),
            directories = layout.directories,
            bytes = layout.total_bytes,
            "filesystem graph built"
        );
        checkpoint(cancel)?;

        status.enter(IngestionState::Parsing, 15.0);
        self.mark_repository(id, IngestionState::Parsing.as_str()).await;
        let ctx = ParseContext {
            root: repo.root.clone(),
            scope: id.to_string(),
            files: Arc::new(layout.files),
            store: self.store.clone(),
            fs: self.fs.clone(),
            cancel: cancel.clone(),
        };
        let parsed = parser.parse(&ctx).await?;
        status.update(|s| {
            s.files_processed = parsed.stats.files_parsed;
            s.parsing_stats = parsed.stats.clone();
        });
        for error in parsed.errors {
            status.record_error(error);
        }
        checkpoint(cancel)?;

        status.enter(IngestionState::Mapping, 35.0);
        let mapper = AstFileMapper::new(
            self.store.clone(),
            self.config.ingestion.case_sensitive_paths,
        );
        let mapped = mapper
            .map_scope(id, cancel, |done, total| {
                status.set_progress(within((35.0, 45.0), done, total));
            })
            .await?;
        status.update(|s| s.mapping_stats = mapped.stats.clone());
        for error in mapped.errors {
            status.record_error(error);
        }
        checkpoint(cancel)?;

        if request.parse_only {
            tracing::info!(ingestion_id = id, "parse_only set, skipping summarization");
        } else if let Some(summarizer) = &self.summarizer {
            status.enter(IngestionState::Summarizing, 45.0);
            self.mark_repository(id, IngestionState::Summarizing.as_str())
                .await;
            let mut settings = SummarizerSettings::from(&self.config.summarizer);
            if let Some(n) = request.max_parallel {
                settings.max_parallel = n;
            }
            if let Some(limit) = request.context_token_limit {
                settings.context_token_limit = limit;
            }
            SummaryPipeline::new(
                self.store.clone(),
                self.fs.clone(),
                summarizer.clone(),
                settings,
            )
            .run(id, status, cancel, (45.0, 95.0))
            .await?;
            checkpoint(cancel)?;
        }

        if request.doc_path.is_some() || request.doc_uri.is_some() {
            status.enter(IngestionState::ProcessingDocs, 95.0);
            let processor = DocumentationProcessor::new(
                self.store.clone(),
                self.fs.clone(),
                self.config.docs.clone(),
            )?;
            let docs = processor
                .process(
                    id,
                    request.doc_path.as_deref(),
                    request.doc_uri.as_deref(),
                    cancel,
                )
                .await?;
            status.update(|s| s.docs_stats = docs.stats.clone());
            for error in docs.errors {
                status.record_error(error);
            }
        }

        // The clone, if any, is removed here.
        drop(repo);
        Ok(())
    }

    /// Best-effort state mirror on the Repository node.
    async fn mark_repository(&self, id: &str, state: &str) {
        let mut props = Properties::new();
        props.insert("state".into(), state.into());
        if let Err(e) = self
            .store
            .update_properties(&repository_node_id(id), props)
            .await
        {
            tracing::debug!(ingestion_id = id, error = %e, "repository node not updated");
        }
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), IngestError> {
    if cancel.is_cancelled() {
        Err(IngestError::Cancelled)
    } else {
        Ok(())
    }
}

/// Position of `done / total` inside a progress band.
fn within(band: (f64, f64), done: usize, total: usize) -> f64 {
    if total == 0 {
        return band.1;
    }
    band.0 + (band.1 - band.0) * (done as f64 / total as f64)
}
