//! Code summarizer.
//!
//! A bounded pool of workers drains a queue of File and AST nodes lacking a
//! CodeSummary. Each worker reads the code through the [`FileSystem`],
//! prompts the LLM with the code plus a rolling context of earlier
//! summaries, and writes a CodeSummary node linked `DESCRIBES` to its target.
//!
//! Transient LLM failures (timeouts, rate limits, 5xx) and graph write
//! failures are retried with exponential backoff up to `max_retries`; every
//! other failure is permanent for that item. With K items the pool makes at
//! most K × (max_retries + 1) LLM calls.

mod context;
mod prompts;
mod queue;

pub use context::{estimate_tokens, ContextBuffer};
pub use prompts::{build_summary_prompt, SUMMARY_SYSTEM_PROMPT};
pub use queue::{Work, WorkQueue};

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::SummarizerConfig;
use crate::error::{IngestError, ItemError, ItemErrorKind, Stage};
use crate::fs::FileSystem;
use crate::graph::{
    node_id, schema, GraphError, GraphNode, GraphStore, NodeDraft, NodeFilter, Properties,
    RelationshipDraft, RelationshipFilter,
};
use crate::ingest::status::StatusHandle;
use crate::llm::{LLMError, LLM};

/// AST kinds that get summaries.
const SUMMARIZED_KINDS: [&str; 3] = ["Function", "Class", "Method"];

/// Counters for one summarization run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummarizationStats {
    pub total: usize,
    pub processed: usize,
    pub remaining: usize,
    pub failed: usize,
    /// Targets that already had a summary.
    pub skipped: usize,
    pub retries: usize,
    pub llm_calls: usize,
    pub workers: usize,
    pub elapsed_secs: f64,
}

/// A node waiting for a summary.
#[derive(Debug, Clone)]
pub struct SummaryItem {
    pub node_id: String,
    /// `File`, or the AST kind label.
    pub kind: String,
    pub name: String,
    pub language: String,
    /// Root-relative path for display.
    pub location: String,
    pub abs_path: PathBuf,
    /// Inclusive 1-based line range; whole file when `None`.
    pub lines: Option<(usize, usize)>,
}

/// Produces the summary text for one item.
#[async_trait]
pub trait CodeSummarizer: Send + Sync {
    fn name(&self) -> &str;

    async fn summarize(
        &self,
        item: &SummaryItem,
        content: &str,
        context: &str,
    ) -> Result<String, LLMError>;
}

/// Summarizer backed by an [`LLM`] client.
pub struct LlmSummarizer {
    llm: Arc<dyn LLM>,
    max_tokens: u32,
}

impl LlmSummarizer {
    pub fn new(llm: Arc<dyn LLM>, max_tokens: u32) -> Self {
        Self { llm, max_tokens }
    }
}

#[async_trait]
impl CodeSummarizer for LlmSummarizer {
    fn name(&self) -> &str {
        "llm"
    }

    async fn summarize(
        &self,
        item: &SummaryItem,
        content: &str,
        context: &str,
    ) -> Result<String, LLMError> {
        let location = match item.lines {
            Some((start, end)) => format!("{}:{}-{}", item.location, start, end),
            None => item.location.clone(),
        };
        let prompt = build_summary_prompt(
            &item.name,
            &item.kind,
            &item.language,
            &location,
            content,
            context,
        );
        self.llm
            .complete_with_system(SUMMARY_SYSTEM_PROMPT, &prompt, self.max_tokens)
            .await
    }
}

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct SummarizerSettings {
    pub max_parallel: usize,
    pub context_token_limit: usize,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub request_timeout: Duration,
    pub max_content_chars: usize,
    pub summarize_files: bool,
    pub summarize_ast: bool,
}

impl From<&SummarizerConfig> for SummarizerSettings {
    fn from(config: &SummarizerConfig) -> Self {
        Self {
            max_parallel: config.max_parallel,
            context_token_limit: config.context_token_limit,
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            max_content_chars: config.max_content_chars,
            summarize_files: config.summarize_files,
            summarize_ast: config.summarize_ast,
        }
    }
}

impl Default for SummarizerSettings {
    fn default() -> Self {
        Self::from(&SummarizerConfig::default())
    }
}

impl SummarizerSettings {
    /// Delay before retry number `retries + 1`: `base * 2^retries`, capped.
    pub fn backoff(&self, retries: u32) -> Duration {
        let factor = 1u32 << retries.min(16);
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }
}

/// Id of the CodeSummary node for a target within an ingestion.
pub fn summary_node_id(scope: &str, target_id: &str) -> String {
    node_id(scope, schema::CODE_SUMMARY, target_id)
}

/// Runs the summarization worker pool.
pub struct SummaryPipeline {
    store: Arc<dyn GraphStore>,
    fs: Arc<dyn FileSystem>,
    summarizer: Arc<dyn CodeSummarizer>,
    settings: SummarizerSettings,
}

enum Failure {
    Retryable(ItemErrorKind, String),
    Permanent(ItemErrorKind, String),
}

struct Shared {
    store: Arc<dyn GraphStore>,
    fs: Arc<dyn FileSystem>,
    summarizer: Arc<dyn CodeSummarizer>,
    settings: SummarizerSettings,
    scope: String,
    queue: WorkQueue<SummaryItem>,
    context: Mutex<ContextBuffer>,
    status: StatusHandle,
    cancel: CancellationToken,
    band: (f64, f64),
    total: usize,
    finished: AtomicUsize,
    started: Instant,
}

impl SummaryPipeline {
    pub fn new(
        store: Arc<dyn GraphStore>,
        fs: Arc<dyn FileSystem>,
        summarizer: Arc<dyn CodeSummarizer>,
        settings: SummarizerSettings,
    ) -> Self {
        Self {
            store,
            fs,
            summarizer,
            settings,
        }
    }

    /// Nodes of `scope` that still need a summary, plus the count of those
    /// already summarized.
    pub async fn collect_items(&self, scope: &str) -> Result<(Vec<SummaryItem>, usize), GraphError> {
        let files = self
            .store
            .find_nodes(&NodeFilter::label(schema::FILE).in_scope(scope))
            .await?;
        let by_id: HashMap<&str, &GraphNode> = files.iter().map(|f| (f.id.as_str(), f)).collect();

        let mut candidates = Vec::new();
        if self.settings.summarize_files {
            for file in &files {
                if file.prop_bool("oversized") {
                    continue;
                }
                let Some(language) = file.prop_str("language") else {
                    continue;
                };
                let (Some(path), Some(full)) = (file.prop_str("path"), file.prop_str("full_path"))
                else {
                    continue;
                };
                candidates.push(SummaryItem {
                    node_id: file.id.clone(),
                    kind: schema::FILE.to_string(),
                    name: path.to_string(),
                    language: language.to_string(),
                    location: path.to_string(),
                    abs_path: PathBuf::from(full),
                    lines: None,
                });
            }
        }

        if self.settings.summarize_ast {
            let nodes = self
                .store
                .find_nodes(
                    &NodeFilter::label(schema::AST_NODE)
                        .in_scope(scope)
                        .where_eq(schema::MAPPING_STATUS, schema::STATUS_MAPPED),
                )
                .await?;
            for node in &nodes {
                let Some(kind) = SUMMARIZED_KINDS.iter().find(|k| node.has_label(k)) else {
                    continue;
                };
                let Some(file) = node
                    .prop_str(schema::MAPPED_FILE_ID)
                    .and_then(|id| by_id.get(id))
                else {
                    continue;
                };
                if file.prop_bool("oversized") {
                    continue;
                }
                let Some(full) = file.prop_str("full_path") else {
                    continue;
                };
                let start = node.prop_u64("start_line").unwrap_or(1) as usize;
                let end = node.prop_u64("end_line").map_or(start, |e| e as usize);
                let name = node
                    .prop_str("qualified_name")
                    .or_else(|| node.prop_str("name"))
                    .unwrap_or(node.id.as_str());
                candidates.push(SummaryItem {
                    node_id: node.id.clone(),
                    kind: kind.to_string(),
                    name: name.to_string(),
                    language: node
                        .prop_str("language")
                        .or_else(|| file.prop_str("language"))
                        .unwrap_or("text")
                        .to_string(),
                    location: file.prop_str("path").unwrap_or(full).to_string(),
                    abs_path: PathBuf::from(full),
                    lines: Some((start, end.max(start))),
                });
            }
        }

        // Done means the summary is linked to its target; a summary node
        // without its DESCRIBES edge is written again.
        let described: HashSet<String> = self
            .store
            .find_relationships(&RelationshipFilter::of_type(schema::DESCRIBES).in_scope(scope))
            .await?
            .into_iter()
            .filter(|rel| rel.from == summary_node_id(scope, &rel.to))
            .map(|rel| rel.to)
            .collect();

        let mut items = Vec::with_capacity(candidates.len());
        let mut existing = 0;
        for item in candidates {
            if described.contains(&item.node_id) {
                existing += 1;
            } else {
                items.push(item);
            }
        }
        Ok((items, existing))
    }

    /// Summarize every pending node of `scope`, reporting into `status`.
    /// Progress moves from `band.0` to `band.1` as items finish.
    pub async fn run(
        &self,
        scope: &str,
        status: &StatusHandle,
        cancel: &CancellationToken,
        band: (f64, f64),
    ) -> Result<SummarizationStats, IngestError> {
        let (items, skipped) = self.collect_items(scope).await?;
        let total = items.len();
        let workers = self.settings.max_parallel.max(1).min(total.max(1));

        status.update(|s| {
            s.summarization_stats = SummarizationStats {
                total,
                remaining: total,
                skipped,
                workers,
                ..Default::default()
            };
        });
        tracing::info!(scope, items = total, skipped, workers, "summarizing");

        if total == 0 {
            status.set_progress(band.1);
            return Ok(status.snapshot().summarization_stats);
        }

        let shared = Arc::new(Shared {
            store: self.store.clone(),
            fs: self.fs.clone(),
            summarizer: self.summarizer.clone(),
            settings: self.settings.clone(),
            scope: scope.to_string(),
            queue: WorkQueue::new(items),
            context: Mutex::new(ContextBuffer::new(self.settings.context_token_limit)),
            status: status.clone(),
            cancel: cancel.clone(),
            band,
            total,
            finished: AtomicUsize::new(0),
            started: Instant::now(),
        });

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let shared = shared.clone();
                tokio::spawn(async move { shared.worker(worker).await })
            })
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "summarizer worker panicked");
            }
        }

        let stats = status.snapshot().summarization_stats;
        tracing::info!(
            processed = stats.processed,
            failed = stats.failed,
            retries = stats.retries,
            llm_calls = stats.llm_calls,
            "summarization finished"
        );
        Ok(stats)
    }
}

impl Shared {
    async fn worker(&self, worker: usize) {
        while let Some(mut work) = self.queue.next(&self.cancel).await {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.queue.done();
                    break;
                }
                outcome = self.attempt(&work.item) => outcome,
            };

            match outcome {
                Ok(()) => {
                    self.queue.done();
                    self.finish(|s| s.processed += 1);
                }
                Err(Failure::Retryable(kind, message)) if work.retries < self.settings.max_retries => {
                    let delay = self.settings.backoff(work.retries);
                    tracing::debug!(
                        worker,
                        item = %work.item.node_id,
                        retry = work.retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        kind = ?kind,
                        "retrying: {}",
                        message
                    );
                    work.retries += 1;
                    work.not_before = Instant::now() + delay;
                    self.queue.requeue(work);
                    self.status.update(|s| s.summarization_stats.retries += 1);
                }
                Err(Failure::Retryable(kind, message)) | Err(Failure::Permanent(kind, message)) => {
                    self.status.record_error(
                        ItemError::new(Stage::Summarizing, kind, &work.item.node_id, message)
                            .with_retries(work.retries),
                    );
                    self.queue.done();
                    self.finish(|s| s.failed += 1);
                }
            }
        }
    }

    /// Count a finished item and advance progress.
    fn finish<F>(&self, f: F)
    where
        F: FnOnce(&mut SummarizationStats),
    {
        let finished = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
        let remaining = self.queue.remaining();
        let elapsed = self.started.elapsed().as_secs_f64();
        let (start, end) = self.band;
        let progress = start + (end - start) * finished as f64 / self.total as f64;
        self.status.update(|s| {
            f(&mut s.summarization_stats);
            s.summarization_stats.remaining = remaining;
            s.summarization_stats.elapsed_secs = elapsed;
        });
        self.status.set_progress(progress);
    }

    async fn attempt(&self, item: &SummaryItem) -> Result<(), Failure> {
        let source = self
            .fs
            .read_file(&item.abs_path)
            .await
            .map_err(|e| Failure::Permanent(ItemErrorKind::Summarization, e.to_string()))?;
        let content = excerpt(&source, item.lines, self.settings.max_content_chars);
        if content.trim().is_empty() {
            return Err(Failure::Permanent(
                ItemErrorKind::Summarization,
                "no content to summarize".to_string(),
            ));
        }

        let context = self.context.lock().render();
        self.status.update(|s| s.summarization_stats.llm_calls += 1);
        let timeout = self.settings.request_timeout;
        let result = tokio::time::timeout(
            timeout,
            self.summarizer.summarize(item, &content, &context),
        )
        .await
        .unwrap_or(Err(LLMError::Timeout(timeout.as_secs())));

        let text = match result {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                return Err(Failure::Permanent(
                    ItemErrorKind::Summarization,
                    "empty summary".to_string(),
                ))
            }
            Err(e) if e.is_transient() => {
                return Err(Failure::Retryable(ItemErrorKind::LlmTransient, e.to_string()))
            }
            Err(e) => return Err(Failure::Permanent(ItemErrorKind::Summarization, e.to_string())),
        };

        self.persist(item, &text)
            .await
            .map_err(|e| Failure::Retryable(ItemErrorKind::GraphStore, e.to_string()))?;

        self.context.lock().push(&item.name, &text);
        Ok(())
    }

    async fn persist(&self, item: &SummaryItem, text: &str) -> Result<(), GraphError> {
        let scope = self.scope.as_str();
        let summary_id = summary_node_id(scope, &item.node_id);
        self.store
            .create_node(
                NodeDraft::new(scope, schema::CODE_SUMMARY)
                    .with_id(&summary_id)
                    .property("text", text)
                    .property("target_id", item.node_id.clone())
                    .property("target_kind", item.kind.clone())
                    .property("target_name", item.name.clone())
                    .property("generated_at", Utc::now().to_rfc3339())
                    .property("summarizer", self.summarizer.name()),
            )
            .await?;
        self.store
            .create_relationship(RelationshipDraft::new(
                &summary_id,
                schema::DESCRIBES,
                &item.node_id,
                scope,
            ))
            .await?;

        let mut props = Properties::new();
        props.insert("summary".to_string(), Value::String(text.to_string()));
        self.store.update_properties(&item.node_id, props).await
    }
}

/// Lines `start..=end` of `source`, cut to `max_chars` characters.
fn excerpt(source: &str, lines: Option<(usize, usize)>, max_chars: usize) -> String {
    let text = match lines {
        Some((start, end)) => source
            .lines()
            .skip(start.saturating_sub(1))
            .take(end.saturating_sub(start) + 1)
            .collect::<Vec<_>>()
            .join("\n"),
        None => source.to_string(),
    };
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let settings = SummarizerSettings {
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(500),
            ..Default::default()
        };
        assert_eq!(settings.backoff(0), Duration::from_millis(100));
        assert_eq!(settings.backoff(1), Duration::from_millis(200));
        assert_eq!(settings.backoff(2), Duration::from_millis(400));
        assert_eq!(settings.backoff(3), Duration::from_millis(500));
        assert_eq!(settings.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_excerpt() {
        let source = "a\nb\nc\nd";
        assert_eq!(excerpt(source, Some((2, 3)), 100), "b\nc");
        assert_eq!(excerpt(source, None, 3), "a\nb");
        assert_eq!(excerpt(source, Some((4, 9)), 100), "d");
    }

    #[test]
    fn test_summary_id_is_per_scope() {
        assert_eq!(summary_node_id("s", "n"), summary_node_id("s", "n"));
        assert_ne!(summary_node_id("s", "n"), summary_node_id("t", "n"));
    }
}
