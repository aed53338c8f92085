//! Ingestion status tracking.
//!
//! One [`IngestionStatus`] record per ingestion id. Every pipeline stage and
//! every summarizer worker writes through a cloned [`StatusHandle`]; the
//! record sits behind a short `parking_lot` mutex that is never held across
//! an await.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::docs::DocsStats;
use crate::error::ItemError;
use crate::mapper::MappingStats;
use crate::parser::ParseStats;
use crate::summarizer::SummarizationStats;

/// Lifecycle of one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionState {
    Queued,
    Materializing,
    BuildingFilesystem,
    Parsing,
    Mapping,
    Summarizing,
    ProcessingDocs,
    Completed,
    CompletedWithErrors,
    Failed,
    Cancelled,
}

impl IngestionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            IngestionState::Completed
                | IngestionState::CompletedWithErrors
                | IngestionState::Failed
                | IngestionState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IngestionState::Queued => "queued",
            IngestionState::Materializing => "materializing",
            IngestionState::BuildingFilesystem => "building_filesystem",
            IngestionState::Parsing => "parsing",
            IngestionState::Mapping => "mapping",
            IngestionState::Summarizing => "summarizing",
            IngestionState::ProcessingDocs => "processing_docs",
            IngestionState::Completed => "completed",
            IngestionState::CompletedWithErrors => "completed_with_errors",
            IngestionState::Failed => "failed",
            IngestionState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for IngestionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress and outcome of one ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionStatus {
    pub id: String,
    /// Run number under this id, starting at 1.
    #[serde(default = "first_run")]
    pub run: u32,
    pub state: IngestionState,
    /// Percentage in `[0, 100]`, never decreasing under one id.
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub files_processed: usize,
    pub total_files: usize,
    pub errors: Vec<ItemError>,
    /// Hard failure message when `state` is `failed`.
    pub failure: Option<String>,
    pub parsing_stats: ParseStats,
    pub mapping_stats: MappingStats,
    pub summarization_stats: SummarizationStats,
    pub docs_stats: DocsStats,
    pub repository_id: Option<String>,
    /// Seconds since the run was registered.
    pub elapsed_time: f64,
}

fn first_run() -> u32 {
    1
}

impl IngestionStatus {
    fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            run: first_run(),
            state: IngestionState::Queued,
            progress: 0.0,
            created_at: now,
            updated_at: now,
            finished_at: None,
            files_processed: 0,
            total_files: 0,
            errors: Vec::new(),
            failure: None,
            parsing_stats: ParseStats::default(),
            mapping_stats: MappingStats::default(),
            summarization_stats: SummarizationStats::default(),
            docs_stats: DocsStats::default(),
            repository_id: None,
            elapsed_time: 0.0,
        }
    }
}

/// Shared writer for one status record.
#[derive(Clone)]
pub struct StatusHandle {
    inner: Arc<Mutex<IngestionStatus>>,
    started: Instant,
    persist_dir: Option<PathBuf>,
}

impl StatusHandle {
    /// A handle not registered with any tracker.
    pub fn detached(id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(IngestionStatus::new(id.into()))),
            started: Instant::now(),
            persist_dir: None,
        }
    }

    pub fn id(&self) -> String {
        self.inner.lock().id.clone()
    }

    /// Copy of the current record.
    pub fn snapshot(&self) -> IngestionStatus {
        let mut status = self.inner.lock().clone();
        if !status.state.is_terminal() {
            status.elapsed_time = self.started.elapsed().as_secs_f64();
        }
        status
    }

    pub fn state(&self) -> IngestionState {
        self.inner.lock().state
    }

    /// Enter a stage. Ignored once the run is terminal.
    pub fn enter(&self, state: IngestionState, progress: f64) {
        self.update(|s| {
            if !s.state.is_terminal() {
                s.state = state;
            }
            raise_progress(s, progress);
        });
    }

    /// Raise progress; lower values are ignored.
    pub fn set_progress(&self, progress: f64) {
        self.update(|s| raise_progress(s, progress));
    }

    /// Apply an arbitrary mutation under the lock.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut IngestionStatus),
    {
        let mut status = self.inner.lock();
        f(&mut status);
        status.updated_at = Utc::now();
        status.elapsed_time = self.started.elapsed().as_secs_f64();
    }

    pub fn record_error(&self, error: ItemError) {
        tracing::warn!(item = %error.item_id, kind = ?error.kind, "{}", error.message);
        self.update(|s| s.errors.push(error));
    }

    /// Finish successfully; `completed_with_errors` if soft errors accumulated.
    pub fn complete(&self) {
        self.finish(|s| {
            s.state = if s.errors.is_empty() {
                IngestionState::Completed
            } else {
                IngestionState::CompletedWithErrors
            };
            s.progress = 100.0;
        });
    }

    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        self.finish(|s| {
            s.state = IngestionState::Failed;
            s.failure = Some(message);
        });
    }

    pub fn cancel(&self) {
        self.finish(|s| s.state = IngestionState::Cancelled);
    }

    fn finish<F>(&self, f: F)
    where
        F: FnOnce(&mut IngestionStatus),
    {
        let snapshot = {
            let mut status = self.inner.lock();
            if status.state.is_terminal() {
                return;
            }
            f(&mut status);
            let now = Utc::now();
            status.updated_at = now;
            status.finished_at = Some(now);
            status.elapsed_time = self.started.elapsed().as_secs_f64();
            status.clone()
        };

        tracing::info!(
            ingestion_id = %snapshot.id,
            state = %snapshot.state,
            errors = snapshot.errors.len(),
            elapsed = snapshot.elapsed_time,
            "ingestion finished"
        );

        if let Some(dir) = &self.persist_dir {
            if let Err(e) = persist(dir, &snapshot) {
                tracing::warn!(ingestion_id = %snapshot.id, error = %e, "failed to persist status");
            }
        }
    }
}

fn raise_progress(status: &mut IngestionStatus, progress: f64) {
    let clamped = progress.clamp(0.0, 100.0);
    if clamped > status.progress {
        status.progress = clamped;
    }
}

fn persist(dir: &PathBuf, status: &IngestionStatus) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let json = serde_json::to_string_pretty(status).map_err(std::io::Error::other)?;
    std::fs::write(dir.join(format!("{}.json", status.id)), json)
}

/// Registry of status records keyed by ingestion id.
#[derive(Default)]
pub struct StatusTracker {
    records: RwLock<HashMap<String, StatusHandle>>,
    persist_dir: Option<PathBuf>,
}

impl StatusTracker {
    pub fn new(persist_dir: Option<PathBuf>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            persist_dir,
        }
    }

    /// Register a run under `id`.
    ///
    /// A reused id starts the next run on the same record: `run` goes up and
    /// progress keeps the previous run's value as its floor.
    pub fn register(&self, id: &str) -> StatusHandle {
        let mut status = IngestionStatus::new(id.to_string());
        if let Some(previous) = self.get(id) {
            status.run = previous.run.saturating_add(1);
            status.progress = previous.progress;
            status.created_at = previous.created_at;
        }
        let handle = StatusHandle {
            inner: Arc::new(Mutex::new(status)),
            started: Instant::now(),
            persist_dir: self.persist_dir.clone(),
        };
        self.records.write().insert(id.to_string(), handle.clone());
        handle
    }

    pub fn handle(&self, id: &str) -> Option<StatusHandle> {
        self.records.read().get(id).cloned()
    }

    /// Current status, falling back to a persisted snapshot.
    pub fn get(&self, id: &str) -> Option<IngestionStatus> {
        if let Some(handle) = self.handle(id) {
            return Some(handle.snapshot());
        }
        let dir = self.persist_dir.as_ref()?;
        let raw = std::fs::read_to_string(dir.join(format!("{}.json", id))).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn remove(&self, id: &str) -> Option<IngestionStatus> {
        self.records.write().remove(id).map(|h| h.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ItemErrorKind, Stage};

    #[test]
    fn test_progress_is_monotonic() {
        let handle = StatusHandle::detached("run-1");
        handle.enter(IngestionState::Parsing, 20.0);
        handle.set_progress(10.0);
        assert_eq!(handle.snapshot().progress, 20.0);
        handle.set_progress(150.0);
        assert_eq!(handle.snapshot().progress, 100.0);
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let handle = StatusHandle::detached("run-1");
        handle.cancel();
        handle.enter(IngestionState::Summarizing, 50.0);
        handle.complete();
        handle.fail("late");
        let status = handle.snapshot();
        assert_eq!(status.state, IngestionState::Cancelled);
        assert!(status.failure.is_none());
    }

    #[test]
    fn test_complete_with_errors() {
        let handle = StatusHandle::detached("run-1");
        handle.record_error(ItemError::new(
            Stage::Parsing,
            ItemErrorKind::Parse,
            "a.py",
            "bad syntax",
        ));
        handle.complete();
        assert_eq!(handle.state(), IngestionState::CompletedWithErrors);
    }

    #[test]
    fn test_tracker_persists_terminal_status() {
        let dir = tempfile::TempDir::new().unwrap();
        let tracker = StatusTracker::new(Some(dir.path().to_path_buf()));
        let handle = tracker.register("run-9");
        handle.complete();

        assert!(dir.path().join("run-9.json").exists());
        tracker.remove("run-9");
        let restored = tracker.get("run-9").unwrap();
        assert_eq!(restored.state, IngestionState::Completed);
    }

    #[test]
    fn test_reused_id_keeps_progress_floor() {
        let tracker = StatusTracker::new(None);
        let first = tracker.register("same");
        first.enter(IngestionState::Parsing, 40.0);
        first.complete();

        let second = tracker.register("same");
        let status = tracker.get("same").unwrap();
        assert_eq!(status.run, 2);
        assert_eq!(status.state, IngestionState::Queued);
        assert_eq!(status.progress, 100.0);

        second.enter(IngestionState::Parsing, 10.0);
        assert_eq!(tracker.get("same").unwrap().progress, 100.0);
        assert_eq!(first.snapshot().run, 1);
    }

    #[test]
    fn test_concurrent_updates() {
        let handle = StatusHandle::detached("run-1");
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let h = handle.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        h.update(|s| s.summarization_stats.processed += 1);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(handle.snapshot().summarization_stats.processed, 800);
    }
}
