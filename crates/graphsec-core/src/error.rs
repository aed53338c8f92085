//! Pipeline error taxonomy.
//!
//! [`IngestError`] is a hard failure: it aborts the run and lands in the
//! status record as `failed`. [`ItemError`] is a soft, per-item failure that
//! is counted and reported but never stops the pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::graph::GraphError;
use crate::parser::ParserError;

/// Hard failures of an ingestion run.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Malformed caller input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Repository path unreadable or URI not clonable.
    #[error("Repository not accessible: {0}")]
    Access(String),

    /// Requested branch does not exist on the remote.
    #[error("Branch '{branch}' not found in {uri}")]
    BranchNotFound { uri: String, branch: String },

    /// A required parser could not be initialized.
    #[error("Parser '{name}' unavailable: {reason}")]
    ParserUnavailable { name: String, reason: String },

    /// Parser failed as a whole.
    #[error("Parser failed: {0}")]
    Parser(String),

    /// Structural graph write failed.
    #[error("Graph store error: {0}")]
    GraphStore(#[from] GraphError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Unknown ingestion id.
    #[error("Ingestion not found: {0}")]
    NotFound(String),

    /// The run was cancelled.
    #[error("Ingestion cancelled")]
    Cancelled,
}

impl From<ParserError> for IngestError {
    fn from(err: ParserError) -> Self {
        match err {
            ParserError::Unavailable { name, reason } => {
                IngestError::ParserUnavailable { name, reason }
            }
            ParserError::NotRegistered(name) => IngestError::ParserUnavailable {
                name,
                reason: "no parser registered under this name".to_string(),
            },
            ParserError::Graph(e) => IngestError::GraphStore(e),
            ParserError::Cancelled => IngestError::Cancelled,
            other => IngestError::Parser(other.to_string()),
        }
    }
}

/// Pipeline stage that produced an item error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Filesystem,
    Parsing,
    Mapping,
    Summarizing,
    Documentation,
}

/// Classification of soft failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorKind {
    Parse,
    Summarization,
    MappingAmbiguity,
    LlmTransient,
    GraphStore,
    Documentation,
}

/// A soft, per-item failure recorded in the ingestion status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub stage: Stage,
    pub kind: ItemErrorKind,
    /// Node id or path of the failing item.
    pub item_id: String,
    pub message: String,
    pub retry_count: u32,
}

impl ItemError {
    pub fn new(
        stage: Stage,
        kind: ItemErrorKind,
        item_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            kind,
            item_id: item_id.into(),
            message: message.into(),
            retry_count: 0,
        }
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

impl std::fmt::Display for ItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}/{:?} {}: {} (retries: {})",
            self.stage, self.kind, self.item_id, self.message, self.retry_count
        )
    }
}
