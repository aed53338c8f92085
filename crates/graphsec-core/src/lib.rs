pub mod config;
pub mod docs;
pub mod error;
pub mod fs;
pub mod graph;
pub mod ingest;
pub mod llm;
pub mod mapper;
pub mod parser;
pub mod repository;
pub mod sources_sinks;
pub mod summarizer;

pub use config::Config;
pub use error::{IngestError, ItemError};
pub use graph::{GraphStore, MemoryGraphStore, SurrealGraphStore};
pub use ingest::{IngestionRequest, IngestionService, IngestionState, IngestionStatus};
pub use sources_sinks::{InvestigationReport, SourcesSinksWorkflow};
