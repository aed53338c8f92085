//! Graph store error types.

use thiserror::Error;

/// Errors raised by a [`GraphStore`](super::GraphStore) backend.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Backend connection or query error.
    #[error("Database error: {0}")]
    Database(String),

    /// Node id did not resolve.
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// A relationship endpoint is missing.
    #[error("Relationship endpoint missing: {0}")]
    MissingEndpoint(String),

    /// Stored properties could not be decoded.
    #[error("Corrupted record {id}: {message}")]
    Corrupted { id: String, message: String },

    /// The backend does not implement this operation.
    #[error("Unsupported by this backend: {0}")]
    Unsupported(String),
}

impl From<surrealdb::Error> for GraphError {
    fn from(err: surrealdb::Error) -> Self {
        GraphError::Database(err.to_string())
    }
}
