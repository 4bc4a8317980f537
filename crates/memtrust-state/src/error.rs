//! Error types for memtrust-state

use thiserror::Error;

/// Errors surfaced by semantic store and embedder implementations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend could not be reached
    #[error("Store connection failed: {0}")]
    Connection(String),

    /// Upsert, delete, get or list failed inside the backend
    #[error("Store operation failed: {0}")]
    Operation(String),

    /// Query failed inside the backend
    #[error("Store query failed: {0}")]
    Query(String),

    /// Document rejected before it reached the backend
    #[error("Invalid document {id}: {reason}")]
    InvalidDocument { id: String, reason: String },

    /// Embedding dimension does not match what the store expects
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embedding computation failed
    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
