//! Error types for the trust layer.

use memtrust_state::StorageError;

/// Errors produced by provenance, lineage, semantic-memory and quality operations.
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    /// Required input was empty or malformed; nothing was mutated.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("semantic store error: {0}")]
    Store(#[from] StorageError),

    #[error("completion provider error: {0}")]
    Completion(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    /// An explicitly absent record, distinct from an empty result.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("lineage cycle: {child} cannot derive from {parent}")]
    LineageCycle { child: String, parent: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TrustError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

/// Result type for trust-layer operations.
pub type TrustResult<T> = std::result::Result<T, TrustError>;
