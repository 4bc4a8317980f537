//! Storage trait definitions for memtrust
//!
//! These traits define the collaborator seams the trust model depends on:
//! - `SemanticStore`: Vector index keyed by document id (upsert/query/delete)
//! - `Embedder`: Text to vector conversion
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Opaque per-document metadata. The trust layer stores its provenance
/// envelope under the `"provenance"` key.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Namespace used when a document or query carries an empty one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Normalize an empty namespace to [`DEFAULT_NAMESPACE`].
pub fn namespace_or_default(namespace: &str) -> &str {
    if namespace.is_empty() {
        DEFAULT_NAMESPACE
    } else {
        namespace
    }
}

// ---------------------------------------------------------------------------
// SemanticStore: vector index
// ---------------------------------------------------------------------------

/// A document held by the semantic store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Globally unique id
    pub id: String,
    /// Source text
    pub text: String,
    /// Precomputed embedding (may be empty for text-only backends)
    pub embedding: Vec<f32>,
    /// Business metadata
    pub metadata: Metadata,
    /// Logical namespace, e.g. `"users/alice/projects/demo"`
    pub namespace: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            embedding,
            metadata: Metadata::new(),
            namespace: String::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

/// A similarity query against the store
#[derive(Debug, Clone, Default)]
pub struct StoreQuery {
    /// Query vector
    pub vector: Vec<f32>,
    /// Maximum number of hits
    pub top_k: usize,
    /// Namespace to search in
    pub namespace: String,
    /// Exact-match metadata filter; every key must be equal on the hit
    pub filter: Option<Metadata>,
}

impl StoreQuery {
    pub fn new(vector: Vec<f32>, top_k: usize) -> Self {
        Self {
            vector,
            top_k,
            ..Default::default()
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_filter(mut self, filter: Metadata) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// A scored query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Document id
    pub id: String,
    /// Similarity score, higher is closer
    pub score: f64,
    /// Document text
    pub text: String,
    /// Document metadata, passed through untouched
    pub metadata: Metadata,
}

/// Vector store abstraction.
///
/// Guarantees:
/// - `upsert` overwrites a document with the same id.
/// - `delete` of an unknown id is a no-op.
/// - `query` returns hits in descending score order, at most `top_k`.
/// - `get` returns `None` for an unknown id rather than an error.
#[async_trait]
pub trait SemanticStore: Send + Sync {
    /// Insert or replace documents.
    async fn upsert(&self, docs: Vec<Document>) -> StorageResult<()>;

    /// Delete documents by id.
    async fn delete(&self, ids: &[String]) -> StorageResult<()>;

    /// Nearest-neighbour query.
    async fn query(&self, query: StoreQuery) -> StorageResult<Vec<Hit>>;

    /// Fetch a single document by id.
    async fn get(&self, id: &str) -> StorageResult<Option<Document>>;

    /// List up to `limit` documents in a namespace, in insertion order.
    async fn list(&self, namespace: &str, limit: usize) -> StorageResult<Vec<Document>>;
}

// ---------------------------------------------------------------------------
// Embedder: text to vector
// ---------------------------------------------------------------------------

/// Embedding computation.
///
/// Returns exactly one vector per input text, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> StorageResult<Vec<Vec<f32>>>;
}

/// Cosine similarity of two vectors; 0.0 for empty, mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_vectors() {
        let v = vec![0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_namespace_default() {
        assert_eq!(namespace_or_default(""), DEFAULT_NAMESPACE);
        assert_eq!(namespace_or_default("users/a"), "users/a");
    }
}
