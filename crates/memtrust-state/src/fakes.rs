//! In-memory fakes for storage traits (testing only)
//!
//! Provides `InMemorySemanticStore` and `HashingEmbedder` that satisfy the
//! trait contracts without any external dependencies.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// InMemorySemanticStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StoreState {
    docs: HashMap<String, Document>,
    /// namespace -> ids in insertion order
    index: HashMap<String, Vec<String>>,
}

impl StoreState {
    fn unlink(&mut self, id: &str, namespace: &str) {
        let ns = namespace_or_default(namespace);
        if let Some(ids) = self.index.get_mut(ns) {
            ids.retain(|existing| existing != id);
            if ids.is_empty() {
                self.index.remove(ns);
            }
        }
    }
}

/// In-memory vector store with brute-force cosine search.
///
/// Ids registered through [`InMemorySemanticStore::fail_on_delete`] make
/// `delete` return an error, which lets tests exercise partial-failure paths.
#[derive(Debug, Default)]
pub struct InMemorySemanticStore {
    state: RwLock<StoreState>,
    failing_deletes: RwLock<HashSet<String>>,
}

impl InMemorySemanticStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `delete` touching `id` fail.
    pub fn fail_on_delete(&self, id: impl Into<String>) {
        self.failing_deletes.write().insert(id.into());
    }

    /// Number of stored documents across all namespaces.
    pub fn len(&self) -> usize {
        self.state.read().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().docs.is_empty()
    }

    /// Whether a document with this id is stored.
    pub fn contains(&self, id: &str) -> bool {
        self.state.read().docs.contains_key(id)
    }
}

fn matches_filter(metadata: &Metadata, filter: Option<&Metadata>) -> bool {
    match filter {
        None => true,
        Some(filter) => filter
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected)),
    }
}

#[async_trait]
impl SemanticStore for InMemorySemanticStore {
    async fn upsert(&self, docs: Vec<Document>) -> StorageResult<()> {
        if let Some(doc) = docs.iter().find(|d| d.id.is_empty()) {
            return Err(StorageError::InvalidDocument {
                id: doc.id.clone(),
                reason: "id must not be empty".to_string(),
            });
        }

        debug!(count = docs.len(), "fake store upsert");
        let mut state = self.state.write();
        for doc in docs {
            if let Some(previous) = state.docs.get(&doc.id) {
                let previous_ns = previous.namespace.clone();
                state.unlink(&doc.id, &previous_ns);
            }
            state
                .index
                .entry(namespace_or_default(&doc.namespace).to_string())
                .or_default()
                .push(doc.id.clone());
            state.docs.insert(doc.id.clone(), doc);
        }
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> StorageResult<()> {
        {
            let failing = self.failing_deletes.read();
            if let Some(id) = ids.iter().find(|id| failing.contains(*id)) {
                return Err(StorageError::Operation(format!("delete rejected for {id}")));
            }
        }

        let mut state = self.state.write();
        for id in ids {
            if let Some(doc) = state.docs.remove(id) {
                state.unlink(id, &doc.namespace);
            }
        }
        Ok(())
    }

    async fn query(&self, query: StoreQuery) -> StorageResult<Vec<Hit>> {
        let state = self.state.read();
        let Some(ids) = state.index.get(namespace_or_default(&query.namespace)) else {
            return Ok(Vec::new());
        };

        let top_k = if query.top_k == 0 { 5 } else { query.top_k };

        let mut hits: Vec<Hit> = ids
            .iter()
            .filter_map(|id| state.docs.get(id))
            .filter(|doc| !doc.embedding.is_empty())
            .filter(|doc| matches_filter(&doc.metadata, query.filter.as_ref()))
            .filter_map(|doc| {
                let score = cosine_similarity(&query.vector, &doc.embedding);
                if score.is_nan() {
                    return None;
                }
                Some(Hit {
                    id: doc.id.clone(),
                    score,
                    text: doc.text.clone(),
                    metadata: doc.metadata.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn get(&self, id: &str) -> StorageResult<Option<Document>> {
        Ok(self.state.read().docs.get(id).cloned())
    }

    async fn list(&self, namespace: &str, limit: usize) -> StorageResult<Vec<Document>> {
        let state = self.state.read();
        let Some(ids) = state.index.get(namespace_or_default(namespace)) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| state.docs.get(id))
            .take(limit)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// HashingEmbedder
// ---------------------------------------------------------------------------

/// Deterministic bag-of-words embedder.
///
/// Each lowercase whitespace token is hashed into one of `dimensions`
/// buckets, so texts sharing words get a high cosine similarity and
/// identical texts score exactly 1.0.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text.split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> StorageResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_moves_namespace() {
        let store = InMemorySemanticStore::new();
        store
            .upsert(vec![Document::new("a", "x", vec![1.0]).with_namespace("one")])
            .await
            .unwrap();
        store
            .upsert(vec![Document::new("a", "x", vec![1.0]).with_namespace("two")])
            .await
            .unwrap();

        assert!(store.list("one", 10).await.unwrap().is_empty());
        assert_eq!(store.list("two", 10).await.unwrap().len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(32);
        let texts = vec!["The sky is blue".to_string(), "the SKY is blue".to_string()];
        let vectors = embedder.embed(&texts).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], vectors[1]);
        assert_eq!(vectors[0].len(), 32);
    }

    #[tokio::test]
    async fn test_fail_on_delete() {
        let store = InMemorySemanticStore::new();
        store
            .upsert(vec![Document::new("a", "x", vec![1.0])])
            .await
            .unwrap();
        store.fail_on_delete("a");
        assert!(store.delete(&["a".to_string()]).await.is_err());
        assert!(store.contains("a"));
    }
}
