//! Semantic memory facade.
//!
//! Ties the semantic store, the embedder, the confidence calculator and the
//! lineage manager together: indexing writes the provenance envelope and
//! registers lineage; retrieval can filter and re-rank by effective
//! confidence; deletion and revocation keep store and lineage in step.

use std::sync::Arc;

use memtrust_state::{Document, Embedder, Metadata, SemanticStore, StoreQuery};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::confidence::{ConfidenceCalculator, ConfidenceConfig};
use super::lineage::{LineageConfig, LineageManager};
use super::provenance::{Provenance, SourceType};
use super::record::MemoryWithScore;
use crate::cancel::{ensure_active, run_cancellable};
use crate::error::{TrustError, TrustResult};
use crate::obs;

/// How the store namespace is derived from caller metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceScope {
    /// `users/<user_id>`
    User,
    /// `projects/<project_id>`
    Project,
    /// `[users/<user_id>/]projects/<project_id>` or `[users/<user_id>/]resources/<resource_id>`
    Resource,
    /// The default namespace.
    #[default]
    Global,
}

impl NamespaceScope {
    /// Namespace for `meta`; empty (the default namespace) when the scope's
    /// keys are missing.
    pub fn namespace_for(&self, meta: &Metadata) -> String {
        let field = |key: &str| {
            meta.get(key)
                .and_then(Value::as_str)
                .filter(|v| !v.is_empty())
        };
        match self {
            Self::User => field("user_id").map(|u| format!("users/{u}")),
            Self::Project => field("project_id").map(|p| format!("projects/{p}")),
            Self::Resource => {
                let prefix = field("user_id")
                    .map(|u| format!("users/{u}/"))
                    .unwrap_or_default();
                field("project_id")
                    .map(|p| format!("{prefix}projects/{p}"))
                    .or_else(|| field("resource_id").map(|r| format!("{prefix}resources/{r}")))
            }
            Self::Global => None,
        }
        .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticMemoryConfig {
    pub namespace_scope: NamespaceScope,
    /// Results returned when a caller passes `top_k == 0`.
    pub top_k: usize,
    /// Source type assumed when indexing metadata does not name one.
    pub default_source_type: SourceType,
    /// Upper bound on records listed by a prune pass.
    pub prune_scan_limit: usize,
}

impl Default for SemanticMemoryConfig {
    fn default() -> Self {
        Self {
            namespace_scope: NamespaceScope::Global,
            top_k: 5,
            default_source_type: SourceType::UserInput,
            prune_scan_limit: 10_000,
        }
    }
}

impl SemanticMemoryConfig {
    pub fn with_namespace_scope(mut self, scope: NamespaceScope) -> Self {
        self.namespace_scope = scope;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_default_source_type(mut self, source_type: SourceType) -> Self {
        self.default_source_type = source_type;
        self
    }
}

/// Outcome of [`SemanticMemory::prune_memories`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PruneReport {
    pub scanned: usize,
    pub pruned: Vec<String>,
    /// `(memory_id, error)` for deletions the store rejected.
    pub failed: Vec<(String, String)>,
}

/// Outcome of [`SemanticMemory::revoke_data_source`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevocationReport {
    pub source_id: String,
    pub deleted: Vec<String>,
    /// `(memory_id, error)`; failed ids stay tracked so a retry can finish them.
    pub failed: Vec<(String, String)>,
}

impl RevocationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct SemanticMemory {
    store: Arc<dyn SemanticStore>,
    embedder: Arc<dyn Embedder>,
    calculator: ConfidenceCalculator,
    lineage: Arc<LineageManager>,
    lineage_config: LineageConfig,
    config: SemanticMemoryConfig,
}

impl SemanticMemory {
    pub fn new(
        store: Arc<dyn SemanticStore>,
        embedder: Arc<dyn Embedder>,
        config: SemanticMemoryConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            calculator: ConfidenceCalculator::default(),
            lineage: Arc::new(LineageManager::new()),
            lineage_config: LineageConfig::default(),
            config,
        }
    }

    pub fn with_confidence(mut self, config: ConfidenceConfig) -> Self {
        self.calculator = ConfidenceCalculator::new(config);
        self
    }

    /// Share a lineage manager with other components.
    pub fn with_lineage(mut self, lineage: Arc<LineageManager>) -> Self {
        self.lineage = lineage;
        self
    }

    pub fn with_lineage_config(mut self, config: LineageConfig) -> Self {
        self.lineage_config = config;
        self
    }

    pub fn store(&self) -> &Arc<dyn SemanticStore> {
        &self.store
    }

    pub fn lineage(&self) -> &Arc<LineageManager> {
        &self.lineage
    }

    pub fn calculator(&self) -> &ConfidenceCalculator {
        &self.calculator
    }

    pub fn config(&self) -> &SemanticMemoryConfig {
        &self.config
    }

    pub fn namespace_for(&self, meta: &Metadata) -> String {
        self.config.namespace_scope.namespace_for(meta)
    }

    // -----------------------------------------------------------------------
    // Indexing
    // -----------------------------------------------------------------------

    /// Index `text`, deriving provenance from `source_id`, `source_type` and
    /// `is_explicit` metadata keys.
    pub async fn index(
        &self,
        id: &str,
        text: &str,
        metadata: Metadata,
        cancel: &CancellationToken,
    ) -> TrustResult<()> {
        let source_id = metadata
            .get("source_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(id)
            .to_string();
        let source_type = match metadata.get("source_type").and_then(Value::as_str) {
            Some(raw) if !raw.is_empty() => raw.parse()?,
            _ => self.config.default_source_type,
        };
        let is_explicit = metadata
            .get("is_explicit")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let provenance = if is_explicit {
            Provenance::explicit(source_type, source_id)
        } else {
            Provenance::new(source_type, source_id)
        };
        self.index_with_provenance(id, text, metadata, &provenance, &[], cancel)
            .await
    }

    /// Index `text` with an explicit provenance, derived from `derived_from`.
    pub async fn index_with_provenance(
        &self,
        id: &str,
        text: &str,
        metadata: Metadata,
        provenance: &Provenance,
        derived_from: &[String],
        cancel: &CancellationToken,
    ) -> TrustResult<()> {
        if id.is_empty() || text.is_empty() {
            return Err(TrustError::invalid("memory id and text are required"));
        }
        if self.lineage_config.enabled {
            self.lineage.check_parents(id, derived_from)?;
        }

        let embedding = self.embed_one(text, cancel).await?;

        let namespace = self.namespace_for(&metadata);
        let mut stored = metadata;
        stored.insert("text".to_string(), Value::String(text.to_string()));
        provenance.write_into(&mut stored)?;

        let doc = Document::new(id, text, embedding)
            .with_metadata(stored)
            .with_namespace(namespace);
        run_cancellable(cancel, self.store.upsert(vec![doc])).await?;

        if self.lineage_config.enabled {
            self.lineage
                .track_memory_creation(id, provenance, derived_from)?;
        }
        debug!(memory_id = %id, source_type = %provenance.source_type, "memory indexed");
        Ok(())
    }

    async fn embed_one(&self, text: &str, cancel: &CancellationToken) -> TrustResult<Vec<f32>> {
        ensure_active(cancel)?;
        let texts = [text.to_string()];
        let vectors = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TrustError::Cancelled),
            res = self.embedder.embed(&texts) => res.map_err(|e| TrustError::Embedding(e.to_string()))?,
        };
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| TrustError::Embedding("embedder returned no vectors".to_string()))
    }

    // -----------------------------------------------------------------------
    // Retrieval
    // -----------------------------------------------------------------------

    /// Nearest memories to `query` in the namespace derived from `metadata`.
    ///
    /// Non-empty `metadata` also acts as an exact-match filter. An empty query
    /// returns no results.
    pub async fn search(
        &self,
        query: &str,
        metadata: &Metadata,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> TrustResult<Vec<MemoryWithScore>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let top_k = if top_k == 0 { self.config.top_k } else { top_k };

        let vector = self.embed_one(query, cancel).await?;
        let mut store_query =
            StoreQuery::new(vector, top_k).in_namespace(self.namespace_for(metadata));
        if !metadata.is_empty() {
            store_query = store_query.with_filter(metadata.clone());
        }

        let hits = run_cancellable(cancel, self.store.query(store_query)).await?;
        Ok(hits.into_iter().map(MemoryWithScore::from).collect())
    }

    /// Search, keeping only memories whose effective confidence reaches
    /// `min_confidence`, re-scored by relevance and marked accessed.
    ///
    /// Over-fetches twice `top_k` to leave room for filtering. The access
    /// stamp lives on the returned copies; nothing is written back.
    pub async fn search_with_confidence_filter(
        &self,
        query: &str,
        metadata: &Metadata,
        top_k: usize,
        min_confidence: f64,
        cancel: &CancellationToken,
    ) -> TrustResult<Vec<MemoryWithScore>> {
        let top_k = if top_k == 0 { self.config.top_k } else { top_k };
        let hits = self.search(query, metadata, top_k * 2, cancel).await?;

        let mut filtered: Vec<MemoryWithScore> = hits
            .into_iter()
            .filter_map(|mut m| {
                let provenance = m.provenance.as_mut()?;
                let confidence = self.calculator.calculate(provenance);
                if confidence < min_confidence {
                    return None;
                }
                provenance.mark_accessed();
                m.score *= confidence;
                Some(m)
            })
            .collect();

        filtered.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        filtered.truncate(top_k);
        Ok(filtered)
    }

    /// Search restricted to memories from the given source types.
    pub async fn search_by_source_type(
        &self,
        query: &str,
        metadata: &Metadata,
        top_k: usize,
        source_types: &[SourceType],
        cancel: &CancellationToken,
    ) -> TrustResult<Vec<MemoryWithScore>> {
        let top_k = if top_k == 0 { self.config.top_k } else { top_k };
        let hits = self.search(query, metadata, top_k * 2, cancel).await?;

        let mut filtered: Vec<MemoryWithScore> = hits
            .into_iter()
            .filter(|m| {
                m.provenance
                    .as_ref()
                    .is_some_and(|p| source_types.contains(&p.source_type))
            })
            .collect();
        filtered.truncate(top_k);
        Ok(filtered)
    }

    /// Provenance of the best match for `query`.
    pub async fn get_memory_provenance(
        &self,
        query: &str,
        metadata: &Metadata,
        cancel: &CancellationToken,
    ) -> TrustResult<Provenance> {
        let hits = self.search(query, metadata, 1, cancel).await?;
        let top = hits
            .into_iter()
            .next()
            .ok_or_else(|| TrustError::not_found(format!("no memory matches {query:?}")))?;
        top.provenance
            .ok_or_else(|| TrustError::not_found(format!("memory {} has no provenance", top.id)))
    }

    // -----------------------------------------------------------------------
    // Mutation and deletion
    // -----------------------------------------------------------------------

    /// Merge `patch` into a stored record's metadata.
    pub async fn update_metadata(
        &self,
        id: &str,
        patch: Metadata,
        cancel: &CancellationToken,
    ) -> TrustResult<()> {
        let mut doc = run_cancellable(cancel, self.store.get(id))
            .await?
            .ok_or_else(|| TrustError::not_found(format!("memory {id}")))?;
        doc.metadata.extend(patch);
        run_cancellable(cancel, self.store.upsert(vec![doc])).await
    }

    /// Delete a single record, ignoring lineage.
    pub async fn delete(&self, id: &str, cancel: &CancellationToken) -> TrustResult<()> {
        run_cancellable(cancel, self.store.delete(&[id.to_string()])).await?;
        self.lineage.remove_memory(id);
        Ok(())
    }

    /// Delete `id` and, with `cascade`, everything derived from it.
    /// Returns the deleted ids.
    pub async fn delete_memory_with_lineage(
        &self,
        id: &str,
        cascade: bool,
        cancel: &CancellationToken,
    ) -> TrustResult<Vec<String>> {
        let ids = if self.lineage_config.enabled {
            self.lineage.deletion_set(id, cascade)
        } else {
            vec![id.to_string()]
        };

        run_cancellable(cancel, self.store.delete(&ids)).await?;
        for removed in &ids {
            self.lineage.remove_memory(removed);
        }
        Ok(ids)
    }

    /// Delete every record sourced from `source_id` plus its derivations.
    ///
    /// Continues past individual store failures and reports them.
    pub async fn revoke_data_source(
        &self,
        source_id: &str,
        cancel: &CancellationToken,
    ) -> TrustResult<RevocationReport> {
        let mut report = RevocationReport {
            source_id: source_id.to_string(),
            ..Default::default()
        };

        for id in self.lineage.revocation_set(source_id) {
            ensure_active(cancel)?;
            match run_cancellable(cancel, self.store.delete(std::slice::from_ref(&id))).await {
                Ok(()) => {
                    self.lineage.remove_memory(&id);
                    report.deleted.push(id);
                }
                Err(TrustError::Cancelled) => return Err(TrustError::Cancelled),
                Err(e) => {
                    warn!(memory_id = %id, source_id = %source_id, error = %e, "revocation delete failed");
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        obs::emit_source_revoked(source_id, report.deleted.len(), report.failed.len());
        Ok(report)
    }

    /// Delete every record in `namespace` whose confidence has decayed below
    /// the prune threshold. Records without provenance are left alone.
    pub async fn prune_memories(
        &self,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> TrustResult<PruneReport> {
        let docs = run_cancellable(
            cancel,
            self.store.list(namespace, self.config.prune_scan_limit),
        )
        .await?;

        let mut report = PruneReport {
            scanned: docs.len(),
            ..Default::default()
        };

        for doc in docs {
            let provenance = match Provenance::from_metadata(&doc.metadata) {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(e) => {
                    warn!(memory_id = %doc.id, error = %e, "skipping record with malformed provenance");
                    continue;
                }
            };
            if !self.calculator.should_prune(&provenance) {
                continue;
            }

            ensure_active(cancel)?;
            match run_cancellable(cancel, self.store.delete(std::slice::from_ref(&doc.id))).await {
                Ok(()) => {
                    self.lineage.remove_memory(&doc.id);
                    obs::emit_memory_pruned(&doc.id, self.calculator.calculate(&provenance));
                    report.pruned.push(doc.id);
                }
                Err(TrustError::Cancelled) => return Err(TrustError::Cancelled),
                Err(e) => report.failed.push((doc.id, e.to_string())),
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(pairs: &[(&str, Value)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_namespace_scopes() {
        let m = meta(&[
            ("user_id", json!("alice")),
            ("project_id", json!("demo")),
            ("resource_id", json!("doc-1")),
        ]);
        assert_eq!(NamespaceScope::User.namespace_for(&m), "users/alice");
        assert_eq!(NamespaceScope::Project.namespace_for(&m), "projects/demo");
        assert_eq!(
            NamespaceScope::Resource.namespace_for(&m),
            "users/alice/projects/demo"
        );
        assert_eq!(NamespaceScope::Global.namespace_for(&m), "");

        let r = meta(&[("resource_id", json!("doc-1"))]);
        assert_eq!(NamespaceScope::Resource.namespace_for(&r), "resources/doc-1");
        assert_eq!(NamespaceScope::User.namespace_for(&r), "");
    }
}
