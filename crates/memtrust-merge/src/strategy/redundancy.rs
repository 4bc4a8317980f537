use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use memtrust_core::{MemoryWithScore, Metadata, Provenance, SourceType, TrustResult};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{
    collect_sources, complete_trimmed, memory_ids, require_members, strategy_metadata,
    ConsolidatedMemory, ConsolidationReason, ConsolidationStrategy, DEFAULT_MODEL,
};
use crate::prompts;
use crate::provider::{CompletionOptions, CompletionProvider};

const NAME: &str = "redundancy";
/// Confidence multiplier added per extra source.
const BOOST_PER_SOURCE: f64 = 0.05;

/// Merges near-identical memories into one.
#[derive(Debug, Clone)]
pub struct RedundancyStrategy {
    similarity_threshold: f64,
    model: String,
}

impl RedundancyStrategy {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            similarity_threshold,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions::new(&self.model, 0.3, 500)
    }

    /// Union of string `tags`, source count and strategy name.
    fn merge_metadata(memories: &[MemoryWithScore]) -> Metadata {
        let tags: BTreeSet<&str> = memories
            .iter()
            .filter_map(|m| m.metadata.get("tags").and_then(Value::as_array))
            .flatten()
            .filter_map(Value::as_str)
            .collect();

        let mut meta = strategy_metadata(NAME);
        if !tags.is_empty() {
            meta.insert(
                "tags".to_string(),
                Value::Array(tags.into_iter().map(|t| Value::String(t.to_string())).collect()),
            );
        }
        meta.insert("source_count".to_string(), Value::from(memories.len()));
        meta
    }

    /// Agent-sourced provenance seeded from the first member's confidence,
    /// boosted 5% per extra member and capped at 1.
    fn merge_provenance(memories: &[MemoryWithScore]) -> Provenance {
        let base = memories
            .first()
            .and_then(MemoryWithScore::confidence)
            .unwrap_or_else(|| SourceType::Agent.base_confidence(false));
        let extra = memories.len().saturating_sub(1) as f64;

        let mut merged = Provenance::new(SourceType::Agent, "")
            .with_tags(["consolidated", "redundancy"]);
        merged.confidence = (base * (1.0 + extra * BOOST_PER_SOURCE)).min(1.0);
        merged.sources = collect_sources(memories);
        merged.corroboration_count = u32::try_from(memories.len()).unwrap_or(u32::MAX);
        merged
    }
}

#[async_trait]
impl ConsolidationStrategy for RedundancyStrategy {
    fn name(&self) -> &'static str {
        NAME
    }

    /// At least two members, every one at or above the similarity threshold.
    fn should_consolidate(&self, memories: &[MemoryWithScore]) -> Option<ConsolidationReason> {
        if memories.len() < 2 {
            return None;
        }
        memories
            .iter()
            .all(|m| m.score >= self.similarity_threshold)
            .then_some(ConsolidationReason::Redundant)
    }

    async fn consolidate(
        &self,
        memories: &[MemoryWithScore],
        provider: &dyn CompletionProvider,
        cancel: &CancellationToken,
    ) -> TrustResult<ConsolidatedMemory> {
        require_members(memories)?;
        let prompt = prompts::redundancy(memories);
        let text = complete_trimmed(provider, &prompt, &self.options(), cancel).await?;

        Ok(ConsolidatedMemory {
            text,
            metadata: Self::merge_metadata(memories),
            provenance: Some(Self::merge_provenance(memories)),
            source_memories: memory_ids(memories),
            reason: ConsolidationReason::Redundant,
            consolidated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tagged(id: &str, score: f64, tags: serde_json::Value) -> MemoryWithScore {
        let mut meta = Metadata::new();
        meta.insert("tags".to_string(), tags);
        MemoryWithScore::new(id, "text", score).with_metadata(meta)
    }

    #[test]
    fn test_should_consolidate_requires_all_above_threshold() {
        let s = RedundancyStrategy::new(0.85);
        let one = [MemoryWithScore::new("a", "x", 1.0)];
        assert_eq!(s.should_consolidate(&one), None);

        let close = [
            MemoryWithScore::new("a", "x", 1.0),
            MemoryWithScore::new("b", "x", 0.9),
        ];
        assert_eq!(
            s.should_consolidate(&close),
            Some(ConsolidationReason::Redundant)
        );

        let loose = [
            MemoryWithScore::new("a", "x", 1.0),
            MemoryWithScore::new("b", "x", 0.9),
            MemoryWithScore::new("c", "x", 0.8),
        ];
        assert_eq!(s.should_consolidate(&loose), None);
    }

    #[test]
    fn test_metadata_merges_tags() {
        let memories = [
            tagged("a", 1.0, json!(["work", "travel"])),
            tagged("b", 0.9, json!(["travel", "visa"])),
            MemoryWithScore::new("c", "no tags", 0.9),
        ];
        let meta = RedundancyStrategy::merge_metadata(&memories);
        assert_eq!(meta["tags"], json!(["travel", "visa", "work"]));
        assert_eq!(meta["source_count"], json!(3));
        assert_eq!(meta["consolidation_strategy"], json!("redundancy"));
    }

    #[test]
    fn test_provenance_boost_is_capped() {
        let p = Provenance::new(SourceType::Bootstrapped, "seed");
        let memories: Vec<_> = (0..5)
            .map(|i| MemoryWithScore::new(format!("m{i}"), "x", 1.0).with_provenance(p.clone()))
            .collect();
        let merged = RedundancyStrategy::merge_provenance(&memories);
        // 0.95 * 1.20 caps at 1.0
        assert!((merged.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(merged.source_type, SourceType::Agent);
        assert_eq!(merged.corroboration_count, 5);
        assert_eq!(merged.sources.len(), 6);
        assert!(merged.tags.contains("consolidated"));
    }
}
