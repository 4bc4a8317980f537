use async_trait::async_trait;
use chrono::Utc;
use memtrust_core::text::has_conflict_marker;
use memtrust_core::{ConfidenceCalculator, MemoryWithScore, Provenance, SourceType, TrustResult};
use tokio_util::sync::CancellationToken;

use super::{
    complete_trimmed, memory_ids, require_members, strategy_metadata, ConsolidatedMemory,
    ConsolidationReason, ConsolidationStrategy, DEFAULT_MODEL,
};
use crate::prompts;
use crate::provider::{CompletionOptions, CompletionProvider};

const NAME: &str = "conflict-resolution";
const RESOLVED_TAG: &str = "conflict-resolved";

/// Resolves groups where at least one member corrects or negates another.
#[derive(Debug, Clone)]
pub struct ConflictResolutionStrategy {
    similarity_threshold: f64,
    calculator: ConfidenceCalculator,
    model: String,
}

impl ConflictResolutionStrategy {
    pub fn new(similarity_threshold: f64, calculator: ConfidenceCalculator) -> Self {
        Self {
            similarity_threshold,
            calculator,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Neighbour similarity the engine used to form the group.
    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions::new(&self.model, 0.2, 600)
    }

    /// Provenance of the member with the highest current confidence, tagged
    /// as resolved. Falls back to a fresh agent provenance.
    fn select_best_provenance(&self, memories: &[MemoryWithScore]) -> Provenance {
        let mut best: Option<(&Provenance, f64)> = None;
        for p in memories.iter().filter_map(|m| m.provenance.as_ref()) {
            let confidence = self.calculator.calculate(p);
            let current = best.map_or(0.0, |(_, c)| c);
            if confidence > current {
                best = Some((p, confidence));
            }
        }

        match best {
            Some((p, _)) => {
                let mut resolved = p.clone();
                resolved.tags.insert(RESOLVED_TAG.to_string());
                resolved.updated_at = Utc::now();
                resolved
            }
            None => Provenance::new(SourceType::Agent, NAME),
        }
    }
}

#[async_trait]
impl ConsolidationStrategy for ConflictResolutionStrategy {
    fn name(&self) -> &'static str {
        NAME
    }

    /// At least two members, any of them carrying a correction or negation
    /// keyword.
    fn should_consolidate(&self, memories: &[MemoryWithScore]) -> Option<ConsolidationReason> {
        if memories.len() < 2 {
            return None;
        }
        memories
            .iter()
            .any(|m| has_conflict_marker(&m.text))
            .then_some(ConsolidationReason::Conflict)
    }

    async fn consolidate(
        &self,
        memories: &[MemoryWithScore],
        provider: &dyn CompletionProvider,
        cancel: &CancellationToken,
    ) -> TrustResult<ConsolidatedMemory> {
        require_members(memories)?;
        let prompt = prompts::conflict_resolution(memories);
        let text = complete_trimmed(provider, &prompt, &self.options(), cancel).await?;

        Ok(ConsolidatedMemory {
            text,
            metadata: strategy_metadata(NAME),
            provenance: Some(self.select_best_provenance(memories)),
            source_memories: memory_ids(memories),
            reason: ConsolidationReason::Conflict,
            consolidated_at: Utc::now(),
        })
    }
}
