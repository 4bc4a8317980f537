use async_trait::async_trait;
use chrono::Utc;
use memtrust_core::{MemoryWithScore, Provenance, SourceType, TrustResult};
use tokio_util::sync::CancellationToken;

use super::{
    collect_sources, complete_trimmed, memory_ids, require_members, strategy_metadata,
    ConsolidatedMemory, ConsolidationReason, ConsolidationStrategy, DEFAULT_MODEL,
};
use crate::prompts;
use crate::provider::{CompletionOptions, CompletionProvider};

const NAME: &str = "summarization";

/// Condenses large groups of related memories into a summary.
#[derive(Debug, Clone)]
pub struct SummarizationStrategy {
    max_per_group: usize,
    model: String,
}

impl SummarizationStrategy {
    pub fn new(max_per_group: usize) -> Self {
        Self {
            max_per_group,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn max_per_group(&self) -> usize {
        self.max_per_group
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions::new(&self.model, 0.4, 400)
    }

    /// Average stored confidence; members without provenance count as zero.
    fn merge_provenance(memories: &[MemoryWithScore]) -> Provenance {
        let total: f64 = memories.iter().filter_map(MemoryWithScore::confidence).sum();
        let mut merged = Provenance::new(SourceType::Agent, "").with_tags(["summarized"]);
        merged.confidence = total / memories.len().max(1) as f64;
        merged.sources = collect_sources(memories);
        merged.corroboration_count = u32::try_from(memories.len()).unwrap_or(u32::MAX);
        merged
    }
}

#[async_trait]
impl ConsolidationStrategy for SummarizationStrategy {
    fn name(&self) -> &'static str {
        NAME
    }

    fn should_consolidate(&self, memories: &[MemoryWithScore]) -> Option<ConsolidationReason> {
        (!memories.is_empty() && memories.len() >= self.max_per_group)
            .then_some(ConsolidationReason::Summary)
    }

    async fn consolidate(
        &self,
        memories: &[MemoryWithScore],
        provider: &dyn CompletionProvider,
        cancel: &CancellationToken,
    ) -> TrustResult<ConsolidatedMemory> {
        require_members(memories)?;
        let prompt = prompts::summarization(memories);
        let text = complete_trimmed(provider, &prompt, &self.options(), cancel).await?;

        Ok(ConsolidatedMemory {
            text,
            metadata: strategy_metadata(NAME),
            provenance: Some(Self::merge_provenance(memories)),
            source_memories: memory_ids(memories),
            reason: ConsolidationReason::Summary,
            consolidated_at: Utc::now(),
        })
    }
}
