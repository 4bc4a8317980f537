//! Consolidation strategies.
//!
//! A strategy decides whether a candidate group should be merged and, if so,
//! turns it into one [`ConsolidatedMemory`] with a single completion call.
//! The set of strategies is closed; [`StrategyKind`] selects one at
//! construction time.

mod conflict;
mod redundancy;
mod summarization;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memtrust_core::{
    run_cancellable, ConfidenceCalculator, ConsolidationConfig, MemoryWithScore, Metadata,
    Provenance, TrustError, TrustResult,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::provider::{CompletionError, CompletionOptions, CompletionProvider};

pub use conflict::ConflictResolutionStrategy;
pub use redundancy::RedundancyStrategy;
pub use summarization::SummarizationStrategy;

/// Model used when a strategy is built without a config.
pub const DEFAULT_MODEL: &str = "gpt-4";

/// Why a group was merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationReason {
    Redundant,
    Conflict,
    Summary,
}

impl ConsolidationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Redundant => "redundant",
            Self::Conflict => "conflict",
            Self::Summary => "summary",
        }
    }
}

impl std::fmt::Display for ConsolidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a strategy, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedMemory {
    pub text: String,
    pub metadata: Metadata,
    /// `None` lets the engine fall back to an agent-sourced provenance.
    pub provenance: Option<Provenance>,
    /// Ids of the merged memories, in group order.
    pub source_memories: Vec<String>,
    pub reason: ConsolidationReason,
    pub consolidated_at: DateTime<Utc>,
}

/// Guarantees:
/// - `should_consolidate` is pure and never calls the provider
/// - `consolidate` issues at most one completion call and fails only the
///   group it was given
#[async_trait]
pub trait ConsolidationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Some(reason)` when the group qualifies.
    fn should_consolidate(&self, memories: &[MemoryWithScore]) -> Option<ConsolidationReason>;

    async fn consolidate(
        &self,
        memories: &[MemoryWithScore],
        provider: &dyn CompletionProvider,
        cancel: &CancellationToken,
    ) -> TrustResult<ConsolidatedMemory>;
}

/// Closed set of strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StrategyKind {
    Redundancy,
    ConflictResolution,
    Summarization { max_per_group: usize },
}

impl StrategyKind {
    /// Reject a kind whose groups discovery under `config` can never form.
    pub fn validate(self, config: &ConsolidationConfig) -> TrustResult<()> {
        config.validate()?;
        match self {
            Self::Summarization { max_per_group } if max_per_group < 2 => Err(
                TrustError::invalid(format!("max_per_group must be at least 2, got {max_per_group}")),
            ),
            Self::Summarization { max_per_group } => config.validate_group_size(max_per_group),
            Self::Redundancy | Self::ConflictResolution => Ok(()),
        }
    }

    /// Build the strategy, taking thresholds and model from `config`.
    pub fn build(
        self,
        config: &ConsolidationConfig,
        calculator: ConfidenceCalculator,
    ) -> Box<dyn ConsolidationStrategy> {
        match self {
            Self::Redundancy => Box::new(
                RedundancyStrategy::new(config.similarity_threshold).with_model(&config.model),
            ),
            Self::ConflictResolution => Box::new(
                ConflictResolutionStrategy::new(config.conflict_threshold, calculator)
                    .with_model(&config.model),
            ),
            Self::Summarization { max_per_group } => Box::new(
                SummarizationStrategy::new(max_per_group).with_model(&config.model),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// One completion call, trimmed. Empty output is an error.
async fn complete_trimmed(
    provider: &dyn CompletionProvider,
    prompt: &str,
    options: &CompletionOptions,
    cancel: &CancellationToken,
) -> TrustResult<String> {
    let raw = run_cancellable(cancel, provider.complete(prompt, options)).await?;
    let text = raw.trim();
    if text.is_empty() {
        return Err(CompletionError::Empty.into());
    }
    Ok(text.to_string())
}

fn require_members(memories: &[MemoryWithScore]) -> TrustResult<()> {
    if memories.is_empty() {
        return Err(TrustError::invalid("no memories to consolidate"));
    }
    Ok(())
}

fn memory_ids(memories: &[MemoryWithScore]) -> Vec<String> {
    memories.iter().map(|m| m.id.clone()).collect()
}

/// Every provenance source followed by the memory id, deduplicated in
/// first-seen order.
fn collect_sources(memories: &[MemoryWithScore]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut sources = Vec::new();
    for m in memories {
        let upstream = m.provenance.iter().flat_map(|p| p.sources.iter());
        for s in upstream.chain(std::iter::once(&m.id)) {
            if seen.insert(s.clone()) {
                sources.push(s.clone());
            }
        }
    }
    sources
}

fn strategy_metadata(name: &str) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert(
        "consolidation_strategy".to_string(),
        Value::String(name.to_string()),
    );
    meta
}
