//! Memtrust Merge: LLM-assisted memory consolidation
//!
//! Finds groups of similar memories in a [`SemanticMemory`] store and merges
//! them through a [`CompletionProvider`] using one of three strategies:
//! redundancy merging, conflict resolution and summarization.
//!
//! ## Layer 2 - Consolidation
//!
//! Merged records keep lineage links to their sources, so revoking a source
//! also revokes what was consolidated from it.
//!
//! [`SemanticMemory`]: memtrust_core::SemanticMemory

pub mod engine;
pub mod fakes;
pub mod prompts;
pub mod provider;
pub mod strategy;

pub use engine::{
    ConsolidationEngine, ConsolidationResult, ConsolidationStats, MemoryGroup, CONSOLIDATED_AT_KEY,
    CONSOLIDATED_KEY, CONSOLIDATED_TO_KEY,
};
pub use provider::{CompletionError, CompletionOptions, CompletionProvider, CompletionResult};
pub use strategy::{
    ConflictResolutionStrategy, ConsolidatedMemory, ConsolidationReason, ConsolidationStrategy,
    RedundancyStrategy, StrategyKind, SummarizationStrategy,
};
