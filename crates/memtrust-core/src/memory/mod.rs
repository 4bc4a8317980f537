//! Trust-scored semantic memory.
//!
//! Records carry a [`Provenance`] envelope in their metadata. Confidence is
//! derived from it on read, lineage links derived records to their parents and
//! [`SemanticMemory`] ties both to a vector store.

pub mod confidence;
pub mod lineage;
pub mod provenance;
pub mod record;
pub mod semantic;

pub use confidence::{ConfidenceCalculator, ConfidenceConfig, ConfidenceTier};
pub use lineage::{
    LineageConfig, LineageGraph, LineageManager, LineageMetadata, LineageStats, RegenerationPlan,
};
pub use provenance::{Provenance, SourceType, PROVENANCE_KEY};
pub use record::MemoryWithScore;
pub use semantic::{
    NamespaceScope, PruneReport, RevocationReport, SemanticMemory, SemanticMemoryConfig,
};
