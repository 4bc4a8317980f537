//! Memtrust Core Library
//!
//! Layer 1 of memtrust: the trust model for agent long-term memory.
//!
//! - [`memory::provenance`]: where a memory came from and how often it was confirmed
//! - [`memory::confidence`]: time-decayed confidence computed on read
//! - [`memory::lineage`]: parent/child derivation graph with cascade and revocation
//! - [`memory::semantic`]: trust-aware indexing and search over a [`SemanticStore`]
//! - [`quality`]: per-memory quality scores, inconsistency reports and cleanup
//!
//! Storage and embedding are collaborators supplied by the host through the
//! `memtrust-state` traits.

pub mod cancel;
pub mod config;
pub mod error;
pub mod memory;
pub mod obs;
pub mod quality;
pub mod telemetry;
pub mod text;

pub use cancel::{ensure_active, run_cancellable};
pub use config::{ConsolidationConfig, TrustConfig};
pub use error::{TrustError, TrustResult};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};

pub use memory::{
    ConfidenceCalculator, ConfidenceConfig, ConfidenceTier, LineageConfig, LineageManager,
    LineageMetadata, LineageStats, MemoryWithScore, NamespaceScope, Provenance, PruneReport,
    RegenerationPlan, RevocationReport, SemanticMemory, SemanticMemoryConfig, SourceType,
};
pub use quality::{
    ImprovementSuggestion, Inconsistency, InconsistencyKind, MemoryQuality, QualityAnalyzer,
    QualityDimension, QualityMetrics, QualityMetricsConfig, QualityReport, QualityScore,
    QualityStats,
};

pub use memtrust_state::{Document, Embedder, Hit, Metadata, SemanticStore, StorageError};
pub use tokio_util::sync::CancellationToken;
