//! Memory quality scoring, cross-memory analysis and table cleanup.

pub mod analyzer;
pub mod cleanup;
pub mod metrics;

pub use analyzer::{
    ImprovementSuggestion, Inconsistency, InconsistencyKind, QualityAnalyzer, QualityReport,
};
pub use cleanup::CleanupTask;
pub use metrics::{
    filter_by_quality, rank_by_quality, MemoryQuality, QualityDimension, QualityMetrics,
    QualityMetricsConfig, QualityScore, QualityStats, HIGH_QUALITY_THRESHOLD,
};
