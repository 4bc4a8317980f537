//! Structured observability hooks for memory lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via the `ConsolidationSpan` RAII guard or
//!   [`consolidation_span`] for async code
//! - Emission functions for consolidation, revocation, pruning and quality cleanup
//!
//! Every event carries an `event = "..."` field so log pipelines can filter on it.

use tracing::{info, warn};

/// RAII guard that enters a consolidation-run span until dropped.
///
/// ```ignore
/// let _span = ConsolidationSpan::enter("run-1234", "redundancy");
/// // every event below carries run_id and strategy
/// ```
pub struct ConsolidationSpan {
    _span: tracing::span::EnteredSpan,
}

impl ConsolidationSpan {
    pub fn enter(run_id: &str, strategy: &str) -> Self {
        Self {
            _span: consolidation_span(run_id, strategy).entered(),
        }
    }
}

/// Span for a consolidation run, for futures that hold it across `.await`
/// via `tracing::Instrument`.
pub fn consolidation_span(run_id: &str, strategy: &str) -> tracing::Span {
    tracing::info_span!("memtrust.consolidation", run_id = %run_id, strategy = %strategy)
}

pub fn emit_consolidation_started(run_id: &str, strategy: &str, candidate_groups: usize) {
    info!(
        event = "consolidation.started",
        run_id = %run_id,
        strategy = %strategy,
        candidate_groups = candidate_groups,
    );
}

pub fn emit_consolidation_finished(
    run_id: &str,
    duration_ms: u64,
    merged: usize,
    created: usize,
    errors: usize,
) {
    info!(
        event = "consolidation.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        merged = merged,
        created = created,
        errors = errors,
        success = errors == 0,
    );
}

/// Warning: one candidate group failed; the run continues.
pub fn emit_group_failed(run_id: &str, stage: &str, error: &dyn std::fmt::Display) {
    warn!(event = "consolidation.group_failed", run_id = %run_id, stage = %stage, error = %error);
}

pub fn emit_source_revoked(source_id: &str, deleted: usize, failed: usize) {
    info!(
        event = "lineage.source_revoked",
        source_id = %source_id,
        deleted = deleted,
        failed = failed,
    );
}

pub fn emit_memory_pruned(memory_id: &str, confidence: f64) {
    info!(event = "memory.pruned", memory_id = %memory_id, confidence = confidence);
}

pub fn emit_quality_cleanup(removed: usize, remaining: usize) {
    info!(event = "quality.cleanup", removed = removed, remaining = remaining);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_and_events_do_not_panic() {
        let _span = ConsolidationSpan::enter("run-1", "redundancy");
        emit_consolidation_started("run-1", "redundancy", 2);
        emit_group_failed("run-1", "consolidate", &"provider down");
        emit_consolidation_finished("run-1", 12, 4, 2, 1);
    }
}
