//! Consolidation engine.
//!
//! A run discovers candidate groups of similar memories, asks the strategy
//! whether each group qualifies, merges qualifying groups through the
//! completion provider, indexes the merged record with lineage back to its
//! sources and then soft-marks or deletes the sources. Groups are processed
//! one after another; a failing group is recorded and the run moves on.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use memtrust_core::obs;
use memtrust_core::{
    ensure_active, run_cancellable, ConfidenceCalculator, ConsolidationConfig, Hit,
    MemoryWithScore, Metadata, Provenance, SemanticMemory, SourceType, TrustError, TrustResult,
};
use memtrust_state::{SemanticStore, StoreQuery};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};
use uuid::Uuid;

use crate::provider::CompletionProvider;
use crate::strategy::{
    ConsolidatedMemory, ConsolidationReason, ConsolidationStrategy, StrategyKind,
};

/// Metadata keys written on soft-marked sources.
pub const CONSOLIDATED_KEY: &str = "consolidated";
pub const CONSOLIDATED_TO_KEY: &str = "consolidated_to";
pub const CONSOLIDATED_AT_KEY: &str = "consolidated_at";

/// Keys copied from the first source so the merged record lands in the same
/// namespace.
const SCOPE_KEYS: &[&str] = &["user_id", "project_id", "resource_id"];

/// A candidate group and, once merged, its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryGroup {
    pub memories: Vec<MemoryWithScore>,
    pub consolidated_id: String,
    pub reason: ConsolidationReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationResult {
    pub success: bool,
    /// Set when the run did nothing, with the reason.
    pub message: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub strategy: String,
    pub memory_groups: Vec<MemoryGroup>,
    /// Source memories folded into merged records.
    pub merged_count: usize,
    /// Merged records created.
    pub new_memory_count: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationStats {
    pub last_consolidation: DateTime<Utc>,
    pub consolidation_count: u64,
    pub merged_memories_count: u64,
}

pub struct ConsolidationEngine {
    memory: Arc<SemanticMemory>,
    strategy: Box<dyn ConsolidationStrategy>,
    provider: Arc<dyn CompletionProvider>,
    config: ConsolidationConfig,
    stats: RwLock<ConsolidationStats>,
}

impl ConsolidationEngine {
    pub fn new(
        memory: Arc<SemanticMemory>,
        strategy: Box<dyn ConsolidationStrategy>,
        provider: Arc<dyn CompletionProvider>,
        config: ConsolidationConfig,
    ) -> Self {
        Self {
            memory,
            strategy,
            provider,
            config,
            stats: RwLock::new(ConsolidationStats {
                last_consolidation: Utc::now(),
                consolidation_count: 0,
                merged_memories_count: 0,
            }),
        }
    }

    /// Build the strategy from `kind`, sharing the memory's confidence settings.
    /// Fails when `kind` cannot form groups under `config`.
    pub fn with_kind(
        memory: Arc<SemanticMemory>,
        kind: StrategyKind,
        provider: Arc<dyn CompletionProvider>,
        config: ConsolidationConfig,
    ) -> TrustResult<Self> {
        kind.validate(&config)?;
        let calculator: ConfidenceCalculator = memory.calculator().clone();
        let strategy = kind.build(&config, calculator);
        Ok(Self::new(memory, strategy, provider, config))
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn get_stats(&self) -> ConsolidationStats {
        self.stats.read().clone()
    }

    /// Whether the configured interval has elapsed since the last run.
    /// Polled by the caller; the engine never schedules itself.
    pub fn should_auto_consolidate(&self) -> bool {
        self.should_auto_consolidate_at(Utc::now())
    }

    pub fn should_auto_consolidate_at(&self, now: DateTime<Utc>) -> bool {
        let elapsed = now - self.stats.read().last_consolidation;
        elapsed.to_std().is_ok_and(|e| e >= self.config.auto_consolidate_interval)
    }

    // -----------------------------------------------------------------------
    // Run
    // -----------------------------------------------------------------------

    /// Run one consolidation pass.
    ///
    /// Discovery failures abort the run. Per-group failures land in
    /// `errors`. Cancellation stops the run with [`TrustError::Cancelled`];
    /// groups already merged stay merged.
    pub async fn consolidate(&self, cancel: &CancellationToken) -> TrustResult<ConsolidationResult> {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::consolidation_span(&run_id, self.strategy.name());
        self.run(&run_id, cancel).instrument(span).await
    }

    async fn run(&self, run_id: &str, cancel: &CancellationToken) -> TrustResult<ConsolidationResult> {
        let strategy = self.strategy.name();
        let started = Instant::now();

        let mut result = ConsolidationResult {
            success: false,
            message: None,
            start_time: Utc::now(),
            end_time: Utc::now(),
            duration_ms: 0,
            strategy: strategy.to_string(),
            memory_groups: Vec::new(),
            merged_count: 0,
            new_memory_count: 0,
            errors: Vec::new(),
        };

        let groups = match self.find_candidate_groups(cancel).await? {
            Discovery::Groups(groups) => groups,
            Discovery::Skipped(message) => {
                result.message = Some(message);
                Vec::new()
            }
        };
        obs::emit_consolidation_started(run_id, strategy, groups.len());

        for group in groups {
            ensure_active(cancel)?;
            let Some(reason) = self.strategy.should_consolidate(&group) else {
                continue;
            };

            let consolidated = match self
                .strategy
                .consolidate(&group, self.provider.as_ref(), cancel)
                .await
            {
                Ok(c) => c,
                Err(TrustError::Cancelled) => return Err(TrustError::Cancelled),
                Err(e) => {
                    obs::emit_group_failed(run_id, "consolidate", &e);
                    result.errors.push(format!("failed to consolidate group: {e}"));
                    continue;
                }
            };

            let new_id = match self.save_consolidated_memory(&group, consolidated, cancel).await {
                Ok(id) => id,
                Err(TrustError::Cancelled) => return Err(TrustError::Cancelled),
                Err(e) => {
                    obs::emit_group_failed(run_id, "save", &e);
                    result
                        .errors
                        .push(format!("failed to save consolidated memory: {e}"));
                    continue;
                }
            };

            match self.handle_source_memories(&group, &new_id, cancel).await {
                Ok(()) => {}
                Err(TrustError::Cancelled) => return Err(TrustError::Cancelled),
                Err(e) => {
                    obs::emit_group_failed(run_id, "handle_sources", &e);
                    result
                        .errors
                        .push(format!("failed to handle source memories: {e}"));
                    continue;
                }
            }

            debug!(consolidated_id = %new_id, sources = group.len(), reason = %reason, "group consolidated");
            result.merged_count += group.len();
            result.new_memory_count += 1;
            result.memory_groups.push(MemoryGroup {
                memories: group,
                consolidated_id: new_id,
                reason,
            });
        }

        {
            let mut stats = self.stats.write();
            stats.last_consolidation = Utc::now();
            stats.consolidation_count += 1;
            stats.merged_memories_count += result.merged_count as u64;
        }

        result.end_time = Utc::now();
        result.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        result.success = result.errors.is_empty();
        obs::emit_consolidation_finished(
            run_id,
            result.duration_ms,
            result.merged_count,
            result.new_memory_count,
            result.errors.len(),
        );
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Discovery
    // -----------------------------------------------------------------------

    /// Greedy grouping: each unassigned record seeds a group with its
    /// neighbours at or above the conflict threshold. Every record joins at
    /// most one group; groups of one are dropped.
    async fn find_candidate_groups(&self, cancel: &CancellationToken) -> TrustResult<Discovery> {
        let store = self.memory.store();
        let namespace = self.config.namespace.as_str();

        let listed = run_cancellable(cancel, store.list(namespace, self.config.batch_size)).await?;
        let live: Vec<_> = listed
            .into_iter()
            .filter(|d| !is_consolidated(&d.metadata))
            .collect();

        if live.len() < self.config.min_memory_count {
            let message = format!(
                "memory count {} below threshold {}",
                live.len(),
                self.config.min_memory_count
            );
            info!(namespace = %namespace, "{message}; skipping consolidation");
            return Ok(Discovery::Skipped(message));
        }

        let mut assigned: HashSet<String> = HashSet::new();
        let mut groups = Vec::new();

        for seed in live {
            if assigned.contains(&seed.id) || seed.embedding.is_empty() {
                continue;
            }
            let query = StoreQuery::new(seed.embedding.clone(), self.config.neighbours_per_memory)
                .in_namespace(namespace);
            let hits = run_cancellable(cancel, store.query(query)).await?;

            let neighbours: Vec<MemoryWithScore> = hits
                .into_iter()
                .filter(|h| {
                    h.id != seed.id
                        && !assigned.contains(&h.id)
                        && h.score >= self.config.conflict_threshold
                        && !is_consolidated(&h.metadata)
                })
                .map(MemoryWithScore::from)
                .collect();
            if neighbours.is_empty() {
                continue;
            }

            let seed_memory = MemoryWithScore::from(Hit {
                id: seed.id,
                score: 1.0,
                text: seed.text,
                metadata: seed.metadata,
            });
            let mut group = Vec::with_capacity(neighbours.len() + 1);
            group.push(seed_memory);
            group.extend(neighbours);
            for m in &group {
                assigned.insert(m.id.clone());
            }
            groups.push(group);
        }

        debug!(groups = groups.len(), "candidate discovery complete");
        Ok(Discovery::Groups(groups))
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    async fn save_consolidated_memory(
        &self,
        group: &[MemoryWithScore],
        consolidated: ConsolidatedMemory,
        cancel: &CancellationToken,
    ) -> TrustResult<String> {
        let id = format!("consolidated-{}", Uuid::new_v4());
        let provenance = consolidated
            .provenance
            .unwrap_or_else(|| Provenance::new(SourceType::Agent, "consolidation-engine"));

        let mut metadata = consolidated.metadata;
        if let Some(first) = group.first() {
            for key in SCOPE_KEYS {
                if let Some(v) = first.metadata.get(*key) {
                    metadata.entry(key.to_string()).or_insert_with(|| v.clone());
                }
            }
        }

        self.memory
            .index_with_provenance(
                &id,
                &consolidated.text,
                metadata,
                &provenance,
                &consolidated.source_memories,
                cancel,
            )
            .await?;
        Ok(id)
    }

    async fn handle_source_memories(
        &self,
        group: &[MemoryWithScore],
        consolidated_id: &str,
        cancel: &CancellationToken,
    ) -> TrustResult<()> {
        for m in group {
            if self.config.preserve_original {
                self.memory
                    .update_metadata(&m.id, soft_mark(consolidated_id), cancel)
                    .await?;
            } else {
                self.memory.delete(&m.id, cancel).await?;
            }
        }
        Ok(())
    }
}

enum Discovery {
    Groups(Vec<Vec<MemoryWithScore>>),
    Skipped(String),
}

fn is_consolidated(metadata: &Metadata) -> bool {
    metadata
        .get(CONSOLIDATED_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn soft_mark(consolidated_id: &str) -> Metadata {
    let mut patch = Metadata::new();
    patch.insert(CONSOLIDATED_KEY.to_string(), Value::Bool(true));
    patch.insert(
        CONSOLIDATED_TO_KEY.to_string(),
        Value::String(consolidated_id.to_string()),
    );
    patch.insert(
        CONSOLIDATED_AT_KEY.to_string(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    patch
}
