//! Per-memory quality scoring.
//!
//! Each evaluation scores five dimensions, combines them with configured
//! weights and stores the result in a score table keyed by memory id,
//! replacing any earlier entry. The table is independent of the semantic
//! store: cleaning it up never deletes records.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::cleanup::CleanupTask;
use crate::config::duration_secs;
use crate::memory::record::MemoryWithScore;
use crate::obs;

/// Overall score at or above which a memory counts as high quality.
pub const HIGH_QUALITY_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityDimension {
    Accuracy,
    Completeness,
    Consistency,
    Timeliness,
    Relevance,
}

impl QualityDimension {
    pub const ALL: [QualityDimension; 5] = [
        Self::Accuracy,
        Self::Completeness,
        Self::Consistency,
        Self::Timeliness,
        Self::Relevance,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityMetricsConfig {
    pub accuracy_weight: f64,
    pub completeness_weight: f64,
    pub consistency_weight: f64,
    pub timeliness_weight: f64,
    pub relevance_weight: f64,

    /// Age past which timeliness drops to zero.
    #[serde(with = "duration_secs")]
    pub max_age: Duration,
    /// Exponential timeliness decay per day.
    pub timeliness_decay: f64,

    /// Overall score below which a memory is low quality.
    pub min_quality_threshold: f64,
    /// Overall score below which a memory is no longer medium quality.
    pub warning_threshold: f64,

    /// Spawn the background cleanup task from [`QualityMetrics::start_auto_cleanup`].
    pub enable_auto_cleanup: bool,
    #[serde(with = "duration_secs")]
    pub auto_cleanup_interval: Duration,
}

impl Default for QualityMetricsConfig {
    fn default() -> Self {
        Self {
            accuracy_weight: 0.30,
            completeness_weight: 0.20,
            consistency_weight: 0.20,
            timeliness_weight: 0.15,
            relevance_weight: 0.15,
            max_age: Duration::from_secs(90 * 24 * 3600),
            timeliness_decay: 0.01,
            min_quality_threshold: 0.3,
            warning_threshold: 0.5,
            enable_auto_cleanup: false,
            auto_cleanup_interval: Duration::from_secs(24 * 3600),
        }
    }
}

impl QualityMetricsConfig {
    pub fn with_auto_cleanup(mut self, interval: Duration) -> Self {
        self.enable_auto_cleanup = true;
        self.auto_cleanup_interval = interval;
        self
    }

    pub fn with_thresholds(mut self, min_quality: f64, warning: f64) -> Self {
        self.min_quality_threshold = min_quality;
        self.warning_threshold = warning;
        self
    }
}

/// Multi-dimensional score, every field in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub accuracy: f64,
    pub completeness: f64,
    pub consistency: f64,
    pub timeliness: f64,
    pub relevance: f64,
    pub overall: f64,
    pub calculated_at: DateTime<Utc>,
    /// Who produced the score, e.g. `"automatic"`.
    pub source: String,
}

impl QualityScore {
    pub fn dimension(&self, dim: QualityDimension) -> f64 {
        match dim {
            QualityDimension::Accuracy => self.accuracy,
            QualityDimension::Completeness => self.completeness,
            QualityDimension::Consistency => self.consistency,
            QualityDimension::Timeliness => self.timeliness,
            QualityDimension::Relevance => self.relevance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryQuality {
    pub memory_id: String,
    pub score: QualityScore,
    pub issues: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityStats {
    pub total_memories: usize,
    pub total_evaluations: u64,
    pub average_quality: f64,
    pub high_quality_count: usize,
    pub medium_quality_count: usize,
    pub low_quality_count: usize,
    pub memories_with_issues: usize,
}

#[derive(Debug, Default)]
struct ScoreTable {
    qualities: HashMap<String, MemoryQuality>,
    total_evaluations: u64,
}

impl ScoreTable {
    fn average(&self) -> f64 {
        if self.qualities.is_empty() {
            return 0.0;
        }
        let total: f64 = self.qualities.values().map(|q| q.score.overall).sum();
        total / self.qualities.len() as f64
    }
}

/// Quality score table.
#[derive(Debug, Default)]
pub struct QualityMetrics {
    config: QualityMetricsConfig,
    table: RwLock<ScoreTable>,
}

impl QualityMetrics {
    pub fn new(config: QualityMetricsConfig) -> Self {
        Self {
            config,
            table: RwLock::new(ScoreTable::default()),
        }
    }

    pub fn config(&self) -> &QualityMetricsConfig {
        &self.config
    }

    /// Score `memory` and store the result under its id.
    pub fn evaluate(&self, memory: &MemoryWithScore) -> MemoryQuality {
        self.evaluate_at(memory, Utc::now())
    }

    pub fn evaluate_at(&self, memory: &MemoryWithScore, now: DateTime<Utc>) -> MemoryQuality {
        let mut score = QualityScore {
            accuracy: unit(memory.confidence().unwrap_or(0.5)),
            completeness: unit(self.completeness(memory)),
            consistency: unit(self.consistency(memory)),
            timeliness: unit(self.timeliness(memory, now)),
            relevance: unit(memory.score),
            overall: 0.0,
            calculated_at: now,
            source: "automatic".to_string(),
        };
        score.overall = self.overall(&score);

        let quality = MemoryQuality {
            memory_id: memory.id.clone(),
            issues: self.detect_issues(&score),
            score,
            updated_at: now,
        };

        let mut table = self.table.write();
        table
            .qualities
            .insert(memory.id.clone(), quality.clone());
        table.total_evaluations += 1;
        quality
    }

    fn completeness(&self, memory: &MemoryWithScore) -> f64 {
        if memory.text.is_empty() {
            return 0.0;
        }
        // sigmoid centred on 200 characters
        let length = memory.text.chars().count() as f64;
        let mut score = 1.0 / (1.0 + (-0.01 * (length - 200.0)).exp());
        if !memory.metadata.is_empty() {
            score = (score + 0.1).min(1.0);
        }
        score
    }

    fn consistency(&self, memory: &MemoryWithScore) -> f64 {
        let Some(p) = &memory.provenance else {
            return 0.5;
        };
        if p.corroboration_count == 0 {
            return 0.3;
        }
        let count = f64::from(p.corroboration_count);
        (0.3 + 0.7 * ((count + 1.0).log10() / 6f64.log10())).min(1.0)
    }

    fn timeliness(&self, memory: &MemoryWithScore, now: DateTime<Utc>) -> f64 {
        let Some(p) = &memory.provenance else {
            return 0.5;
        };
        let age_secs = ((now - p.created_at).num_seconds()).max(0) as f64;
        if age_secs > self.config.max_age.as_secs_f64() {
            return 0.0;
        }
        let days = age_secs / 86_400.0;
        (-self.config.timeliness_decay * days).exp().clamp(0.0, 1.0)
    }

    fn overall(&self, s: &QualityScore) -> f64 {
        let c = &self.config;
        let weighted = s.accuracy * c.accuracy_weight
            + s.completeness * c.completeness_weight
            + s.consistency * c.consistency_weight
            + s.timeliness * c.timeliness_weight
            + s.relevance * c.relevance_weight;
        unit(weighted)
    }

    fn detect_issues(&self, s: &QualityScore) -> Vec<String> {
        let mut issues = Vec::new();
        if s.accuracy < 0.5 {
            issues.push("low accuracy: insufficient confidence".to_string());
        }
        if s.completeness < 0.3 {
            issues.push("low completeness: content too short or missing metadata".to_string());
        }
        if s.consistency < 0.4 {
            issues.push("low consistency: lacks corroboration".to_string());
        }
        if s.timeliness < 0.3 {
            issues.push("low timeliness: memory is stale".to_string());
        }
        if s.relevance < 0.5 {
            issues.push("low relevance: weak match to the query".to_string());
        }
        if s.overall < self.config.min_quality_threshold {
            issues.push(format!(
                "overall quality too low: {:.2} < {:.2}",
                s.overall, self.config.min_quality_threshold
            ));
        }
        issues
    }

    // -----------------------------------------------------------------------
    // Table access
    // -----------------------------------------------------------------------

    pub fn get(&self, memory_id: &str) -> Option<MemoryQuality> {
        self.table.read().qualities.get(memory_id).cloned()
    }

    /// All entries, sorted by memory id.
    pub fn get_all(&self) -> Vec<MemoryQuality> {
        let mut all: Vec<MemoryQuality> = self.table.read().qualities.values().cloned().collect();
        all.sort_by(|a, b| a.memory_id.cmp(&b.memory_id));
        all
    }

    /// Entries below the minimum quality threshold, sorted by memory id.
    pub fn get_low_quality(&self) -> Vec<MemoryQuality> {
        let mut low: Vec<MemoryQuality> = self
            .table
            .read()
            .qualities
            .values()
            .filter(|q| q.score.overall < self.config.min_quality_threshold)
            .cloned()
            .collect();
        low.sort_by(|a, b| a.memory_id.cmp(&b.memory_id));
        low
    }

    /// Copy of the table, for [`rank_by_quality`] and [`filter_by_quality`].
    pub fn snapshot(&self) -> HashMap<String, MemoryQuality> {
        self.table.read().qualities.clone()
    }

    pub fn remove(&self, memory_id: &str) -> Option<MemoryQuality> {
        self.table.write().qualities.remove(memory_id)
    }

    pub fn clear(&self) {
        self.table.write().qualities.clear();
    }

    pub fn len(&self) -> usize {
        self.table.read().qualities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().qualities.is_empty()
    }

    pub fn stats(&self) -> QualityStats {
        let table = self.table.read();
        let mut stats = QualityStats {
            total_memories: table.qualities.len(),
            total_evaluations: table.total_evaluations,
            average_quality: table.average(),
            ..Default::default()
        };
        for q in table.qualities.values() {
            if q.score.overall >= HIGH_QUALITY_THRESHOLD {
                stats.high_quality_count += 1;
            } else if q.score.overall >= self.config.warning_threshold {
                stats.medium_quality_count += 1;
            } else {
                stats.low_quality_count += 1;
            }
            if !q.issues.is_empty() {
                stats.memories_with_issues += 1;
            }
        }
        stats
    }

    /// Drop table entries below the minimum threshold. Returns removed ids.
    pub fn cleanup_low_quality(&self) -> Vec<String> {
        let mut table = self.table.write();
        let threshold = self.config.min_quality_threshold;
        let mut removed: Vec<String> = table
            .qualities
            .iter()
            .filter(|(_, q)| q.score.overall < threshold)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &removed {
            table.qualities.remove(id);
        }
        removed.sort();
        obs::emit_quality_cleanup(removed.len(), table.qualities.len());
        removed
    }

    /// Spawn the periodic cleanup task when the config enables it.
    pub fn start_auto_cleanup(self: &Arc<Self>, cancel: CancellationToken) -> Option<CleanupTask> {
        if !self.config.enable_auto_cleanup {
            return None;
        }
        Some(CleanupTask::start(
            Arc::clone(self),
            self.config.auto_cleanup_interval,
            cancel,
        ))
    }
}

/// Clamp into `[0, 1]`; NaN and infinities score zero.
fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Ranking helpers
// ---------------------------------------------------------------------------

fn blended(memory: &MemoryWithScore, qualities: &HashMap<String, MemoryQuality>) -> f64 {
    match qualities.get(&memory.id) {
        Some(q) => q.score.overall * 0.7 + memory.score * 0.3,
        None => memory.score,
    }
}

/// Sort by `0.7 * quality + 0.3 * score` descending (raw score without an
/// entry). Ties keep input order.
pub fn rank_by_quality(
    memories: &[MemoryWithScore],
    qualities: &HashMap<String, MemoryQuality>,
) -> Vec<MemoryWithScore> {
    let mut ranked: Vec<(f64, &MemoryWithScore)> =
        memories.iter().map(|m| (blended(m, qualities), m)).collect();
    ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    ranked.into_iter().map(|(_, m)| m.clone()).collect()
}

/// Keep memories whose stored quality reaches `min_quality`. Memories
/// without an entry are kept.
pub fn filter_by_quality(
    memories: &[MemoryWithScore],
    qualities: &HashMap<String, MemoryQuality>,
    min_quality: f64,
) -> Vec<MemoryWithScore> {
    memories
        .iter()
        .filter(|m| {
            qualities
                .get(&m.id)
                .map_or(true, |q| q.score.overall >= min_quality)
        })
        .cloned()
        .collect()
}
