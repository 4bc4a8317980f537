//! Configuration for the trust layer.
//!
//! Every component config implements `Default` with the stock tuning and
//! deserializes with `#[serde(default)]`, so a host can load a partial TOML or
//! JSON document. Durations serialize as whole seconds.
//! [`TrustConfig::from_env`] overlays `MEMTRUST_*` environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TrustError, TrustResult};
use crate::memory::confidence::ConfidenceConfig;
use crate::memory::lineage::LineageConfig;
use crate::memory::semantic::SemanticMemoryConfig;
use crate::quality::metrics::QualityMetricsConfig;
use crate::telemetry::{LogFormat, TelemetryConfig};

pub const ENV_DECAY_HALF_LIFE_DAYS: &str = "MEMTRUST_DECAY_HALF_LIFE_DAYS";
pub const ENV_PRUNE_THRESHOLD: &str = "MEMTRUST_PRUNE_THRESHOLD";
pub const ENV_SIMILARITY_THRESHOLD: &str = "MEMTRUST_SIMILARITY_THRESHOLD";
pub const ENV_PRESERVE_ORIGINAL: &str = "MEMTRUST_PRESERVE_ORIGINAL";
pub const ENV_AUTO_CONSOLIDATE_INTERVAL_SECS: &str = "MEMTRUST_AUTO_CONSOLIDATE_INTERVAL_SECS";
pub const ENV_QUALITY_AUTO_CLEANUP: &str = "MEMTRUST_QUALITY_AUTO_CLEANUP";
pub const ENV_LOG_FORMAT: &str = "MEMTRUST_LOG_FORMAT";
pub const ENV_LOG_FILTER: &str = "MEMTRUST_LOG_FILTER";

const SECS_PER_DAY: u64 = 24 * 3600;

/// Serde adapter storing a [`Duration`] as whole seconds.
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Settings for the consolidation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Similarity at or above which memories count as redundant.
    pub similarity_threshold: f64,
    /// Similarity at or above which neighbours join a candidate group.
    pub conflict_threshold: f64,
    /// Skip discovery when fewer records than this are listed.
    pub min_memory_count: usize,
    /// Records listed per run.
    pub batch_size: usize,
    /// Neighbours fetched per seed record during discovery.
    pub neighbours_per_memory: usize,
    /// Namespace scanned by the engine.
    pub namespace: String,
    #[serde(with = "duration_secs")]
    pub auto_consolidate_interval: Duration,
    /// Soft-mark sources instead of deleting them.
    pub preserve_original: bool,
    /// Model name passed to the completion provider.
    pub model: String,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            conflict_threshold: 0.75,
            min_memory_count: 10,
            batch_size: 50,
            neighbours_per_memory: 10,
            namespace: String::new(),
            auto_consolidate_interval: Duration::from_secs(24 * 3600),
            preserve_original: true,
            model: "gpt-4".to_string(),
        }
    }
}

impl ConsolidationConfig {
    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_conflict_threshold(mut self, threshold: f64) -> Self {
        self.conflict_threshold = threshold;
        self
    }

    pub fn with_min_memory_count(mut self, count: usize) -> Self {
        self.min_memory_count = count;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_auto_consolidate_interval(mut self, interval: Duration) -> Self {
        self.auto_consolidate_interval = interval;
        self
    }

    pub fn with_preserve_original(mut self, preserve: bool) -> Self {
        self.preserve_original = preserve;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Largest group discovery can form: the neighbour query counts the
    /// seed itself.
    pub fn max_group_size(&self) -> usize {
        self.neighbours_per_memory
    }

    /// Reject settings under which discovery can never form a group.
    pub fn validate(&self) -> TrustResult<()> {
        if self.batch_size == 0 {
            return Err(TrustError::invalid("consolidation.batch_size must be at least 1"));
        }
        if self.neighbours_per_memory < 2 {
            return Err(TrustError::invalid(format!(
                "consolidation.neighbours_per_memory must be at least 2, got {}",
                self.neighbours_per_memory
            )));
        }
        Ok(())
    }

    /// Check that groups of `group_size` members are reachable.
    pub fn validate_group_size(&self, group_size: usize) -> TrustResult<()> {
        if group_size > self.max_group_size() {
            return Err(TrustError::invalid(format!(
                "group size {group_size} exceeds consolidation.neighbours_per_memory {}",
                self.max_group_size()
            )));
        }
        Ok(())
    }
}

/// Aggregate configuration for every trust-layer component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    pub confidence: ConfidenceConfig,
    pub lineage: LineageConfig,
    pub consolidation: ConsolidationConfig,
    pub quality: QualityMetricsConfig,
    pub semantic: SemanticMemoryConfig,
    pub telemetry: TelemetryConfig,
}

impl TrustConfig {
    /// Defaults overlaid with `MEMTRUST_*` environment variables.
    pub fn from_env() -> TrustResult<Self> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup` (an environment-like key/value source),
    /// then validate.
    pub fn overlay<F>(mut self, lookup: F) -> TrustResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(days) = parse::<u64, _>(&lookup, ENV_DECAY_HALF_LIFE_DAYS)? {
            let secs = days.checked_mul(SECS_PER_DAY).ok_or_else(|| {
                TrustError::invalid(format!("{ENV_DECAY_HALF_LIFE_DAYS}: {days} days is too large"))
            })?;
            self.confidence.decay_half_life = Duration::from_secs(secs);
        }
        if let Some(v) = parse::<f64, _>(&lookup, ENV_PRUNE_THRESHOLD)? {
            self.confidence.min_confidence = v;
        }
        if let Some(v) = parse::<f64, _>(&lookup, ENV_SIMILARITY_THRESHOLD)? {
            self.consolidation.similarity_threshold = v;
        }
        if let Some(v) = parse_bool(&lookup, ENV_PRESERVE_ORIGINAL)? {
            self.consolidation.preserve_original = v;
        }
        if let Some(secs) = parse::<u64, _>(&lookup, ENV_AUTO_CONSOLIDATE_INTERVAL_SECS)? {
            self.consolidation.auto_consolidate_interval = Duration::from_secs(secs);
        }
        if let Some(v) = parse_bool(&lookup, ENV_QUALITY_AUTO_CLEANUP)? {
            self.quality.enable_auto_cleanup = v;
        }
        if let Some(format) = parse::<LogFormat, _>(&lookup, ENV_LOG_FORMAT)? {
            self.telemetry.format = format;
        }
        if let Some(filter) = lookup(ENV_LOG_FILTER) {
            self.telemetry.filter = filter;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject thresholds outside `[0, 1]` and negative weights.
    pub fn validate(&self) -> TrustResult<()> {
        let unit = [
            ("confidence.min_confidence", self.confidence.min_confidence),
            ("confidence.recency_weight", self.confidence.recency_weight),
            (
                "consolidation.similarity_threshold",
                self.consolidation.similarity_threshold,
            ),
            (
                "consolidation.conflict_threshold",
                self.consolidation.conflict_threshold,
            ),
            (
                "quality.min_quality_threshold",
                self.quality.min_quality_threshold,
            ),
            ("quality.warning_threshold", self.quality.warning_threshold),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(TrustError::invalid(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }

        let weights = [
            self.quality.accuracy_weight,
            self.quality.completeness_weight,
            self.quality.consistency_weight,
            self.quality.timeliness_weight,
            self.quality.relevance_weight,
        ];
        if weights.iter().any(|w| *w < 0.0 || w.is_nan()) {
            return Err(TrustError::invalid("quality weights must be non-negative"));
        }

        self.consolidation.validate()?;
        self.telemetry.configured_filter()?;
        Ok(())
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> TrustResult<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| TrustError::invalid(format!("{key}: cannot parse {raw:?}"))),
    }
}

fn parse_bool<F>(lookup: &F, key: &str) -> TrustResult<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(TrustError::invalid(format!("{key}: expected a boolean, got {raw:?}"))),
        },
    }
}
