//! Effective-confidence computation.
//!
//! Confidence is computed on read and never written back: the stored field
//! on [`Provenance`] only changes at creation and on corroboration.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::provenance::{Provenance, SourceType};
use crate::config::duration_secs;

/// Window over which a recent access still boosts confidence.
const RECENCY_WINDOW_SECS: f64 = 30.0 * 24.0 * 3600.0;

/// Scale applied to the recency weight; caps the boost at 10%.
const RECENCY_SCALE: f64 = 0.1;

/// Explicit records tolerate a lower confidence before pruning.
const EXPLICIT_PRUNE_FACTOR: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// Duration after which unboosted confidence halves. Zero disables decay.
    #[serde(with = "duration_secs")]
    pub decay_half_life: Duration,
    /// Prune threshold.
    pub min_confidence: f64,
    pub corroboration_boost: f64,
    pub max_corroboration_boost: f64,
    /// Weight of a recent access, in `[0, 1]`.
    pub recency_weight: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            decay_half_life: Duration::from_secs(30 * 24 * 3600),
            min_confidence: 0.20,
            corroboration_boost: 0.05,
            max_corroboration_boost: 0.20,
            recency_weight: 0.3,
        }
    }
}

impl ConfidenceConfig {
    pub fn with_decay_half_life(mut self, half_life: Duration) -> Self {
        self.decay_half_life = half_life;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_recency_weight(mut self, weight: f64) -> Self {
        self.recency_weight = weight;
        self
    }
}

/// Named confidence bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    VeryHigh,
    High,
    Medium,
    Low,
    VeryLow,
}

impl ConfidenceTier {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence > 0.9 {
            Self::VeryHigh
        } else if confidence > 0.7 {
            Self::High
        } else if confidence > 0.5 {
            Self::Medium
        } else if confidence > 0.3 {
            Self::Low
        } else {
            Self::VeryLow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryHigh => "very_high",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::VeryLow => "very_low",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfidenceCalculator {
    config: ConfidenceConfig,
}

impl ConfidenceCalculator {
    pub fn new(config: ConfidenceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConfidenceConfig {
        &self.config
    }

    /// Current effective confidence, in `[0, 1]`.
    pub fn calculate(&self, p: &Provenance) -> f64 {
        self.calculate_at(p, Utc::now())
    }

    /// Effective confidence as of `now`.
    pub fn calculate_at(&self, p: &Provenance, now: DateTime<Utc>) -> f64 {
        let decayed = p.confidence * self.decay_factor(p, now);
        let total = decayed + self.corroboration_boost(p) + self.recency_boost(p, now);
        total.clamp(0.0, 1.0)
    }

    fn decay_factor(&self, p: &Provenance, now: DateTime<Utc>) -> f64 {
        if self.config.decay_half_life.is_zero() || p.source_type == SourceType::Bootstrapped {
            return 1.0;
        }
        let freshness = seconds(now - p.updated_at);
        if freshness <= 0.0 {
            return 1.0;
        }
        0.5f64.powf(freshness / self.config.decay_half_life.as_secs_f64())
    }

    fn corroboration_boost(&self, p: &Provenance) -> f64 {
        if p.corroboration_count == 0 {
            return 0.0;
        }
        (self.config.corroboration_boost * f64::from(p.corroboration_count))
            .min(self.config.max_corroboration_boost)
    }

    fn recency_boost(&self, p: &Provenance, now: DateTime<Utc>) -> f64 {
        let Some(accessed) = p.last_accessed_at else {
            return 0.0;
        };
        if self.config.recency_weight == 0.0 {
            return 0.0;
        }
        let since = seconds(now - accessed).max(0.0);
        if since > RECENCY_WINDOW_SECS {
            return 0.0;
        }
        self.config.recency_weight * (1.0 - since / RECENCY_WINDOW_SECS) * RECENCY_SCALE
    }

    /// Whether the record has decayed below the prune threshold.
    ///
    /// Bootstrapped records never prune; explicit ones use 70% of the threshold.
    pub fn should_prune(&self, p: &Provenance) -> bool {
        self.should_prune_at(p, Utc::now())
    }

    pub fn should_prune_at(&self, p: &Provenance, now: DateTime<Utc>) -> bool {
        if p.source_type == SourceType::Bootstrapped {
            return false;
        }
        let mut threshold = self.config.min_confidence;
        if p.is_explicit() {
            threshold *= EXPLICIT_PRUNE_FACTOR;
        }
        self.calculate_at(p, now) < threshold
    }

    /// Semantic similarity weighted by effective confidence.
    /// Without provenance the similarity passes through unchanged.
    pub fn score_by_relevance(&self, semantic_score: f64, p: Option<&Provenance>) -> f64 {
        match p {
            Some(p) => semantic_score * self.calculate(p),
            None => semantic_score,
        }
    }

    pub fn tier(&self, p: &Provenance) -> ConfidenceTier {
        ConfidenceTier::from_confidence(self.calculate(p))
    }
}

fn seconds(d: chrono::Duration) -> f64 {
    d.num_milliseconds() as f64 / 1000.0
}
