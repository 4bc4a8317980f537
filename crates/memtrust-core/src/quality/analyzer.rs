//! Cross-memory quality analysis: inconsistency detection and reporting.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metrics::{QualityDimension, QualityMetrics, QualityStats};
use crate::memory::record::MemoryWithScore;
use crate::text::{are_contradictory, jaccard_similarity, truncate_chars};

const DUPLICATE_SIMILARITY: f64 = 0.9;
const OUTDATED_AFTER_DAYS: f64 = 180.0;
const LOW_CONFIDENCE: f64 = 0.4;
const EXCERPT_CHARS: usize = 50;
const TOP_ISSUES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InconsistencyKind {
    Contradiction,
    Duplicate,
    Outdated,
    LowConfidence,
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inconsistency {
    pub kind: InconsistencyKind,
    pub memory_id: String,
    /// Second memory for pairwise findings.
    pub other_memory_id: Option<String>,
    pub description: String,
    /// In `[0, 1]`.
    pub severity: f64,
    pub detected_at: DateTime<Utc>,
}

impl Inconsistency {
    /// Whether the finding references `id`.
    pub fn involves(&self, id: &str) -> bool {
        self.memory_id == id || self.other_memory_id.as_deref() == Some(id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub generated_at: DateTime<Utc>,
    pub stats: QualityStats,
    /// Average of each dimension over the score table.
    pub dimension_scores: BTreeMap<QualityDimension, f64>,
    pub inconsistencies: Vec<Inconsistency>,
    pub inconsistency_counts: BTreeMap<InconsistencyKind, usize>,
    /// Most frequent issue strings, formatted `"<issue> (<n> times)"`.
    pub top_issues: Vec<String>,
    pub recommendations: Vec<String>,
}

impl QualityReport {
    pub fn count(&self, kind: InconsistencyKind) -> usize {
        self.inconsistency_counts.get(&kind).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementSuggestion {
    pub memory_id: String,
    pub current_score: f64,
    pub suggestions: Vec<String>,
}

pub struct QualityAnalyzer {
    metrics: Arc<QualityMetrics>,
}

impl QualityAnalyzer {
    pub fn new(metrics: Arc<QualityMetrics>) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &Arc<QualityMetrics> {
        &self.metrics
    }

    /// Run every detector over `memories`.
    pub fn detect_inconsistencies(&self, memories: &[MemoryWithScore]) -> Vec<Inconsistency> {
        self.detect_inconsistencies_at(memories, Utc::now())
    }

    pub fn detect_inconsistencies_at(
        &self,
        memories: &[MemoryWithScore],
        now: DateTime<Utc>,
    ) -> Vec<Inconsistency> {
        let mut found = Vec::new();
        found.extend(detect_contradictions(memories, now));
        found.extend(detect_duplicates(memories, now));
        found.extend(detect_outdated(memories, now));
        found.extend(detect_low_confidence(memories, now));
        found
    }

    pub fn generate_report(&self, memories: &[MemoryWithScore]) -> QualityReport {
        let now = Utc::now();
        let all = self.metrics.get_all();

        let mut dimension_scores = BTreeMap::new();
        if !all.is_empty() {
            for dim in QualityDimension::ALL {
                let total: f64 = all.iter().map(|q| q.score.dimension(dim)).sum();
                dimension_scores.insert(dim, total / all.len() as f64);
            }
        }

        let inconsistencies = self.detect_inconsistencies_at(memories, now);
        let mut inconsistency_counts = BTreeMap::new();
        for inc in &inconsistencies {
            *inconsistency_counts.entry(inc.kind).or_insert(0) += 1;
        }

        let mut issue_counts: HashMap<&str, usize> = HashMap::new();
        for q in &all {
            for issue in &q.issues {
                *issue_counts.entry(issue.as_str()).or_insert(0) += 1;
            }
        }
        let mut ranked: Vec<(&str, usize)> = issue_counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        let top_issues = ranked
            .into_iter()
            .take(TOP_ISSUES)
            .map(|(issue, n)| format!("{issue} ({n} times)"))
            .collect();

        let mut report = QualityReport {
            generated_at: now,
            stats: self.metrics.stats(),
            dimension_scores,
            inconsistencies,
            inconsistency_counts,
            top_issues,
            recommendations: Vec::new(),
        };
        report.recommendations = recommendations(&report);
        report
    }

    /// Suggestions for every entry below the minimum quality threshold.
    pub fn suggest_improvements(&self) -> Vec<ImprovementSuggestion> {
        self.metrics
            .get_low_quality()
            .into_iter()
            .map(|q| {
                let mut suggestions = Vec::new();
                if q.score.accuracy < 0.5 {
                    suggestions.push("add corroboration from a reliable source".to_string());
                }
                if q.score.completeness < 0.5 {
                    suggestions.push("add more detail and metadata".to_string());
                }
                if q.score.consistency < 0.5 {
                    suggestions.push("find supporting evidence to improve consistency".to_string());
                }
                if q.score.timeliness < 0.5 {
                    suggestions
                        .push("check whether the memory is still valid; update or archive it".to_string());
                }
                ImprovementSuggestion {
                    memory_id: q.memory_id,
                    current_score: q.score.overall,
                    suggestions,
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Detectors
// ---------------------------------------------------------------------------

fn detect_contradictions(memories: &[MemoryWithScore], now: DateTime<Utc>) -> Vec<Inconsistency> {
    let mut found = Vec::new();
    for (i, a) in memories.iter().enumerate() {
        for b in &memories[i + 1..] {
            if !are_contradictory(&a.text, &b.text) {
                continue;
            }
            found.push(Inconsistency {
                kind: InconsistencyKind::Contradiction,
                memory_id: a.id.clone(),
                other_memory_id: Some(b.id.clone()),
                description: format!(
                    "memories contradict: '{}' vs '{}'",
                    truncate_chars(&a.text, EXCERPT_CHARS),
                    truncate_chars(&b.text, EXCERPT_CHARS)
                ),
                severity: contradiction_severity(a, b),
                detected_at: now,
            });
        }
    }
    found
}

/// `0.5 + 0.3 * avg confidence (when both carry provenance) + 0.2 * jaccard`, capped at 1.
fn contradiction_severity(a: &MemoryWithScore, b: &MemoryWithScore) -> f64 {
    let mut severity = 0.5;
    if let (Some(ca), Some(cb)) = (a.confidence(), b.confidence()) {
        severity += (ca + cb) / 2.0 * 0.3;
    }
    severity += jaccard_similarity(&a.text, &b.text) * 0.2;
    severity.clamp(0.0, 1.0)
}

fn detect_duplicates(memories: &[MemoryWithScore], now: DateTime<Utc>) -> Vec<Inconsistency> {
    let mut found = Vec::new();
    for (i, a) in memories.iter().enumerate() {
        for b in &memories[i + 1..] {
            let similarity = jaccard_similarity(&a.text, &b.text);
            if similarity <= DUPLICATE_SIMILARITY {
                continue;
            }
            found.push(Inconsistency {
                kind: InconsistencyKind::Duplicate,
                memory_id: a.id.clone(),
                other_memory_id: Some(b.id.clone()),
                description: format!(
                    "near-duplicate memories (similarity {similarity:.2}): '{}'",
                    truncate_chars(&a.text, EXCERPT_CHARS)
                ),
                severity: similarity,
                detected_at: now,
            });
        }
    }
    found
}

fn detect_outdated(memories: &[MemoryWithScore], now: DateTime<Utc>) -> Vec<Inconsistency> {
    memories
        .iter()
        .filter_map(|m| {
            let p = m.provenance.as_ref()?;
            let age_days = (now - p.created_at).num_seconds() as f64 / 86_400.0;
            if age_days <= OUTDATED_AFTER_DAYS {
                return None;
            }
            Some(Inconsistency {
                kind: InconsistencyKind::Outdated,
                memory_id: m.id.clone(),
                other_memory_id: None,
                description: format!(
                    "memory may be outdated ({} days old): '{}'",
                    age_days as i64,
                    truncate_chars(&m.text, EXCERPT_CHARS)
                ),
                severity: (age_days / 365.0).min(1.0),
                detected_at: now,
            })
        })
        .collect()
}

fn detect_low_confidence(memories: &[MemoryWithScore], now: DateTime<Utc>) -> Vec<Inconsistency> {
    memories
        .iter()
        .filter_map(|m| {
            let confidence = m.confidence()?;
            if confidence >= LOW_CONFIDENCE {
                return None;
            }
            Some(Inconsistency {
                kind: InconsistencyKind::LowConfidence,
                memory_id: m.id.clone(),
                other_memory_id: None,
                description: format!(
                    "memory confidence too low ({confidence:.2}): '{}'",
                    truncate_chars(&m.text, EXCERPT_CHARS)
                ),
                severity: (1.0 - confidence).clamp(0.0, 1.0),
                detected_at: now,
            })
        })
        .collect()
}

fn recommendations(report: &QualityReport) -> Vec<String> {
    let mut recs = Vec::new();

    if report.stats.average_quality < 0.5 {
        recs.push("overall quality is low; verify the reliability of data sources".to_string());
    }

    let dimension_advice = [
        (
            QualityDimension::Accuracy,
            "accuracy is low; corroborate memories with additional sources",
        ),
        (
            QualityDimension::Completeness,
            "completeness is low; record more detail and metadata",
        ),
        (
            QualityDimension::Consistency,
            "consistency is low; run consolidation to resolve conflicts",
        ),
        (
            QualityDimension::Timeliness,
            "timeliness is declining; refresh or archive old memories",
        ),
    ];
    for (dim, advice) in dimension_advice {
        if report.dimension_scores.get(&dim).is_some_and(|s| *s < 0.6) {
            recs.push(advice.to_string());
        }
    }

    let contradictions = report.count(InconsistencyKind::Contradiction);
    if contradictions > 0 {
        recs.push(format!(
            "found {contradictions} contradictions; review and resolve them manually"
        ));
    }
    let duplicates = report.count(InconsistencyKind::Duplicate);
    if duplicates > 3 {
        recs.push(format!("found {duplicates} duplicates; run deduplication"));
    }

    if report.stats.low_quality_count > report.stats.total_memories / 4 {
        recs.push("more than 25% of memories are low quality; clean up or improve them".to_string());
    }
    recs
}
