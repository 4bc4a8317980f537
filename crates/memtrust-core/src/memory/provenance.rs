//! Provenance records for long-term memories.
//!
//! A [`Provenance`] captures where a memory came from and how much it was
//! trusted at creation. It travels with the record inside the semantic
//! store's metadata under the [`PROVENANCE_KEY`] envelope.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use memtrust_state::Metadata;
use serde::{Deserialize, Serialize};

use crate::error::{TrustError, TrustResult};

/// Metadata key holding the provenance envelope.
pub const PROVENANCE_KEY: &str = "provenance";

/// Confidence added per corroboration.
pub const CORROBORATION_STEP: f64 = 0.05;

/// Cap on the accumulated corroboration boost.
pub const MAX_CORROBORATION_BOOST: f64 = 0.20;

/// Origin of a memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Pre-loaded trusted data. Never decays, never pruned.
    Bootstrapped,
    UserInput,
    ToolOutput,
    Agent,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bootstrapped => "bootstrapped",
            Self::UserInput => "user_input",
            Self::ToolOutput => "tool_output",
            Self::Agent => "agent",
        }
    }

    /// Initial confidence for a freshly created record.
    pub fn base_confidence(&self, is_explicit: bool) -> f64 {
        match self {
            Self::Bootstrapped => 0.95,
            Self::UserInput if is_explicit => 0.90,
            Self::UserInput => 0.70,
            Self::Agent => 0.60,
            Self::ToolOutput => 0.50,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = TrustError;

    fn from_str(s: &str) -> TrustResult<Self> {
        match s {
            "bootstrapped" => Ok(Self::Bootstrapped),
            "user_input" => Ok(Self::UserInput),
            "tool_output" => Ok(Self::ToolOutput),
            "agent" => Ok(Self::Agent),
            other => Err(TrustError::invalid(format!("unknown source type: {other}"))),
        }
    }
}

/// Origin and trust metadata of a single memory record.
///
/// Mutation goes through [`add_source`](Self::add_source),
/// [`corroborate`](Self::corroborate) and [`mark_accessed`](Self::mark_accessed).
/// The stored `confidence` is the creation-time (or last corroboration)
/// value; the effective trust is computed on read by
/// [`ConfidenceCalculator`](super::confidence::ConfidenceCalculator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_type: SourceType,
    pub confidence: f64,
    /// Deduplicated, append-only, insertion-ordered source ids.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default = "initial_version")]
    pub version: u64,
    #[serde(default)]
    is_explicit: bool,
    #[serde(default)]
    pub corroboration_count: u32,
    #[serde(
        default,
        with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_accessed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

fn initial_version() -> u64 {
    1
}

impl Provenance {
    /// Implicit record from a single source.
    pub fn new(source_type: SourceType, source_id: impl Into<String>) -> Self {
        Self::build(source_type, source_id.into(), false)
    }

    /// Record the user explicitly asked to remember.
    pub fn explicit(source_type: SourceType, source_id: impl Into<String>) -> Self {
        Self::build(source_type, source_id.into(), true)
    }

    fn build(source_type: SourceType, source_id: String, is_explicit: bool) -> Self {
        let now = Utc::now();
        let sources = if source_id.is_empty() {
            Vec::new()
        } else {
            vec![source_id]
        };
        Self {
            source_type,
            confidence: source_type.base_confidence(is_explicit),
            sources,
            created_at: now,
            updated_at: now,
            version: 1,
            is_explicit,
            corroboration_count: 0,
            last_accessed_at: None,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn is_explicit(&self) -> bool {
        self.is_explicit
    }

    /// Append a source id. Returns `false` (and changes nothing) if already present.
    pub fn add_source(&mut self, source_id: impl Into<String>) -> bool {
        let source_id = source_id.into();
        if self.sources.contains(&source_id) {
            return false;
        }
        self.sources.push(source_id);
        self.updated_at = Utc::now();
        self.version += 1;
        true
    }

    /// Record an independent confirmation.
    ///
    /// Confidence is reset to `base + min(count * 0.05, 0.20)`, which also
    /// discards any decay accumulated since the last update. Version moves
    /// by exactly one per call.
    pub fn corroborate(&mut self, source_id: impl Into<String>) {
        let added = self.add_source(source_id);
        self.corroboration_count += 1;

        let boost = (CORROBORATION_STEP * f64::from(self.corroboration_count))
            .min(MAX_CORROBORATION_BOOST);
        self.confidence = (self.source_type.base_confidence(self.is_explicit) + boost).min(1.0);
        self.updated_at = Utc::now();
        if !added {
            self.version += 1;
        }
    }

    /// Stamp the last access time. Does not count as an update.
    pub fn mark_accessed(&mut self) {
        self.last_accessed_at = Some(Utc::now());
    }

    /// Time since creation.
    pub fn age(&self) -> Duration {
        Utc::now() - self.created_at
    }

    /// Time since the last update.
    pub fn freshness(&self) -> Duration {
        Utc::now() - self.updated_at
    }

    // -----------------------------------------------------------------------
    // Metadata envelope
    // -----------------------------------------------------------------------

    /// Metadata map holding only the provenance envelope.
    pub fn to_metadata(&self) -> TrustResult<Metadata> {
        let mut meta = Metadata::new();
        self.write_into(&mut meta)?;
        Ok(meta)
    }

    /// Insert (or replace) the provenance envelope in `meta`.
    pub fn write_into(&self, meta: &mut Metadata) -> TrustResult<()> {
        meta.insert(PROVENANCE_KEY.to_string(), serde_json::to_value(self)?);
        Ok(())
    }

    /// Read the envelope back.
    ///
    /// Returns `Ok(None)` when `meta` carries no envelope and an error when
    /// the envelope is present but malformed.
    pub fn from_metadata(meta: &Metadata) -> TrustResult<Option<Self>> {
        match meta.get(PROVENANCE_KEY) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }
}

/// RFC 3339 timestamps with second precision and a `Z` suffix.
mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            dt: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match dt {
                Some(dt) => super::serialize(dt, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw = Option::<String>::deserialize(d)?;
            raw.map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_base_confidence_table() {
        assert_eq!(Provenance::new(SourceType::Bootstrapped, "s").confidence, 0.95);
        assert_eq!(Provenance::new(SourceType::UserInput, "s").confidence, 0.70);
        assert_eq!(Provenance::explicit(SourceType::UserInput, "s").confidence, 0.90);
        assert_eq!(Provenance::new(SourceType::Agent, "s").confidence, 0.60);
        assert_eq!(Provenance::new(SourceType::ToolOutput, "s").confidence, 0.50);
    }

    #[test]
    fn test_add_source_is_idempotent() {
        let mut p = Provenance::new(SourceType::UserInput, "s1");
        assert!(p.add_source("s2"));
        let version = p.version;
        assert!(!p.add_source("s2"));
        assert_eq!(p.sources, vec!["s1", "s2"]);
        assert_eq!(p.version, version);
    }

    #[test]
    fn test_corroborate_caps_boost() {
        let mut p = Provenance::new(SourceType::UserInput, "s1");
        for i in 0..10 {
            p.corroborate(format!("c{i}"));
        }
        assert_eq!(p.corroboration_count, 10);
        assert!((p.confidence - 0.90).abs() < 1e-9);
    }

    #[test]
    fn test_corroborate_bumps_version_once_per_call() {
        let mut p = Provenance::new(SourceType::Agent, "s1");
        p.corroborate("s1");
        assert_eq!(p.version, 2);
        p.corroborate("s2");
        assert_eq!(p.version, 3);
        assert_eq!(p.sources, vec!["s1", "s2"]);
    }

    #[test]
    fn test_mark_accessed_keeps_version() {
        let mut p = Provenance::new(SourceType::Agent, "s1");
        let updated = p.updated_at;
        p.mark_accessed();
        assert!(p.last_accessed_at.is_some());
        assert_eq!(p.version, 1);
        assert_eq!(p.updated_at, updated);
    }

    #[test]
    fn test_envelope_round_trip() {
        let mut p = Provenance::explicit(SourceType::UserInput, "session-1")
            .with_tags(["preference"]);
        p.corroborate("session-2");
        p.mark_accessed();

        let meta = p.to_metadata().unwrap();
        let envelope = &meta[PROVENANCE_KEY];
        assert_eq!(envelope["source_type"], json!("user_input"));
        assert!(envelope["created_at"].as_str().unwrap().ends_with('Z'));

        let back = Provenance::from_metadata(&meta).unwrap().unwrap();
        assert_eq!(back.sources, p.sources);
        assert_eq!(back.version, p.version);
        assert!(back.is_explicit());
        assert_eq!(back.corroboration_count, 1);
        assert_eq!(back.tags, p.tags);
        assert_eq!(back.created_at.timestamp(), p.created_at.timestamp());
        assert!(back.last_accessed_at.is_some());
    }

    #[test]
    fn test_from_metadata_absent_and_malformed() {
        assert!(Provenance::from_metadata(&Metadata::new()).unwrap().is_none());

        let mut meta = Metadata::new();
        meta.insert(PROVENANCE_KEY.into(), json!({"source_type": "nonsense"}));
        assert!(Provenance::from_metadata(&meta).is_err());
    }

    #[test]
    fn test_source_type_parse() {
        assert_eq!("tool_output".parse::<SourceType>().unwrap(), SourceType::ToolOutput);
        assert!("crm".parse::<SourceType>().is_err());
    }
}
