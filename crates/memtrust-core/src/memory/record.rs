//! Scored memory snapshots passed between retrieval, consolidation and quality scoring.

use memtrust_state::{Hit, Metadata};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::provenance::Provenance;

/// A retrieved memory with its similarity to the query. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryWithScore {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub provenance: Option<Provenance>,
    pub score: f64,
}

impl MemoryWithScore {
    pub fn new(id: impl Into<String>, text: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: Metadata::new(),
            provenance: None,
            score,
        }
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Stored confidence, if the memory carries provenance.
    pub fn confidence(&self) -> Option<f64> {
        self.provenance.as_ref().map(|p| p.confidence)
    }
}

impl From<Hit> for MemoryWithScore {
    /// A malformed provenance envelope is logged and treated as absent.
    fn from(hit: Hit) -> Self {
        let provenance = match Provenance::from_metadata(&hit.metadata) {
            Ok(p) => p,
            Err(e) => {
                warn!(memory_id = %hit.id, error = %e, "ignoring malformed provenance envelope");
                None
            }
        };
        Self {
            id: hit.id,
            text: hit.text,
            metadata: hit.metadata,
            provenance,
            score: hit.score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::provenance::{SourceType, PROVENANCE_KEY};
    use serde_json::json;

    #[test]
    fn test_from_hit_parses_provenance() {
        let p = Provenance::new(SourceType::Agent, "a");
        let hit = Hit {
            id: "m1".into(),
            score: 0.9,
            text: "fact".into(),
            metadata: p.to_metadata().unwrap(),
        };
        let m = MemoryWithScore::from(hit);
        assert_eq!(m.confidence(), Some(0.60));
    }

    #[test]
    fn test_from_hit_tolerates_bad_envelope() {
        let mut metadata = Metadata::new();
        metadata.insert(PROVENANCE_KEY.into(), json!("garbage"));
        let hit = Hit {
            id: "m1".into(),
            score: 0.5,
            text: "fact".into(),
            metadata,
        };
        assert!(MemoryWithScore::from(hit).provenance.is_none());
    }
}
