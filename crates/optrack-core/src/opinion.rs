use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::candidate::{CategoryId, SpeakerStance};

/// One source unit an opinion was observed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpinionAppearance {
    pub source_unit_id: String,
    pub source_unit_title: String,
    pub source_unit_date: DateTime<Utc>,
    pub speakers: Vec<SpeakerStance>,
    pub content: String,
    /// Candidate this appearance was taken from.
    pub candidate_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    /// Value from the highest-confidence candidate; lowest id breaks ties.
    HighestConfidence,
    /// Most frequent value; earliest candidate breaks ties.
    Majority,
    /// All values kept.
    Union,
}

/// How one field-level disagreement was settled during a merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub field: String,
    /// Distinct competing values, sorted.
    pub values: Vec<String>,
    pub method: ResolutionMethod,
    pub chosen: String,
    pub confidence: f32,
}

/// Audit record of candidates folded into one canonical opinion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRecord {
    pub source_candidate_ids: Vec<String>,
    pub opinion_id: String,
    pub rationale: String,
    pub conflicts: Vec<ConflictResolution>,
}

/// A deduplicated opinion that survived the merge stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opinion {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: CategoryId,
    /// Ordered by source-unit timestamp, then source-unit id.
    pub appearances: Vec<OpinionAppearance>,
    pub related_opinion_ids: BTreeSet<String>,
    pub evolution_chain_id: Option<String>,
    pub contradicts_opinion_id: Option<String>,
    pub keywords: BTreeSet<String>,
    pub provenance: Vec<MergeRecord>,
}

impl Opinion {
    #[must_use]
    pub fn earliest_appearance(&self) -> Option<DateTime<Utc>> {
        self.appearances.iter().map(|a| a.source_unit_date).min()
    }

    /// Sorted ids of every candidate folded into this opinion.
    ///
    /// Stable across re-runs even though opinion ids are freshly minted.
    #[must_use]
    pub fn candidate_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .provenance
            .iter()
            .flat_map(|r| r.source_candidate_ids.iter().cloned())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}
