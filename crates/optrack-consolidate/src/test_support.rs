//! Candidate and opinion fixtures shared by unit tests.

use std::collections::BTreeSet;

use chrono::{TimeZone, Utc};
use optrack_core::{
    CategoryId, MergeRecord, Opinion, OpinionAppearance, OpinionCandidate, SpeakerStance, Stance,
};

pub(crate) struct CandidateBuilder {
    inner: OpinionCandidate,
}

pub(crate) fn candidate(id: &str, title: &str) -> CandidateBuilder {
    CandidateBuilder {
        inner: OpinionCandidate {
            id: id.to_owned(),
            title: title.to_owned(),
            description: title.to_owned(),
            category: CategoryId::new("economy"),
            keywords: Vec::new(),
            speakers: Vec::new(),
            source_unit_id: "ep-jan".to_owned(),
            source_unit_title: "January episode".to_owned(),
            source_unit_date: Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
            content: String::new(),
            confidence: 0.8,
            embedding: None,
        },
    }
}

impl CandidateBuilder {
    pub(crate) fn description(mut self, text: &str) -> Self {
        self.inner.description = text.to_owned();
        self
    }

    pub(crate) fn category(mut self, category: &str) -> Self {
        self.inner.category = CategoryId::new(category);
        self
    }

    pub(crate) fn keywords(mut self, keywords: &[&str]) -> Self {
        self.inner.keywords = keywords.iter().map(|k| (*k).to_owned()).collect();
        self
    }

    pub(crate) fn speaker(mut self, id: &str, stance: Stance, reasoning: Option<&str>) -> Self {
        self.inner.speakers.push(SpeakerStance {
            speaker_id: id.to_owned(),
            speaker_name: None,
            stance,
            reasoning: reasoning.map(str::to_owned),
            time_range: None,
        });
        self
    }

    /// Source unit `unit` recorded on day one of `month` in 2024.
    pub(crate) fn unit(mut self, unit: &str, month: u32) -> Self {
        self.inner.source_unit_id = unit.to_owned();
        self.inner.source_unit_title = format!("Episode {unit}");
        self.inner.source_unit_date = Utc.with_ymd_and_hms(2024, month, 1, 0, 0, 0).unwrap();
        self
    }

    pub(crate) fn content(mut self, text: &str) -> Self {
        self.inner.content = text.to_owned();
        self
    }

    pub(crate) fn confidence(mut self, confidence: f32) -> Self {
        self.inner.confidence = confidence;
        self
    }

    pub(crate) fn embedding(mut self, embedding: &[f32]) -> Self {
        self.inner.embedding = Some(embedding.to_vec());
        self
    }

    pub(crate) fn build(self) -> OpinionCandidate {
        self.inner
    }
}

/// Single-appearance opinion first seen on day one of `month` in 2024.
/// `speakers` are `(speaker id, stance, reasoning)`.
pub(crate) fn opinion(
    id: &str,
    month: u32,
    speakers: &[(&str, Stance, Option<&str>)],
) -> Opinion {
    let unit = format!("ep-{month:02}");
    Opinion {
        id: id.to_owned(),
        title: format!("opinion {id}"),
        description: String::new(),
        category: CategoryId::new("economy"),
        appearances: vec![OpinionAppearance {
            source_unit_id: unit.clone(),
            source_unit_title: format!("Episode {unit}"),
            source_unit_date: Utc.with_ymd_and_hms(2024, month, 1, 0, 0, 0).unwrap(),
            speakers: speakers
                .iter()
                .map(|(speaker, stance, reasoning)| SpeakerStance {
                    speaker_id: (*speaker).to_owned(),
                    speaker_name: None,
                    stance: *stance,
                    reasoning: reasoning.map(str::to_owned),
                    time_range: None,
                })
                .collect(),
            content: String::new(),
            candidate_id: format!("cand-{id}"),
        }],
        related_opinion_ids: BTreeSet::new(),
        evolution_chain_id: None,
        contradicts_opinion_id: None,
        keywords: BTreeSet::new(),
        provenance: vec![MergeRecord {
            source_candidate_ids: vec![format!("cand-{id}")],
            opinion_id: id.to_owned(),
            rationale: "single candidate, no merge".to_owned(),
            conflicts: Vec::new(),
        }],
    }
}
