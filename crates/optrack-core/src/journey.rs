use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::candidate::Stance;

/// Size of a stance change on the support / neutral / oppose axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StanceShift {
    /// One step, e.g. support to neutral.
    Moderate,
    /// Support to oppose or back.
    Reversal,
}

impl StanceShift {
    #[must_use]
    pub fn between(from: Stance, to: Stance) -> Option<Self> {
        match (from.polarity() - to.polarity()).abs() {
            0 => None,
            1 => Some(StanceShift::Moderate),
            _ => Some(StanceShift::Reversal),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerJourneyNode {
    pub opinion_id: String,
    pub source_unit_id: String,
    pub source_unit_date: DateTime<Utc>,
    pub stance: Stance,
    pub reasoning: Option<String>,
    /// Stance differs from this speaker's previous node on the same opinion.
    pub stance_changed: bool,
    pub shift: Option<StanceShift>,
    /// Reasoning differs from this speaker's previous node on the same thread
    /// (same opinion, or an earlier opinion in the same evolution chain).
    pub reasoning_changed: bool,
    /// Earlier opinion of the same evolution chain this node continues.
    pub continues_from: Option<String>,
}

/// A speaker holding opposing stances on two different opinions within one
/// source unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentiousPair {
    pub source_unit_id: String,
    pub opinion_a: String,
    pub stance_a: Stance,
    pub opinion_b: String,
    pub stance_b: Stance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerJourney {
    pub speaker_id: String,
    pub speaker_name: Option<String>,
    pub nodes: Vec<SpeakerJourneyNode>,
    pub contentious: Vec<ContentiousPair>,
}

impl SpeakerJourney {
    #[must_use]
    pub fn new(speaker_id: impl Into<String>) -> Self {
        Self {
            speaker_id: speaker_id.into(),
            speaker_name: None,
            nodes: Vec::new(),
            contentious: Vec::new(),
        }
    }

    /// Fold another journey for the same speaker into this one, keeping
    /// chronological node order.
    pub fn absorb(&mut self, other: SpeakerJourney) {
        if self.speaker_name.is_none() {
            self.speaker_name = other.speaker_name;
        }
        self.nodes.extend(other.nodes);
        self.nodes.sort_by(|a, b| {
            a.source_unit_date
                .cmp(&b.source_unit_date)
                .then_with(|| a.source_unit_id.cmp(&b.source_unit_id))
                .then_with(|| a.opinion_id.cmp(&b.opinion_id))
        });
        self.contentious.extend(other.contentious);
    }

    #[must_use]
    pub fn stance_changes(&self) -> usize {
        self.nodes.iter().filter(|n| n.stance_changed).count()
    }
}
