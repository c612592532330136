use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Opaque category identifier assigned by the upstream categorization step.
///
/// Compared by exact value only; no fuzzy matching happens past the
/// ingestion boundary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(String);

impl CategoryId {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CategoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    Support,
    Oppose,
    Neutral,
}

impl Stance {
    /// Position on a support(+1) / neutral(0) / oppose(-1) axis.
    #[must_use]
    pub fn polarity(self) -> i8 {
        match self {
            Stance::Support => 1,
            Stance::Neutral => 0,
            Stance::Oppose => -1,
        }
    }

    #[must_use]
    pub fn opposes(self, other: Stance) -> bool {
        self.polarity() * other.polarity() == -1
    }
}

impl std::fmt::Display for Stance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stance::Support => write!(f, "support"),
            Stance::Oppose => write!(f, "oppose"),
            Stance::Neutral => write!(f, "neutral"),
        }
    }
}

/// Offsets into the source audio, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_secs: f64,
    pub end_secs: f64,
}

/// One speaker's position on an opinion at a given appearance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerStance {
    pub speaker_id: String,
    #[serde(default)]
    pub speaker_name: Option<String>,
    pub stance: Stance,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
}

/// A provisional opinion extracted from a single source unit (episode).
///
/// Immutable once it reaches the consolidation core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpinionCandidate {
    /// Globally unique, structurally opaque.
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: CategoryId,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub speakers: Vec<SpeakerStance>,
    pub source_unit_id: String,
    #[serde(default)]
    pub source_unit_title: String,
    pub source_unit_date: DateTime<Utc>,
    /// Raw excerpt the opinion was extracted from.
    #[serde(default)]
    pub content: String,
    /// Extraction confidence in [0, 1].
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    /// Precomputed text embedding, when the extractor supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

fn default_confidence() -> f32 {
    0.5
}

impl OpinionCandidate {
    /// Check the structural invariants the consolidation stages rely on.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::EmptyCandidateId {
                source_unit_id: self.source_unit_id.clone(),
            });
        }
        let require = |value: &str, field: &'static str| {
            if value.trim().is_empty() {
                Err(ValidationError::EmptyField {
                    candidate_id: self.id.clone(),
                    field,
                })
            } else {
                Ok(())
            }
        };
        require(&self.title, "title")?;
        require(self.category.as_str(), "category")?;
        require(&self.source_unit_id, "source_unit_id")?;
        for speaker in &self.speakers {
            require(&speaker.speaker_id, "speakers[].speaker_id")?;
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ValidationError::ConfidenceOutOfRange {
                candidate_id: self.id.clone(),
                value: self.confidence.to_string(),
            });
        }
        Ok(())
    }

    /// Title and description, the text the content facet compares.
    #[must_use]
    pub fn text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }

    #[must_use]
    pub fn stance_of(&self, speaker_id: &str) -> Option<&SpeakerStance> {
        self.speakers.iter().find(|s| s.speaker_id == speaker_id)
    }
}
