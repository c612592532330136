use serde::{Deserialize, Serialize};

use crate::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    Same,
    Related,
    Evolution,
    Contradiction,
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelationKind::Same => write!(f, "SAME"),
            RelationKind::Related => write!(f, "RELATED"),
            RelationKind::Evolution => write!(f, "EVOLUTION"),
            RelationKind::Contradiction => write!(f, "CONTRADICTION"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceKind {
    Semantic,
    Lexical,
    Temporal,
    Logical,
    Oracle,
    /// Similarity-only decision taken because the oracle failed.
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEvidence {
    pub description: String,
    pub kind: EvidenceKind,
    pub confidence: f32,
}

impl RelationshipEvidence {
    #[must_use]
    pub fn new(kind: EvidenceKind, description: impl Into<String>, confidence: f32) -> Self {
        Self {
            description: description.into(),
            kind,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Directed edge between two candidate ids, or between two canonical
/// opinion ids once the merge stage has translated it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_id: String,
    pub target_id: String,
    pub kind: RelationKind,
    pub confidence: f32,
    pub evidence: Vec<RelationshipEvidence>,
}

impl Relationship {
    /// Build a relationship whose confidence is the mean of its evidence.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingEvidence`] when `evidence` is empty.
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        kind: RelationKind,
        evidence: Vec<RelationshipEvidence>,
    ) -> Result<Self, ValidationError> {
        let source_id = source_id.into();
        let target_id = target_id.into();
        if evidence.is_empty() {
            return Err(ValidationError::MissingEvidence {
                source_id,
                target_id,
            });
        }
        #[allow(clippy::cast_precision_loss)]
        let confidence =
            evidence.iter().map(|e| e.confidence).sum::<f32>() / evidence.len() as f32;
        Ok(Self {
            source_id,
            target_id,
            kind,
            confidence: confidence.clamp(0.0, 1.0),
            evidence,
        })
    }

    /// Lower the confidence to at most `ceiling`.
    #[must_use]
    pub fn capped(mut self, ceiling: f32) -> Self {
        self.confidence = self.confidence.min(ceiling);
        self
    }

    /// Check invariants on relationships that arrive from outside the classifier.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] on empty evidence or out-of-range confidence.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.evidence.is_empty() {
            return Err(ValidationError::MissingEvidence {
                source_id: self.source_id.clone(),
                target_id: self.target_id.clone(),
            });
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ValidationError::RelationshipConfidence {
                source_id: self.source_id.clone(),
                target_id: self.target_id.clone(),
                value: self.confidence.to_string(),
            });
        }
        Ok(())
    }

    /// Concatenated evidence descriptions, used for step classification.
    #[must_use]
    pub fn evidence_text(&self) -> String {
        self.evidence
            .iter()
            .map(|e| e.description.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
