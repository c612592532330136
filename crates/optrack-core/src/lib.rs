//! Shared data model and configuration for the opinion consolidation pipeline.
//!
//! Everything the pipeline stages exchange lives here: extracted candidates,
//! relationships with their evidence, canonical opinions with provenance,
//! evolution chains, speaker journeys, and the fixed stage ordering.

pub mod app_config;
pub mod candidate;
pub mod config;
pub mod evolution;
pub mod journey;
pub mod opinion;
pub mod relationship;
pub mod stage;
pub mod tuning;

use thiserror::Error;

pub use app_config::{AppConfig, Environment};
pub use candidate::{CategoryId, OpinionCandidate, SpeakerStance, Stance, TimeRange};
pub use config::{load_app_config, load_app_config_from_env};
pub use evolution::{EvolutionChain, EvolutionNode, EvolutionStep};
pub use journey::{ContentiousPair, SpeakerJourney, SpeakerJourneyNode, StanceShift};
pub use opinion::{ConflictResolution, MergeRecord, Opinion, OpinionAppearance, ResolutionMethod};
pub use relationship::{EvidenceKind, RelationKind, Relationship, RelationshipEvidence};
pub use stage::Stage;
pub use tuning::{load_tuning, SimilarityWeights, Tuning};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read tuning file {path}: {source}")]
    TuningFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse tuning file: {0}")]
    TuningFileParse(#[from] serde_yaml::Error),

    #[error("tuning validation failed: {0}")]
    Validation(String),
}

/// Malformed candidate or relationship data.
///
/// Fatal for the unit of work that carried the data; the pipeline skips the
/// unit, logs the reason, and counts it in the run statistics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("candidate has an empty id (source unit {source_unit_id})")]
    EmptyCandidateId { source_unit_id: String },

    #[error("candidate {candidate_id}: {field} must be non-empty")]
    EmptyField {
        candidate_id: String,
        field: &'static str,
    },

    #[error("candidate {candidate_id}: confidence {value} is outside [0, 1]")]
    ConfidenceOutOfRange { candidate_id: String, value: String },

    #[error("candidate {candidate_id} belongs to source unit {actual}, not {expected}")]
    SourceUnitMismatch {
        candidate_id: String,
        expected: String,
        actual: String,
    },

    #[error("duplicate candidate id {candidate_id} (already seen in source unit {first_unit})")]
    DuplicateCandidateId {
        candidate_id: String,
        first_unit: String,
    },

    #[error("relationship {source_id} -> {target_id} carries no evidence")]
    MissingEvidence { source_id: String, target_id: String },

    #[error("relationship {source_id} -> {target_id}: confidence {value} is outside [0, 1]")]
    RelationshipConfidence {
        source_id: String,
        target_id: String,
        value: String,
    },
}
