use optrack_checkpoint::CheckpointError;
use optrack_core::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsolidateError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("evolution cycle in category {category}: {}", ids.join(" -> "))]
    CyclicEvolution { category: String, ids: Vec<String> },

    #[error("relationship references unknown candidate {candidate_id}")]
    UnresolvedCandidateId { candidate_id: String },

    #[error("evolution edge references unknown opinion {opinion_id}")]
    UnresolvedOpinionId { opinion_id: String },

    #[error("relationship {source_id} -> {target_id} carries no evidence")]
    MissingEvidence { source_id: String, target_id: String },

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("run cancelled")]
    Cancelled,
}

impl ConsolidateError {
    /// Data-integrity failures that abort one category partition while the
    /// rest of the run continues.
    ///
    /// Everything else (checkpoint trouble, cancellation) ends the run.
    #[must_use]
    pub fn is_partition_local(&self) -> bool {
        matches!(
            self,
            ConsolidateError::Validation(_)
                | ConsolidateError::CyclicEvolution { .. }
                | ConsolidateError::UnresolvedCandidateId { .. }
                | ConsolidateError::UnresolvedOpinionId { .. }
                | ConsolidateError::MissingEvidence { .. }
        )
    }
}
