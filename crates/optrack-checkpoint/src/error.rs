use optrack_core::Stage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The on-disk document cannot be trusted. Never repaired automatically.
    #[error("checkpoint {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("cannot mark stage {stage} complete for {unit}: stage {missing} is not complete")]
    OutOfOrderStage {
        unit: String,
        stage: Stage,
        missing: Stage,
    },

    #[error("checkpoint lock poisoned by a panicked writer")]
    LockPoisoned,
}

impl CheckpointError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
