use optrack_core::Stage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CheckpointError;

/// Cache key for an oracle request: the stage name plus the SHA-256 of the
/// exact serialized payload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(String);

impl QueryKey {
    /// # Errors
    ///
    /// Returns [`CheckpointError::Serialize`] if `payload` cannot be serialized.
    pub fn new<T: Serialize + ?Sized>(stage: Stage, payload: &T) -> Result<Self, CheckpointError> {
        let body = serde_json::to_vec(payload)?;
        let mut hasher = Sha256::new();
        hasher.update(stage.name().as_bytes());
        hasher.update([0u8]);
        hasher.update(&body);
        Ok(Self(format!("{}:{:x}", stage.name(), hasher.finalize())))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Hex SHA-256 of the serialized `payload`, used to detect changed unit input.
///
/// # Errors
///
/// Returns [`CheckpointError::Serialize`] if `payload` cannot be serialized.
pub fn content_digest<T: Serialize + ?Sized>(payload: &T) -> Result<String, CheckpointError> {
    let body = serde_json::to_vec(payload)?;
    Ok(format!("{:x}", Sha256::digest(&body)))
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
