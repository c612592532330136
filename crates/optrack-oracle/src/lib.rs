//! Relation oracle boundary.
//!
//! The oracle is an external, non-deterministic classifier consulted for
//! borderline comparisons. Requests are typed, replies are parsed into a
//! strict tagged shape and validated before use; anything else is an
//! [`OracleError`] which callers recover from with a heuristic decision.

pub mod client;
pub mod error;
pub mod types;

mod prompt;
mod retry;

use async_trait::async_trait;

pub use client::{LlmOracleClient, LlmOracleSettings};
pub use error::OracleError;
pub use types::{
    parse_reply, ComparisonQuestion, OracleCandidate, OracleRelation, OracleReply, OracleRequest,
    OracleSpeaker, OracleVerdict,
};

/// Something that can classify the relationship between candidates.
#[async_trait]
pub trait RelationOracle: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &'static str;

    /// Classify the candidates in `request`.
    ///
    /// # Errors
    ///
    /// Any failure, including a reply that does not validate. Callers treat
    /// every error as "oracle unavailable for this question".
    async fn verify(&self, request: &OracleRequest) -> Result<OracleVerdict, OracleError>;

    /// Whether calls can succeed at all. Disabled oracles are skipped without
    /// counting as a call.
    fn is_available(&self) -> bool {
        true
    }
}

/// Oracle used when no API key is configured or verification is switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledOracle;

#[async_trait]
impl RelationOracle for DisabledOracle {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn verify(&self, _request: &OracleRequest) -> Result<OracleVerdict, OracleError> {
        Err(OracleError::Unavailable)
    }

    fn is_available(&self) -> bool {
        false
    }
}
