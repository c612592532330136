use std::time::Duration;

use thiserror::Error;

/// Errors from the relation oracle.
///
/// Every variant is recoverable from the pipeline's point of view: callers
/// fall back to the similarity heuristic and never surface these upward.
#[derive(Debug, Error)]
pub enum OracleError {
    /// Network, TLS or non-2xx failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("oracle call timed out after {after_secs}s")]
    Timeout { after_secs: u64 },

    /// 429 or 503, with the server's `Retry-After` delay when it sent one.
    #[error("oracle throttled the request (HTTP {status})")]
    Throttled {
        status: u16,
        retry_after: Option<Duration>,
    },

    /// The reply did not match the expected schema or value ranges.
    #[error("malformed oracle response: {reason}")]
    MalformedResponse { reason: String },

    /// The oracle answered with an explicit error status.
    #[error("oracle rejected the request ({kind}): {message}")]
    Rejected { kind: String, message: String },

    /// No oracle is configured for this run.
    #[error("oracle unavailable")]
    Unavailable,
}

impl OracleError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            reason: reason.into(),
        }
    }
}
