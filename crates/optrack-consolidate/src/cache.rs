use std::time::Duration;

use optrack_checkpoint::{CheckpointStore, QueryKey};
use optrack_core::Stage;
use optrack_oracle::{OracleError, OracleRequest, OracleVerdict, RelationOracle};

/// An oracle answer and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Verified {
    pub verdict: OracleVerdict,
    pub from_cache: bool,
}

/// Oracle front that answers repeated questions from the checkpoint cache
/// and bounds every live call with a deadline.
///
/// Only successful verdicts are cached; failures are retried on the next
/// run. An in-flight call is never aborted by cancellation.
pub struct CachedOracle<'a> {
    oracle: &'a dyn RelationOracle,
    store: &'a CheckpointStore,
    deadline: Duration,
}

impl<'a> CachedOracle<'a> {
    pub fn new(
        oracle: &'a dyn RelationOracle,
        store: &'a CheckpointStore,
        deadline: Duration,
    ) -> Self {
        Self {
            oracle,
            store,
            deadline,
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.oracle.is_available()
    }

    /// # Errors
    ///
    /// Any [`OracleError`]; a deadline overrun becomes [`OracleError::Timeout`].
    pub async fn verify(&self, request: &OracleRequest) -> Result<Verified, OracleError> {
        if !self.oracle.is_available() {
            return Err(OracleError::Unavailable);
        }

        let key =
            QueryKey::new(Stage::Relate, request).map_err(|e| OracleError::MalformedResponse {
                reason: format!("request could not be keyed: {e}"),
            })?;
        match self.store.cached_response::<OracleVerdict>(&key) {
            Ok(Some(verdict)) => {
                tracing::debug!(key = %key, "oracle cache hit");
                return Ok(Verified {
                    verdict,
                    from_cache: true,
                });
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(key = %key, error = %e, "oracle cache read failed"),
        }

        let verdict = tokio::time::timeout(self.deadline, self.oracle.verify(request))
            .await
            .map_err(|_| OracleError::Timeout {
                after_secs: self.deadline.as_secs(),
            })??;

        if let Err(e) = self.store.put_cached_response(&key, &verdict) {
            tracing::warn!(key = %key, error = %e, "failed to cache oracle verdict");
        }
        Ok(Verified {
            verdict,
            from_cache: false,
        })
    }
}
