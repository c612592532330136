//! Back-off policy for oracle calls.
//!
//! Only transient failures are retried: timeouts, connection errors, 5xx
//! responses and throttling. A throttled reply that names a `Retry-After`
//! delay is waited out exactly (capped); everything else backs off
//! exponentially with jitter. Schema violations and explicit rejections are
//! returned immediately because asking again costs money and rarely helps.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::OracleError;

/// Upper bound on any single wait, including server-requested ones.
pub(crate) const MAX_DELAY: Duration = Duration::from_secs(30);

pub(crate) fn is_retriable(err: &OracleError) -> bool {
    match err {
        OracleError::Http(e) => {
            e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
        }
        OracleError::Timeout { .. } | OracleError::Throttled { .. } => true,
        OracleError::MalformedResponse { .. }
        | OracleError::Rejected { .. }
        | OracleError::Unavailable => false,
    }
}

/// Parse a `Retry-After` header value: either delta-seconds or an HTTP date.
///
/// Dates in the past yield a zero delay.
pub(crate) fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    Some(
        (at.with_timezone(&Utc) - now)
            .to_std()
            .unwrap_or(Duration::ZERO),
    )
}

/// Jitter factor source; must return a value in `[0.75, 1.25]`.
pub(crate) type Jitter = fn() -> f64;

fn random_jitter() -> f64 {
    rand::random::<f64>() * 0.5 + 0.75
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Backoff {
    max_retries: u32,
    base: Duration,
    jitter: Jitter,
}

impl Backoff {
    pub(crate) fn new(max_retries: u32, base_ms: u64) -> Self {
        Self {
            max_retries,
            base: Duration::from_millis(base_ms),
            jitter: random_jitter,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Wait before retry number `attempt` (1-based) after `err`.
    ///
    /// A server-stated `Retry-After` wins over the exponential schedule
    /// `base × 2^(attempt-1) × jitter`. Both are capped at [`MAX_DELAY`].
    pub(crate) fn delay(&self, attempt: u32, err: &OracleError) -> Duration {
        if let OracleError::Throttled {
            retry_after: Some(wait),
            ..
        } = err
        {
            return (*wait).min(MAX_DELAY);
        }
        let exponential = self
            .base
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(10))
            .min(MAX_DELAY);
        exponential.mul_f64((self.jitter)()).min(MAX_DELAY)
    }

    /// Run `operation`, retrying transient errors up to `max_retries` times.
    pub(crate) async fn retry<T, F, Fut>(&self, mut operation: F) -> Result<T, OracleError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OracleError>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !is_retriable(&err) || attempt >= self.max_retries {
                        return Err(err);
                    }
                    attempt += 1;
                    let delay = self.delay(attempt, &err);
                    tracing::warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "oracle transient error, retrying after back-off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
