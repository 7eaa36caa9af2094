//! Bounded retry with quadratic backoff for transient store failures.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::{Result, StoreError};

/// Driver error fragments that mark a failure as safe to retry.
const TRANSIENT_MARKERS: &[&str] = &[
    "deadlock detected",
    "could not serialize access",
    "serialization failure",
    "retry transaction",
];

/// Returns true if a driver error message describes lock contention or a
/// serialization conflict.
pub fn is_transient_message(message: &str) -> bool {
    let message = message.to_lowercase();
    TRANSIENT_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// How many times to attempt an operation and how long to back off.
///
/// The delay after attempt `n` is `n² × base_delay`, so the defaults give
/// 50, 200, 450 and 800 ms between five attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(50);

    /// Creates a policy; at least one attempt is always made.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Backoff after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.saturating_mul(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS, Self::DEFAULT_BASE_DELAY)
    }
}

/// Runs `f` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are used up.
///
/// Non-transient failures come back as [`StoreError::OperationFailed`]
/// after a single attempt; exhausting the attempts yields
/// [`StoreError::RetriesExhausted`].
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op_name: &str, f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_until(policy, op_name, None, f).await
}

/// Like [`with_retry`], but gives up instead of backing off when the next
/// attempt could not start before `deadline`.
///
/// The deadline only limits backoff; bounding an attempt in flight is the
/// caller's job.
pub async fn with_retry_until<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    deadline: Option<Instant>,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;
    while attempts < policy.max_attempts {
        attempts += 1;
        let err = match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => err,
            Err(err) => {
                return Err(StoreError::OperationFailed {
                    op: op_name.to_string(),
                    source: Box::new(err),
                });
            }
        };

        if attempts == policy.max_attempts {
            tracing::warn!(op = op_name, attempt = attempts, error = %err, "retries exhausted");
            break;
        }

        let delay = policy.delay_for(attempts);
        if deadline.is_some_and(|deadline| Instant::now() + delay >= deadline) {
            tracing::warn!(
                op = op_name,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "deadline too close to retry"
            );
            break;
        }

        metrics::counter!("ledger_retries_total", "op" => op_name.to_string()).increment(1);
        tracing::warn!(
            op = op_name,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
    }

    Err(StoreError::RetriesExhausted {
        op: op_name.to_string(),
        attempts,
    })
}
