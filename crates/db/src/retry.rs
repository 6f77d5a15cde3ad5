//! Exponential-backoff retry for connection establishment
//!
//! Retrying is reserved for connect attempts: queries and writes are never
//! retried here since replaying a non-idempotent write could duplicate its
//! effect. The loop is explicit rather than recursive so high retry counts
//! cannot grow the stack.

use std::future::Future;
use std::time::Duration;
use subtrack_core::DatabaseConfig;
use tokio::time::timeout;

use crate::error::{DbError, DbResult, ErrorCode};

/// Bounded retry with exponential backoff
///
/// A policy permits `max_retries + 1` total attempts. The delay before
/// retry `k` (1-indexed) is `base_delay * 2^(k-1)`; each attempt races
/// against `attempt_timeout`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            attempt_timeout,
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self::new(
            config.max_retries,
            config.retry_base_delay,
            config.connect_timeout,
        )
    }

    /// Total attempts this policy permits
    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Backoff delay before retry `retry` (1-indexed)
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        debug_assert!(retry >= 1);
        self.base_delay * 2u32.saturating_pow(retry - 1)
    }

    /// Run `attempt` until it succeeds or the policy is exhausted
    ///
    /// A timed-out attempt counts against the budget like a failed one, but
    /// if the final failure was a timeout the terminal error is
    /// `CONNECTION_TIMEOUT` with its fixed message instead of
    /// `CONNECTION_FAILED`. Dropping the returned future abandons the whole
    /// operation between attempts; an attempt already dispatched runs to
    /// completion or to its own timeout.
    pub async fn execute<T, F, Fut>(&self, mut attempt: F) -> DbResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let total = self.total_attempts();
        let mut last_was_timeout = false;
        let mut last_error: Option<DbError> = None;

        for attempt_no in 1..=total {
            if attempt_no > 1 {
                let delay = self.delay_before_retry(attempt_no - 1);
                tracing::debug!(
                    attempt = attempt_no,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before connection retry"
                );
                tokio::time::sleep(delay).await;
            }

            match timeout(self.attempt_timeout, attempt()).await {
                Ok(Ok(value)) => {
                    if attempt_no > 1 {
                        tracing::info!(attempt = attempt_no, "Connection established after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(err)) => {
                    tracing::warn!(
                        attempt = attempt_no,
                        total_attempts = total,
                        error = %err,
                        "Connection attempt failed"
                    );
                    last_was_timeout = err.code == ErrorCode::ConnectionTimeout;
                    last_error = Some(err);
                }
                Err(_) => {
                    tracing::warn!(
                        attempt = attempt_no,
                        total_attempts = total,
                        timeout_ms = self.attempt_timeout.as_millis() as u64,
                        "Connection attempt timed out"
                    );
                    last_was_timeout = true;
                    last_error = Some(DbError::timeout());
                }
            }
        }

        if last_was_timeout {
            let mut err = DbError::timeout();
            err.cause = last_error.and_then(|e| e.cause.or(Some(e.message)));
            Err(err)
        } else {
            let mut err = DbError::connection_failed(format!(
                "Failed to connect after {} attempts",
                total
            ));
            err.cause = last_error.map(|e| e.message);
            Err(err)
        }
    }
}
