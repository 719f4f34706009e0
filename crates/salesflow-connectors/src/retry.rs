//! Retry Logic with Exponential Backoff
//!
//! Sink writes are retried as whole batches. This is only safe because every
//! write the pipeline issues is an idempotent upsert.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  RetryPolicy                 │
//! │  - max_retries: 5            │
//! │  - initial_backoff: 100ms    │
//! │  - max_backoff: 30s          │
//! │  - backoff_multiplier: 2.0   │
//! └──────┬───────────────────────┘
//!        │
//!        ├─→ Attempt 1: Immediate
//!        ├─→ Attempt 2: Wait 100ms (backoff)
//!        ├─→ Attempt 3: Wait 200ms (backoff * 2)
//!        ├─→ Attempt 4: Wait 400ms (backoff * 4)
//!        ├─→ Attempt 5: Wait 800ms (backoff * 8)
//!        └─→ Attempt 6: Wait 1.6s  (backoff * 16)
//! ```
//!
//! Only errors for which
//! [`ConnectorError::is_retryable`](crate::error::ConnectorError::is_retryable)
//! returns `true` are retried; permanent rejections are returned immediately.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::Result;

/// Retry policy configuration for exponential backoff.
///
/// ```text
/// backoff = min(initial_backoff * multiplier^attempt, max_backoff)
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first one.
    pub max_retries: usize,

    /// Initial backoff duration
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    pub max_backoff: Duration,

    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: usize,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
        }
    }

    /// Default backoff curve with a different retry budget.
    pub fn with_max_retries(max_retries: usize) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// A policy that gives up after the first failure.
    pub fn no_retry() -> Self {
        Self::with_max_retries(0)
    }

    /// Backoff duration for a given attempt number (0-indexed).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let backoff_ms =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let backoff = Duration::from_millis(backoff_ms as u64);
        backoff.min(self.max_backoff)
    }
}

/// Retry an operation with exponential backoff.
///
/// 1. Try operation
/// 2. If success, return result
/// 3. If error is not retryable, return error immediately
/// 4. If retries remain, sleep for the backoff and try again
/// 5. If all retries are exhausted, return the last error
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_retryable() {
                    warn!(
                        operation = operation_name,
                        error = %err,
                        "Non-retryable error, giving up"
                    );
                    return Err(err);
                }

                if attempt >= policy.max_retries {
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_retries = policy.max_retries,
                        error = %err,
                        "Max retries exhausted, giving up"
                    );
                    return Err(err);
                }

                let backoff = policy.backoff(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Retryable error, backing off"
                );

                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
