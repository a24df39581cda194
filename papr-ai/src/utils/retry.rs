//! Retry Logic
//!
//! Bounded-attempt retry with fixed or exponential backoff. The operation
//! decides per failure whether another attempt makes sense by returning
//! [`RetryError::Retryable`] or [`RetryError::Fatal`].

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::StoreError;

/// Failure of a single attempt
#[derive(Debug)]
pub enum RetryError<E> {
    /// Try again if attempts remain
    Retryable(E),
    /// Stop immediately
    Fatal(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Retryable(e) | RetryError::Fatal(e) => e,
        }
    }
}

/// Delay growth between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay every time
    Fixed,
    /// `base_delay * 2^(attempt - 1)`, capped
    Exponential { max_delay: Duration },
}

/// How many times to try and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: delay,
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff: Backoff::Exponential {
                max_delay: Duration::from_secs(30),
            },
        }
    }

    /// Delay to wait after `attempt` (1-based) failed
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential { max_delay } => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor).min(max_delay)
            }
        }
    }
}

/// Run `operation` until it succeeds, fails fatally, or attempts run out
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "record analysis", "score item")
/// * `policy` - Attempt bound and backoff
/// * `operation` - Async closure performing one attempt
///
/// # Returns
/// The first success, or the error of the last attempt
pub async fn retry<F, Fut, T, E>(operation_name: &str, policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RetryError<E>>>,
    E: Display,
{
    let start_time = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying operation");
        }

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    let elapsed_ms = start_time.elapsed().as_millis();
                    if elapsed_ms > 5000 {
                        tracing::warn!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms,
                            "Operation succeeded after extended retry period (>5s)"
                        );
                    } else {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms,
                            "Operation succeeded after retry"
                        );
                    }
                }
                return Ok(result);
            }
            Err(RetryError::Fatal(err)) => {
                tracing::debug!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "Operation failed with non-retryable error"
                );
                return Err(err);
            }
            Err(RetryError::Retryable(err)) => {
                if attempt >= policy.max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis(),
                        error = %err,
                        "Operation failed: retry attempts exhausted"
                    );
                    return Err(err);
                }

                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    backoff_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, will retry after backoff"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// [`retry`] for store calls: transient errors are retried, the rest are not
pub async fn retry_transient<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    retry(operation_name, policy, || {
        let fut = operation();
        async move {
            fut.await.map_err(|e| {
                if e.is_transient() {
                    RetryError::Retryable(e)
                } else {
                    RetryError::Fatal(e)
                }
            })
        }
    })
    .await
}
