//! Retry logic with exponential backoff
//!
//! This module provides configurable retry logic for transient failures.
//! It implements exponential backoff with optional jitter to prevent
//! thundering herd. The download pool uses [`delay_for_attempt`] directly so
//! the per-task retry count can be persisted between attempts; everything
//! else goes through [`with_retry`].

use crate::config::RetryConfig;
use crate::error::{DatabaseError, Error, is_transient_io_kind};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, store contention, connection reset)
/// should return `true`. Permanent failures (bad input, missing file,
/// invalid transition) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Network errors are retryable when they look like connectivity
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            // I/O errors are retryable for the transient kinds only
            Error::Io(e) => is_transient_io_kind(e.kind()),
            // Expected concurrent-update contention on the task store
            Error::Database(DatabaseError::Contention(_)) => true,
            // Any other store error is treated as fatal persistence trouble
            Error::Database(_) | Error::Sqlx(_) => false,
            // Fetch verification failures are permanent: the bytes are wrong,
            // not merely late
            Error::Fetch(_) => false,
            // Stage outcomes are handled by the orchestrator, never retried here
            Error::Stage(_) => false,
            // Delivery retry policy lives in the notifier
            Error::Delivery(_) => false,
            // Admission rejections are the submitter's problem
            Error::Admission(_) => false,
            Error::Config { .. } => false,
            Error::NotFound(_) => false,
            Error::ShuttingDown => false,
            Error::Serialization(_) => false,
            Error::Other(_) => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// # Arguments
///
/// * `config` - Retry configuration (max attempts, delays, backoff multiplier, jitter)
/// * `operation` - Async closure returning `Result<T, E>` where E implements IsRetryable
///
/// Returns the successful result or the last error after all retry attempts
/// are exhausted.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt + 1 < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Backoff delay before retrying after `attempt` failed attempts (1-based)
///
/// With the defaults this yields 1 s, 2 s, 4 s, ... capped at `max_delay`.
/// Used by the download pool, which persists the attempt counter in the task
/// store instead of keeping it in a closure.
pub fn delay_for_attempt(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let factor = config.backoff_multiplier.powi(exponent as i32);
    let delay = Duration::from_secs_f64(config.initial_delay.as_secs_f64() * factor);
    delay.min(config.max_delay)
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// actual delay lands between `delay` and `2 * delay`.
pub(crate) fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
