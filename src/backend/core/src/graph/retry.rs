//! Time-bounded retries for artifact source calls.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::config::UpstreamConfig;
use crate::error::{CascadeError, ErrorCode, Result};

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed { delay: Duration },
    /// `initial * multiplier^attempt`, capped at `max_delay`
    Exponential {
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    },
}

impl BackoffStrategy {
    /// Calculate the delay after a failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential {
                initial_delay,
                max_delay,
                multiplier,
            } => {
                let delay = initial_delay.as_secs_f64() * multiplier.powi(attempt as i32);
                Duration::from_secs_f64(delay.min(max_delay.as_secs_f64()))
            }
        }
    }
}

/// Per-attempt timeout plus bounded retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub backoff: BackoffStrategy,
}

impl RetryPolicy {
    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            attempt_timeout: config.request_timeout,
            backoff: BackoffStrategy::Exponential {
                initial_delay: config.initial_backoff,
                max_delay: config.max_backoff,
                multiplier: 2.0,
            },
        }
    }

    /// One attempt, no waiting.
    pub fn once(attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            attempt_timeout,
            backoff: BackoffStrategy::Fixed {
                delay: Duration::ZERO,
            },
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. Each attempt is cut off at `attempt_timeout`.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let outcome = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(elapsed) => Err(CascadeError::from(elapsed)),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !err.is_retryable() {
                        return Err(err);
                    }
                    let delay = self.backoff.delay_for_attempt(attempt - 1);
                    debug!(
                        target_label = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error_code = %err.code(),
                        "Retrying artifact source call"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&UpstreamConfig::default())
    }
}

/// Whether an error came from the artifact source rather than the store.
pub fn is_upstream_failure(err: &CascadeError) -> bool {
    matches!(
        err.code(),
        ErrorCode::UpstreamUnavailable | ErrorCode::UpstreamTimeout | ErrorCode::NetworkError
    )
}
