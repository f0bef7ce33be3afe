//! Retry Logic with Bounded Backoff
//!
//! Used at the fetch boundary (exponential) and for order posting (linear).
//! Only retries errors that `CopyError::is_retryable()` classifies as transient.

use crate::error::CopyError;
use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// delay = initial * factor^(attempt - 1)
    Exponential { factor: f64 },
    /// delay = initial * attempt
    Linear,
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay in milliseconds
    pub max_delay_ms: u64,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::fetch()
    }
}

impl RetryConfig {
    /// HTTP fetch policy: 3 attempts, 500ms doubling, capped at 3s
    pub fn fetch() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 3000,
            backoff: Backoff::Exponential { factor: 2.0 },
        }
    }

    /// Order post policy: `retry_limit` attempts, 1s steps, capped at 3s
    pub fn order_post(retry_limit: u32) -> Self {
        Self {
            max_attempts: retry_limit.max(1),
            initial_delay_ms: 1000,
            max_delay_ms: 3000,
            backoff: Backoff::Linear,
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let raw = match self.backoff {
            Backoff::Exponential { factor } => {
                self.initial_delay_ms as f64 * factor.powi(attempt as i32 - 1)
            }
            Backoff::Linear => self.initial_delay_ms as f64 * attempt as f64,
        };
        Duration::from_millis((raw as u64).min(self.max_delay_ms))
    }
}

/// Execute an async closure with retry logic.
///
/// Non-retryable errors are returned immediately; retryable ones are
/// retried until `max_attempts` is exhausted, then the last error is returned.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    mut f: F,
) -> Result<T, CopyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CopyError>>,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                attempt += 1;

                if !err.is_retryable() {
                    return Err(err);
                }
                if attempt >= config.max_attempts {
                    warn!(
                        "[Retry] {} failed after {} attempts: {}",
                        operation_name, attempt, err
                    );
                    return Err(err);
                }

                let delay = config.delay_for(attempt);
                debug!(
                    "[Retry] {} attempt {}/{} failed ({}), retrying in {:?}",
                    operation_name, attempt, config.max_attempts, err, delay
                );

                sleep(delay).await;
            }
        }
    }
}
