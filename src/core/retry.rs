//! Retry policy for top-level operations.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Retry policy for an operation category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Lower bound for any retry delay in milliseconds
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_min_delay() -> u64 {
    100
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            min_delay_ms: default_min_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay after a failed attempt (1-indexed), clamped to
    /// `[min_delay_ms, max_delay_ms]`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);

        let max = self.max_delay_ms.max(self.min_delay_ms);
        let clamped = delay.clamp(self.min_delay_ms as f64, max as f64) as u64;
        Duration::from_millis(clamped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("retry max_attempts must be at least 1");
        }
        if self.min_delay_ms > self.max_delay_ms {
            anyhow::bail!(
                "retry min_delay_ms ({}) exceeds max_delay_ms ({})",
                self.min_delay_ms,
                self.max_delay_ms
            );
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            anyhow::bail!("retry backoff_multiplier must be a finite value >= 1.0");
        }
        Ok(())
    }
}

/// Outcome of a failed retry loop
#[derive(Debug)]
pub struct RetryExhausted<E> {
    /// Attempts actually made
    pub attempts: u32,

    /// Error from the last attempt
    pub last_error: E,
}

/// Run `operation` until it succeeds, `is_retryable` rejects an error, or the
/// attempt budget is spent.
///
/// `on_retry(attempt, &error, delay)` is awaited before each backoff sleep.
pub async fn retry_with_policy<T, E, F, Fut, R, RFut>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: impl Fn(&E) -> bool,
    mut on_retry: R,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(u32, &E, Duration) -> RFut,
    RFut: Future<Output = ()>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !is_retryable(&error) || !policy.should_retry(attempt) {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: error,
                    });
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(attempt, max_attempts, delay = ?delay, error = %error, "Retrying operation");
                on_retry(attempt, &error, delay).await;
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
