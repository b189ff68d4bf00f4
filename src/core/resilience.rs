//! Retry, timeout and circuit-breaker discipline around async operations.
//!
//! Every attempt runs as a task on a shared, semaphore-bounded worker pool.
//! A timed-out attempt is abandoned, not aborted: the task keeps running to
//! completion and its result is dropped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::circuit_breaker::{CircuitBreakerRegistry, CircuitBreakerState, CircuitState};

/// Default size of the shared worker pool
pub const DEFAULT_WORKERS: usize = 8;

/// Resilience settings for one tool or logical service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Per-attempt timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff in milliseconds; attempt `n` waits `n × base`
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Consecutive failures before the circuit opens
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,

    /// Cooldown before a half-open trial, in milliseconds
    #[serde(default = "default_circuit_reset_interval_ms")]
    pub circuit_reset_interval_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_circuit_failure_threshold() -> u32 {
    5
}
fn default_circuit_reset_interval_ms() -> u64 {
    60_000
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_reset_interval_ms: default_circuit_reset_interval_ms(),
        }
    }
}

impl ResilienceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn circuit_reset_interval(&self) -> Duration {
        Duration::from_millis(self.circuit_reset_interval_ms)
    }

    /// Delay after a failed attempt (1-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff_base() * attempt
    }

    /// Reject configurations that cannot run
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }
        if self.timeout_ms == 0 {
            anyhow::bail!("timeout_ms must be greater than 0");
        }
        if self.circuit_failure_threshold == 0 {
            anyhow::bail!("circuit_failure_threshold must be at least 1");
        }
        Ok(())
    }
}

/// Why a resilient call gave up
#[derive(Debug, Error)]
pub enum ResilienceError {
    #[error("Circuit open for '{key}'")]
    CircuitOpen { key: String },

    #[error("'{key}' timed out after {timeout:?} ({attempts} attempts)")]
    Timeout {
        key: String,
        timeout: Duration,
        attempts: u32,
    },

    #[error("'{key}' failed after {attempts} attempts: {source}")]
    Exhausted {
        key: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
}

enum AttemptFailure {
    Timeout,
    Error(anyhow::Error),
}

/// Runs operations with per-key retry, timeout and circuit breaking
#[derive(Debug)]
pub struct ResilienceExecutor {
    default_config: ResilienceConfig,
    configs: HashMap<String, ResilienceConfig>,
    breakers: CircuitBreakerRegistry,
    workers: Arc<Semaphore>,
}

impl ResilienceExecutor {
    /// Executor with a default config and a worker pool of `workers` slots
    pub fn new(default_config: ResilienceConfig, workers: usize) -> Self {
        Self {
            default_config,
            configs: HashMap::new(),
            breakers: CircuitBreakerRegistry::new(),
            workers: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Register a config for a specific key
    pub fn with_config(mut self, key: impl Into<String>, config: ResilienceConfig) -> Self {
        self.configs.insert(key.into(), config);
        self
    }

    /// Config in effect for `key`
    pub fn config_for(&self, key: &str) -> &ResilienceConfig {
        self.configs.get(key).unwrap_or(&self.default_config)
    }

    /// Breaker snapshot for `key`, if it has been used
    pub fn breaker_state(&self, key: &str) -> Option<CircuitBreakerState> {
        self.breakers.get(key).map(|breaker| breaker.snapshot())
    }

    /// Run `operation` under the resilience policy for `key`.
    ///
    /// `operation` is called once per attempt to produce a fresh future.
    pub async fn execute<T, F, Fut>(&self, key: &str, operation: F) -> Result<T, ResilienceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let config = self.config_for(key);
        let breaker = self.breakers.get_or_create(
            key,
            config.circuit_failure_threshold,
            config.circuit_reset_interval(),
        );
        let max_attempts = config.max_attempts.max(1);
        let mut last_failure = None;

        for attempt in 1..=max_attempts {
            if !breaker.try_acquire() {
                warn!(key, attempt, "Circuit open, rejecting call");
                return Err(ResilienceError::CircuitOpen {
                    key: key.to_string(),
                });
            }

            match self.run_attempt(operation(), config.timeout()).await {
                Ok(value) => {
                    breaker.record_success();
                    debug!(key, attempt, "Call succeeded");
                    return Ok(value);
                }
                Err(failure) => {
                    breaker.record_failure();
                    match &failure {
                        AttemptFailure::Timeout => {
                            warn!(key, attempt, timeout = ?config.timeout(), "Attempt timed out")
                        }
                        AttemptFailure::Error(e) => {
                            warn!(key, attempt, error = %e, "Attempt failed")
                        }
                    }
                    last_failure = Some(failure);
                }
            }

            if breaker.snapshot().state == CircuitState::Open {
                warn!(key, attempt, "Circuit opened, abandoning retries");
                return Err(Self::give_up(key, config, attempt, last_failure));
            }

            if attempt < max_attempts {
                let delay = config.backoff_for_attempt(attempt);
                debug!(key, attempt, delay = ?delay, "Backing off before retry");
                tokio::time::sleep(delay).await;
            }
        }

        Err(Self::give_up(key, config, max_attempts, last_failure))
    }

    fn give_up(
        key: &str,
        config: &ResilienceConfig,
        attempts: u32,
        last_failure: Option<AttemptFailure>,
    ) -> ResilienceError {
        match last_failure {
            Some(AttemptFailure::Error(source)) => ResilienceError::Exhausted {
                key: key.to_string(),
                attempts,
                source,
            },
            _ => ResilienceError::Timeout {
                key: key.to_string(),
                timeout: config.timeout(),
                attempts,
            },
        }
    }

    async fn run_attempt<T, Fut>(&self, future: Fut, timeout: Duration) -> Result<T, AttemptFailure>
    where
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        // Waiting for a worker counts against the attempt's timeout
        let workers = self.workers.clone();
        let attempt = async move {
            let permit = workers
                .acquire_owned()
                .await
                .map_err(|e| AttemptFailure::Error(anyhow::anyhow!("Worker pool closed: {}", e)))?;
            let handle = tokio::spawn(async move {
                let _permit = permit;
                future.await
            });
            Ok::<_, AttemptFailure>(handle.await)
        };

        match tokio::time::timeout(timeout, attempt).await {
            Err(_) => Err(AttemptFailure::Timeout),
            Ok(Err(failure)) => Err(failure),
            Ok(Ok(Err(join_error))) => Err(AttemptFailure::Error(anyhow::anyhow!(
                "Attempt task failed: {}",
                join_error
            ))),
            Ok(Ok(Ok(result))) => result.map_err(AttemptFailure::Error),
        }
    }
}
