//! Per-key circuit breakers.
//!
//! A breaker stops calls to a dependency that keeps failing until a cooldown
//! has elapsed, then lets exactly one trial call through.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Failure threshold reached - requests fail fast
    Open,
    /// Cooldown elapsed - one trial request allowed
    HalfOpen,
}

/// Snapshot of a breaker's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub failure_count: u32,
    pub threshold: u32,
    pub reset_interval: Duration,
    pub opened_at: Option<Instant>,
}

#[derive(Debug)]
struct Counters {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    trial_granted: bool,
}

/// Circuit breaker for a single key
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    reset_interval: Duration,
    counters: Mutex<Counters>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, threshold: u32, reset_interval: Duration) -> Self {
        Self {
            name: name.into(),
            threshold: threshold.max(1),
            reset_interval,
            counters: Mutex::new(Counters {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                trial_granted: false,
            }),
        }
    }

    /// Ask for admission. Returns false while open, and for every request
    /// after the first one in a half-open window.
    pub fn try_acquire(&self) -> bool {
        let mut counters = self.lock();

        match counters.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = counters
                    .opened_at
                    .map(|opened| opened.elapsed() >= self.reset_interval)
                    .unwrap_or(true);

                if cooled_down {
                    info!(breaker = %self.name, "Circuit breaker half-open, allowing trial call");
                    counters.state = CircuitState::HalfOpen;
                    counters.trial_granted = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if counters.trial_granted {
                    false
                } else {
                    counters.trial_granted = true;
                    true
                }
            }
        }
    }

    /// Record a successful call: close the circuit and zero the counter
    pub fn record_success(&self) {
        let mut counters = self.lock();

        if counters.state != CircuitState::Closed {
            info!(breaker = %self.name, "Circuit breaker closed, dependency recovered");
        }

        counters.state = CircuitState::Closed;
        counters.failure_count = 0;
        counters.opened_at = None;
        counters.trial_granted = false;
    }

    /// Record a failed or timed-out call
    pub fn record_failure(&self) {
        let mut counters = self.lock();
        counters.failure_count = counters.failure_count.saturating_add(1);

        match counters.state {
            CircuitState::Closed => {
                if counters.failure_count >= self.threshold {
                    warn!(
                        breaker = %self.name,
                        failures = counters.failure_count,
                        "Circuit breaker opened"
                    );
                    counters.state = CircuitState::Open;
                    counters.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "Trial call failed, circuit breaker re-opened");
                counters.state = CircuitState::Open;
                counters.opened_at = Some(Instant::now());
                counters.trial_granted = false;
            }
            CircuitState::Open => {}
        }
    }

    /// Current state and counters
    pub fn snapshot(&self) -> CircuitBreakerState {
        let counters = self.lock();
        CircuitBreakerState {
            state: counters.state,
            failure_count: counters.failure_count,
            threshold: self.threshold,
            reset_interval: self.reset_interval,
            opened_at: counters.opened_at,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Lazily populated breakers keyed by tool or service name.
///
/// Entries are never removed.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the breaker for `key`, creating it with the given settings on first use
    pub fn get_or_create(&self, key: &str, threshold: u32, reset_interval: Duration) -> Arc<CircuitBreaker> {
        let mut breakers = self.lock();
        breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key, threshold, reset_interval)))
            .clone()
    }

    /// Get the breaker for `key` if one exists
    pub fn get(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_lifecycle() {
        let cb = CircuitBreaker::new("search", 3, Duration::from_secs(30));

        assert_eq!(cb.snapshot().state, CircuitState::Closed);
        assert!(cb.try_acquire());

        for _ in 0..3 {
            cb.record_failure();
        }

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.failure_count, 3);
        assert!(snapshot.opened_at.is_some());
        assert!(!cb.try_acquire());

        tokio::time::advance(Duration::from_secs(31)).await;

        // exactly one trial in the half-open window
        assert!(cb.try_acquire());
        assert_eq!(cb.snapshot().state, CircuitState::HalfOpen);
        assert!(!cb.try_acquire());

        cb.record_success();
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert!(cb.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("search", 2, Duration::from_secs(10));
        cb.record_failure();
        cb.record_failure();
        let first_opened = cb.snapshot().opened_at.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cb.try_acquire());

        cb.record_failure();
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert!(snapshot.opened_at.unwrap() > first_opened);
        assert!(!cb.try_acquire());
    }

    #[test]
    fn test_success_resets_below_threshold() {
        let cb = CircuitBreaker::new("summarize", 3, Duration::from_secs(1));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 1);
    }

    #[test]
    fn test_registry_reuses_breakers() {
        let registry = CircuitBreakerRegistry::new();

        let cb1 = registry.get_or_create("search", 3, Duration::from_secs(1));
        let cb2 = registry.get_or_create("search", 9, Duration::from_secs(9));
        let cb3 = registry.get_or_create("template", 3, Duration::from_secs(1));

        assert!(Arc::ptr_eq(&cb1, &cb2));
        assert!(!Arc::ptr_eq(&cb1, &cb3));
        assert_eq!(registry.len(), 2);
        assert_eq!(cb2.snapshot().threshold, 3);
    }
}
