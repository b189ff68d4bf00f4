//! Resilience Integration Tests
//!
//! Tests for retry, backoff, timeout and circuit breaking. Time is paused so
//! backoff and cooldown periods elapse instantly.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use toolgate::core::{CircuitBreaker, CircuitState, ResilienceConfig, ResilienceError, ResilienceExecutor};

fn config(max_attempts: u32, threshold: u32) -> ResilienceConfig {
    ResilienceConfig {
        timeout_ms: 1_000,
        max_attempts,
        backoff_base_ms: 100,
        circuit_failure_threshold: threshold,
        circuit_reset_interval_ms: 5_000,
    }
}

#[tokio::test(start_paused = true)]
async fn test_circuit_lifecycle_with_threshold_three() {
    let breaker = CircuitBreaker::new("search", 3, Duration::from_secs(5));

    for _ in 0..3 {
        assert!(breaker.try_acquire());
        breaker.record_failure();
    }
    assert_eq!(breaker.snapshot().state, CircuitState::Open);

    // Fourth call is rejected without running
    assert!(!breaker.try_acquire());

    tokio::time::advance(Duration::from_secs(5)).await;

    // One trial call after the cooldown, nothing else while it runs
    assert!(breaker.try_acquire());
    assert_eq!(breaker.snapshot().state, CircuitState::HalfOpen);
    assert!(!breaker.try_acquire());

    breaker.record_success();
    let state = breaker.snapshot();
    assert_eq!(state.state, CircuitState::Closed);
    assert_eq!(state.failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_fails_twice_then_succeeds_with_two_backoffs() {
    let executor = ResilienceExecutor::new(config(3, 5), 4);
    let calls = Arc::new(AtomicU32::new(0));

    let start = tokio::time::Instant::now();
    let counter = calls.clone();
    let result = executor
        .execute("summarize", move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    anyhow::bail!("transient failure {}", n);
                }
                Ok(n)
            }
        })
        .await
        .unwrap();

    assert_eq!(result, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // 1 × 100ms + 2 × 100ms
    assert_eq!(start.elapsed(), Duration::from_millis(300));

    let state = executor.breaker_state("summarize").unwrap();
    assert_eq!(state.state, CircuitState::Closed);
    assert_eq!(state.failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_rejects_without_calling() {
    let executor = ResilienceExecutor::new(config(1, 3), 4);
    let calls = Arc::new(AtomicU32::new(0));

    for _ in 0..3 {
        let counter = calls.clone();
        let result = executor
            .execute("search", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(anyhow::anyhow!("upstream unavailable"))
                }
            })
            .await;
        assert!(matches!(result, Err(ResilienceError::Exhausted { attempts: 1, .. })));
    }

    let counter = calls.clone();
    let result = executor
        .execute("search", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        })
        .await;

    assert!(matches!(result, Err(ResilienceError::CircuitOpen { ref key }) if key == "search"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Other keys have their own breaker
    let other = executor.execute("template", || async { anyhow::Ok(1) }).await;
    assert_eq!(other.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hung_attempts_time_out() {
    let executor = ResilienceExecutor::new(
        ResilienceConfig {
            timeout_ms: 50,
            ..config(2, 5)
        },
        4,
    );

    let result = executor
        .execute("file_store", || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            anyhow::Ok(())
        })
        .await;

    match result {
        Err(ResilienceError::Timeout { attempts, timeout, .. }) => {
            assert_eq!(attempts, 2);
            assert_eq!(timeout, Duration::from_millis(50));
        }
        other => panic!("expected Timeout, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test(start_paused = true)]
async fn test_saturated_pool_times_out_instead_of_blocking() {
    let executor = ResilienceExecutor::new(
        ResilienceConfig {
            timeout_ms: 50,
            ..config(1, 5)
        },
        2,
    );

    // Each hung attempt keeps its worker after timing out
    for _ in 0..2 {
        let result = executor
            .execute("slow", std::future::pending::<anyhow::Result<()>>)
            .await;
        assert!(matches!(result, Err(ResilienceError::Timeout { .. })));
    }

    let result = tokio::time::timeout(
        Duration::from_secs(3600),
        executor.execute("fast", || async { anyhow::Ok(42) }),
    )
    .await
    .expect("call on another key must not wait forever for a worker");

    match result {
        Err(ResilienceError::Timeout { key, attempts, .. }) => {
            assert_eq!(key, "fast");
            assert_eq!(attempts, 1);
        }
        other => panic!("expected Timeout, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_breaker_trip_keeps_cause_and_skips_backoff() {
    let executor = ResilienceExecutor::new(config(5, 2), 4);
    let calls = Arc::new(AtomicU32::new(0));

    let start = tokio::time::Instant::now();
    let counter = calls.clone();
    let result = executor
        .execute("k", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow::anyhow!("disk full"))
            }
        })
        .await;

    match result {
        Err(ResilienceError::Exhausted { attempts, source, .. }) => {
            assert_eq!(attempts, 2);
            assert!(source.to_string().contains("disk full"));
        }
        other => panic!("expected Exhausted, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(start.elapsed(), Duration::from_millis(100));
    assert_eq!(executor.breaker_state("k").unwrap().state, CircuitState::Open);
}
