//! Tests for circuit breaker functionality

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;

use super::*;
use crate::telemetry::InMemoryMetrics;

fn breaker(max_failures: u32, open_timeout_ms: u64, trials: u32) -> CircuitBreaker {
    CircuitBreaker::new(
        "docs",
        CircuitBreakerConfig::new(
            max_failures,
            Duration::from_millis(open_timeout_ms),
            trials,
        ),
    )
    .unwrap()
}

async fn fail(cb: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
    cb.call(|| async { Err::<(), _>("boom") }).await
}

async fn succeed(cb: &CircuitBreaker) -> Result<u32, CircuitBreakerError<&'static str>> {
    cb.call(|| async { Ok::<_, &'static str>(7) }).await
}

#[tokio::test]
async fn test_circuit_starts_closed() {
    let cb = breaker(3, 100, 1);
    assert_eq!(cb.state(), CircuitState::Closed);
    assert_eq!(succeed(&cb).await.unwrap(), 7);
    assert_eq!(cb.stats().total_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_half_open_closed_cycle() {
    let cb = breaker(3, 100, 1);
    let invocations = AtomicU32::new(0);

    for _ in 0..3 {
        let result = cb
            .call(|| {
                invocations.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("down") }
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::OperationFailed("down"))));
    }
    assert_eq!(cb.state(), CircuitState::Open);

    // Rejected without running the operation
    let rejected = cb
        .call(|| {
            invocations.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, &'static str>(()) }
        })
        .await;
    assert!(matches!(
        rejected,
        Err(CircuitBreakerError::Open {
            state: CircuitState::Open,
            ..
        })
    ));
    assert_eq!(invocations.load(Ordering::SeqCst), 3);

    tokio::time::advance(Duration::from_millis(100)).await;

    assert_eq!(succeed(&cb).await.unwrap(), 7);
    assert_eq!(cb.state(), CircuitState::Closed);
    assert_eq!(cb.stats().failure_count, 0);
}

#[tokio::test]
async fn test_success_resets_failure_count() {
    let cb = breaker(3, 100, 1);
    fail(&cb).await.unwrap_err();
    fail(&cb).await.unwrap_err();
    succeed(&cb).await.unwrap();
    fail(&cb).await.unwrap_err();
    fail(&cb).await.unwrap_err();

    assert_eq!(cb.state(), CircuitState::Closed);
    assert_eq!(cb.stats().failure_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens() {
    let cb = breaker(1, 50, 2);
    fail(&cb).await.unwrap_err();
    assert_eq!(cb.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_millis(50)).await;
    assert_eq!(cb.state(), CircuitState::HalfOpen);

    succeed(&cb).await.unwrap();
    assert_eq!(cb.state(), CircuitState::HalfOpen);
    assert_eq!(cb.stats().half_open_successes, 1);

    fail(&cb).await.unwrap_err();
    assert_eq!(cb.state(), CircuitState::Open);
    assert_eq!(cb.stats().half_open_successes, 0);
}

#[tokio::test(start_paused = true)]
async fn test_open_timeout_counts_from_last_failure() {
    let cb = breaker(1, 100, 1);
    cb.record_failure();

    tokio::time::advance(Duration::from_millis(80)).await;
    cb.record_failure();

    tokio::time::advance(Duration::from_millis(30)).await;
    assert_eq!(cb.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_millis(70)).await;
    assert_eq!(cb.state(), CircuitState::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn test_open_rejection_reports_remaining_time() {
    let cb = breaker(1, 100, 1);
    fail(&cb).await.unwrap_err();

    tokio::time::advance(Duration::from_millis(40)).await;

    match succeed(&cb).await {
        Err(CircuitBreakerError::Open {
            name, retry_after, ..
        }) => {
            assert_eq!(name, "docs");
            assert_eq!(retry_after, Some(Duration::from_millis(60)));
        }
        other => panic!("expected open rejection, got {:?}", other),
    }
    assert_eq!(cb.stats().total_rejections, 1);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_limits_concurrent_trials() {
    let cb = Arc::new(breaker(1, 10, 1));
    fail(&cb).await.unwrap_err();
    tokio::time::advance(Duration::from_millis(10)).await;

    let (started_tx, started_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let trial = {
        let cb = cb.clone();
        tokio::spawn(async move {
            cb.call(|| async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                Ok::<_, &'static str>(())
            })
            .await
        })
    };
    started_rx.await.unwrap();

    // The only trial slot is taken
    let second = succeed(&cb).await;
    assert!(matches!(
        second,
        Err(CircuitBreakerError::Open {
            state: CircuitState::HalfOpen,
            retry_after: None,
            ..
        })
    ));

    release_tx.send(()).unwrap();
    trial.await.unwrap().unwrap();
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_trial_releases_slot() {
    let cb = breaker(1, 10, 1);
    fail(&cb).await.unwrap_err();
    tokio::time::advance(Duration::from_millis(10)).await;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(5),
        cb.call(|| std::future::pending::<Result<(), &'static str>>()),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(cb.state(), CircuitState::HalfOpen);

    succeed(&cb).await.unwrap();
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_late_result_from_previous_phase_is_ignored() {
    let cb = Arc::new(breaker(3, 60_000, 1));
    let (started_tx, started_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let slow = {
        let cb = cb.clone();
        tokio::spawn(async move {
            cb.call(|| async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                Ok::<_, &'static str>(())
            })
            .await
        })
    };
    started_rx.await.unwrap();

    cb.trip();
    release_tx.send(()).unwrap();
    slow.await.unwrap().unwrap();

    assert_eq!(cb.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_slow_failure_while_open_extends_timeout() {
    let cb = Arc::new(breaker(1, 100, 1));
    let (started_tx, started_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let slow = {
        let cb = cb.clone();
        tokio::spawn(async move {
            cb.call(|| async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                Err::<(), _>("slow")
            })
            .await
        })
    };
    started_rx.await.unwrap();

    fail(&cb).await.unwrap_err();
    assert_eq!(cb.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_millis(80)).await;
    release_tx.send(()).unwrap();
    assert!(matches!(
        slow.await.unwrap(),
        Err(CircuitBreakerError::OperationFailed("slow"))
    ));

    tokio::time::advance(Duration::from_millis(40)).await;
    assert_eq!(cb.state(), CircuitState::Open);
    assert_eq!(cb.stats().since_last_failure, Some(Duration::from_millis(40)));
    assert_eq!(cb.stats().total_failures, 2);

    tokio::time::advance(Duration::from_millis(60)).await;
    assert_eq!(cb.state(), CircuitState::HalfOpen);
}

#[tokio::test]
async fn test_record_success_while_open_closes() {
    let cb = breaker(1, 60_000, 1);
    cb.record_failure();
    assert_eq!(cb.state(), CircuitState::Open);

    cb.record_success();
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_reset_and_trip() {
    let cb = breaker(5, 60_000, 1);
    cb.trip();
    assert_eq!(cb.state(), CircuitState::Open);
    assert!(fail(&cb).await.unwrap_err().is_open());

    cb.reset();
    assert_eq!(cb.state(), CircuitState::Closed);
    assert!(cb.stats().since_last_failure.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_metrics_receive_transitions() {
    let metrics = Arc::new(InMemoryMetrics::new());
    let cb = breaker(1, 20, 1).with_metrics(metrics.clone());

    fail(&cb).await.unwrap_err();
    succeed(&cb).await.unwrap_err();
    tokio::time::advance(Duration::from_millis(20)).await;
    succeed(&cb).await.unwrap();

    assert_eq!(metrics.circuit_transitions("docs", CircuitState::Open), 1);
    assert_eq!(metrics.circuit_transitions("docs", CircuitState::HalfOpen), 1);
    assert_eq!(metrics.circuit_transitions("docs", CircuitState::Closed), 1);
    assert_eq!(metrics.circuit_rejections("docs"), 1);
}

#[test]
fn test_invalid_config_rejected() {
    assert!(CircuitBreaker::new("", CircuitBreakerConfig::default()).is_err());
    assert!(CircuitBreaker::new("docs", CircuitBreakerConfig::new(0, Duration::from_secs(1), 1)).is_err());
    assert!(CircuitBreaker::new("docs", CircuitBreakerConfig::new(1, Duration::ZERO, 1)).is_err());
    assert!(CircuitBreaker::new("docs", CircuitBreakerConfig::new(1, Duration::from_secs(1), 0)).is_err());
}

#[test]
fn test_config_presets_are_valid() {
    assert!(CircuitBreakerConfig::default().validate().is_ok());
    assert!(CircuitBreakerConfig::aggressive().validate().is_ok());
    assert!(CircuitBreakerConfig::lenient().validate().is_ok());
    assert!(CircuitBreakerConfig::aggressive().max_failures < CircuitBreakerConfig::lenient().max_failures);
}

#[test]
fn test_config_deserializes_humantime() {
    let config: CircuitBreakerConfig =
        serde_json::from_str(r#"{"max_failures": 3, "open_timeout": "100ms"}"#).unwrap();
    assert_eq!(config.max_failures, 3);
    assert_eq!(config.open_timeout, Duration::from_millis(100));
    assert_eq!(config.max_half_open_trials, 3);
}

#[test]
fn test_error_display() {
    let open: CircuitBreakerError<&str> = CircuitBreakerError::Open {
        name: "docs".into(),
        state: CircuitState::Open,
        retry_after: None,
    };
    assert_eq!(open.to_string(), "Circuit breaker 'docs' is open");

    let failed: CircuitBreakerError<&str> = CircuitBreakerError::OperationFailed("boom");
    assert_eq!(failed.to_string(), "Operation failed: boom");
}

#[test]
fn test_registry_shares_breakers() {
    let registry = CircuitBreakerRegistry::new();
    let a = registry.get("review").unwrap();
    let b = registry.get("review").unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    let custom = registry
        .get_with_config("docs", &CircuitBreakerConfig::aggressive())
        .unwrap();
    assert_eq!(custom.config().max_failures, 3);

    // First config wins
    let again = registry
        .get_with_config("docs", &CircuitBreakerConfig::lenient())
        .unwrap();
    assert_eq!(again.config().max_failures, 3);

    assert_eq!(registry.names(), vec!["docs".to_string(), "review".to_string()]);
    assert!(registry.get("  ").is_err());
    assert!(registry.find("missing").is_none());
}

#[test]
fn test_registry_stats_and_reset() {
    let registry = CircuitBreakerRegistry::with_config(CircuitBreakerConfig::new(
        1,
        Duration::from_secs(60),
        1,
    ))
    .unwrap();
    registry.get("b").unwrap().record_failure();
    registry.get("a").unwrap();

    let stats = registry.all_stats();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].name, "a");
    assert_eq!(stats[1].state, CircuitState::Open);

    registry.reset_all();
    assert!(registry
        .all_stats()
        .iter()
        .all(|s| s.state == CircuitState::Closed));
}
