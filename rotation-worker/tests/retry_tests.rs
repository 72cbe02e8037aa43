//! Retry Logic Unit Tests

use rotation_worker::retry::{retry_with_backoff, RetryConfig};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_retry_config_default() {
    let config = RetryConfig::default();
    assert_eq!(config.max_retries, 2);
    assert_eq!(config.max_attempts(), 3);
    assert_eq!(config.initial_delay_ms, 500);
    assert_eq!(config.multiplier, 2.0);
}

#[test]
fn test_retry_config_with_attempts() {
    let config = RetryConfig::with_attempts(3, 250);

    assert_eq!(config.max_retries, 2);
    assert_eq!(config.initial_delay_ms, 250);
    assert_eq!(config.delay_for_attempt(2), Duration::from_millis(500));
}

#[test]
fn test_single_attempt_never_retries() {
    let config = RetryConfig::with_attempts(0, 100);
    assert_eq!(config.max_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_waits_between_attempts() {
    let config = RetryConfig::new(2, 1_000, 10_000, 2.0);
    let calls = Arc::new(AtomicU32::new(0));
    let started = tokio::time::Instant::now();

    let counter = calls.clone();
    let result = retry_with_backoff(&config, move || {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), String>("connection reset".to_string())
        })
    })
    .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // 1s after the first failure, 2s after the second
    assert!(started.elapsed() >= Duration::from_millis(3_000));
}
