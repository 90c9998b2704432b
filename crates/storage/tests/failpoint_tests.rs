#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection.
//!
//! The `fail` dev-dependency enables the `failpoints` feature for test
//! builds, so the injection sites are live here.

use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use admission_storage::{RetryConfig, StoreError, with_retry};

fn config() -> RetryConfig {
    RetryConfig::builder()
        .max_retries(5)
        .initial_backoff(Duration::from_millis(1))
        .max_backoff(Duration::from_millis(2))
        .build()
        .expect("valid retry config")
}

#[tokio::test]
async fn retry_failpoint_aborts_before_sleeping() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("retry-before-sleep", "return").expect("failed to configure fail point");

    let calls = AtomicU32::new(0);
    let result: Result<(), StoreError> = with_retry(&config(), "connect", || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(StoreError::connection("refused")) }
    })
    .await;

    assert!(matches!(result, Err(StoreError::Connection { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1, "no retry once the fail point fires");

    scenario.teardown();
}

#[tokio::test]
async fn retry_without_failpoint_keeps_retrying() {
    let scenario = fail::FailScenario::setup();

    let calls = AtomicU32::new(0);
    let result: Result<(), StoreError> = with_retry(&config(), "connect", || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(StoreError::connection("refused")) }
    })
    .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 6);

    scenario.teardown();
}
