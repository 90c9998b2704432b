//! Shared test utilities for state store testing.
//!
//! Store wrappers that stall, fail on demand, or count calls, plus helpers
//! for building quota records. Feature-gated behind `testutil` so nothing
//! here leaks into production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! admission-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use admission_storage::testutil::{CountingStore, FailingStore, quota_record};
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    backend::StateStore,
    error::{StoreError, StoreResult},
    memory::MemoryStore,
    types::{
        FIELD_DAILY_LIMIT, FIELD_LAST_RESET, FIELD_REQUESTS_TODAY, FieldMap, QuotaDecision,
        format_reset_date,
    },
};

/// Builds a quota-bearing record with the three bookkeeping fields set.
#[must_use]
pub fn quota_record(daily_limit: u64, requests_today: u64, last_reset: NaiveDate) -> FieldMap {
    let mut fields = FieldMap::new();
    fields.insert(FIELD_DAILY_LIMIT.to_owned(), daily_limit.to_string());
    fields.insert(FIELD_REQUESTS_TODAY.to_owned(), requests_today.to_string());
    fields.insert(FIELD_LAST_RESET.to_owned(), format_reset_date(last_reset));
    fields
}

/// Creates a [`MemoryStore`] holding one quota record under `key`.
///
/// # Panics
///
/// Panics if the write fails (should not happen with `MemoryStore`).
pub async fn store_with_record(
    key: &str,
    daily_limit: u64,
    requests_today: u64,
    last_reset: NaiveDate,
) -> MemoryStore {
    let store = MemoryStore::new();
    store
        .set_fields(key, quota_record(daily_limit, requests_today, last_reset), None)
        .await
        .expect("populate record failed");
    store
}

/// Assert that a [`StoreResult`](crate::StoreResult) is `Ok` and return the
/// inner value.
#[macro_export]
macro_rules! assert_store_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StoreError: {e:?}"),
        }
    };
}

/// A store whose operations never complete.
///
/// Use with [`TimeoutStore`](crate::TimeoutStore) and a paused clock to
/// exercise deadline handling.
#[derive(Debug, Clone, Default)]
pub struct StallingStore;

impl StallingStore {
    /// Creates a stalling store.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StateStore for StallingStore {
    async fn get_fields(&self, _key: &str) -> StoreResult<FieldMap> {
        std::future::pending().await
    }

    async fn set_fields(
        &self,
        _key: &str,
        _fields: FieldMap,
        _ttl: Option<Duration>,
    ) -> StoreResult<()> {
        std::future::pending().await
    }

    async fn increment_field(&self, _key: &str, _field: &str, _delta: i64) -> StoreResult<i64> {
        std::future::pending().await
    }

    async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        std::future::pending().await
    }

    async fn set_with_ttl(&self, _key: &str, _value: &str, _ttl: Duration) -> StoreResult<()> {
        std::future::pending().await
    }

    async fn ping(&self) -> StoreResult<()> {
        std::future::pending().await
    }

    async fn consume_daily_quota(
        &self,
        _key: &str,
        _today: NaiveDate,
    ) -> StoreResult<QuotaDecision> {
        std::future::pending().await
    }
}

/// Wraps a store and fails selected operations with a connection error
/// while a switch is on.
///
/// Reads (`get_fields`, `get`), writes (`set_fields`, `set_with_ttl`,
/// `increment_field`) and the quota step can be switched independently so
/// tests can model "record lookup works, quota step fails".
#[derive(Clone)]
pub struct FailingStore<S> {
    inner: S,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    fail_quota: Arc<AtomicBool>,
}

impl<S: StateStore> FailingStore<S> {
    /// Wraps `inner` with every switch off.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_reads: Arc::new(AtomicBool::new(false)),
            fail_writes: Arc::new(AtomicBool::new(false)),
            fail_quota: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Turns every switch on or off at once.
    pub fn set_failing(&self, failing: bool) {
        self.fail_reads.store(failing, Ordering::SeqCst);
        self.fail_writes.store(failing, Ordering::SeqCst);
        self.fail_quota.store(failing, Ordering::SeqCst);
    }

    /// Fails `get_fields`, `get` and `ping`.
    pub fn fail_reads(&self, failing: bool) {
        self.fail_reads.store(failing, Ordering::SeqCst);
    }

    /// Fails `set_fields`, `set_with_ttl` and `increment_field`.
    pub fn fail_writes(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    /// Fails `consume_daily_quota`.
    pub fn fail_quota(&self, failing: bool) {
        self.fail_quota.store(failing, Ordering::SeqCst);
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn check(switch: &AtomicBool) -> StoreResult<()> {
        if switch.load(Ordering::SeqCst) {
            Err(StoreError::connection("injected store failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<S: StateStore> StateStore for FailingStore<S> {
    async fn get_fields(&self, key: &str) -> StoreResult<FieldMap> {
        Self::check(&self.fail_reads)?;
        self.inner.get_fields(key).await
    }

    async fn set_fields(
        &self,
        key: &str,
        fields: FieldMap,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        Self::check(&self.fail_writes)?;
        self.inner.set_fields(key, fields, ttl).await
    }

    async fn increment_field(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        Self::check(&self.fail_writes)?;
        self.inner.increment_field(key, field, delta).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Self::check(&self.fail_reads)?;
        self.inner.get(key).await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        Self::check(&self.fail_writes)?;
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn ping(&self) -> StoreResult<()> {
        Self::check(&self.fail_reads)?;
        self.inner.ping().await
    }

    async fn consume_daily_quota(
        &self,
        key: &str,
        today: NaiveDate,
    ) -> StoreResult<QuotaDecision> {
        Self::check(&self.fail_quota)?;
        self.inner.consume_daily_quota(key, today).await
    }
}

/// Wraps a store and counts every call that reaches it.
#[derive(Clone)]
pub struct CountingStore<S> {
    inner: S,
    reads: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
    quota_calls: Arc<AtomicUsize>,
}

impl<S: StateStore> CountingStore<S> {
    /// Wraps `inner` with zeroed counters.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            reads: Arc::new(AtomicUsize::new(0)),
            writes: Arc::new(AtomicUsize::new(0)),
            quota_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Calls to `get_fields`, `get` and `ping`.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Calls to `set_fields`, `set_with_ttl` and `increment_field`.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Calls to `consume_daily_quota`.
    pub fn quota_calls(&self) -> usize {
        self.quota_calls.load(Ordering::SeqCst)
    }

    /// Every call of any kind.
    pub fn total(&self) -> usize {
        self.reads() + self.writes() + self.quota_calls()
    }

    /// Zeroes all counters.
    pub fn reset(&self) {
        self.reads.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
        self.quota_calls.store(0, Ordering::SeqCst);
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: StateStore> StateStore for CountingStore<S> {
    async fn get_fields(&self, key: &str) -> StoreResult<FieldMap> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_fields(key).await
    }

    async fn set_fields(
        &self,
        key: &str,
        fields: FieldMap,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set_fields(key, fields, ttl).await
    }

    async fn increment_field(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.increment_field(key, field, delta).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.ping().await
    }

    async fn consume_daily_quota(
        &self,
        key: &str,
        today: NaiveDate,
    ) -> StoreResult<QuotaDecision> {
        self.quota_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.consume_daily_quota(key, today).await
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date")
    }

    #[test]
    fn test_quota_record_fields() {
        let record = quota_record(10, 3, day());
        assert_eq!(record.get(FIELD_DAILY_LIMIT).map(String::as_str), Some("10"));
        assert_eq!(record.get(FIELD_REQUESTS_TODAY).map(String::as_str), Some("3"));
        assert_eq!(record.get(FIELD_LAST_RESET).map(String::as_str), Some("2024-06-01"));
    }

    #[tokio::test]
    async fn test_failing_store_switches() {
        let store = FailingStore::new(store_with_record("k", 5, 0, day()).await);
        assert!(store.get_fields("k").await.is_ok());

        store.fail_quota(true);
        assert!(store.get_fields("k").await.is_ok());
        assert!(matches!(
            store.consume_daily_quota("k", day()).await,
            Err(StoreError::Connection { .. })
        ));

        store.set_failing(false);
        let decision = assert_store_ok!(store.consume_daily_quota("k", day()).await);
        assert_eq!(decision, QuotaDecision::Admitted { requests_today: 1, daily_limit: 5 });
    }

    #[tokio::test]
    async fn test_counting_store_counts() {
        let store = CountingStore::new(MemoryStore::new());
        store.set_with_ttl("a", "1", Duration::from_secs(5)).await.expect("set");
        store.get("a").await.expect("get");
        store.consume_daily_quota("missing", day()).await.expect("quota");
        assert_eq!((store.reads(), store.writes(), store.quota_calls()), (1, 1, 1));
        store.reset();
        assert_eq!(store.total(), 0);
    }
}
