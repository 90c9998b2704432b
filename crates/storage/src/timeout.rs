//! Deadline enforcement for store operations.
//!
//! [`TimeoutStore`] wraps any [`StateStore`] and bounds every call with
//! [`tokio::time::timeout`]. An elapsed deadline surfaces as
//! [`StoreError::Timeout`], which callers treat like any other transient
//! store failure: the quota ledger reports the store as unavailable and the
//! response cache records a miss. Nothing in the admission core waits on the
//! store without a bound.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use admission_storage::{MemoryStore, StateStore, TimeoutStore};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = TimeoutStore::new(MemoryStore::new(), Duration::from_millis(250));
//! store.ping().await.unwrap();
//! # });
//! ```

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    backend::StateStore,
    error::{StoreError, StoreResult},
    types::{FieldMap, QuotaDecision},
};

/// Default per-operation deadline.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(2);

/// A [`StateStore`] wrapper that applies a fixed deadline to every call.
#[derive(Debug, Clone)]
pub struct TimeoutStore<S> {
    inner: S,
    deadline: Duration,
}

impl<S: StateStore> TimeoutStore<S> {
    /// Wraps `inner`, bounding each operation by `deadline`.
    pub fn new(inner: S, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns the configured deadline.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = StoreResult<T>> + Send,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_elapsed) => {
                tracing::warn!(
                    operation,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "store operation timed out"
                );
                Err(StoreError::timeout(self.deadline))
            },
        }
    }
}

#[async_trait]
impl<S: StateStore> StateStore for TimeoutStore<S> {
    async fn get_fields(&self, key: &str) -> StoreResult<FieldMap> {
        self.bounded("get_fields", self.inner.get_fields(key)).await
    }

    async fn set_fields(
        &self,
        key: &str,
        fields: FieldMap,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        self.bounded("set_fields", self.inner.set_fields(key, fields, ttl)).await
    }

    async fn increment_field(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        self.bounded("increment_field", self.inner.increment_field(key, field, delta)).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.bounded("get", self.inner.get(key)).await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.bounded("set_with_ttl", self.inner.set_with_ttl(key, value, ttl)).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.bounded("ping", self.inner.ping()).await
    }

    async fn consume_daily_quota(
        &self,
        key: &str,
        today: NaiveDate,
    ) -> StoreResult<QuotaDecision> {
        self.bounded("consume_daily_quota", self.inner.consume_daily_quota(key, today)).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{MemoryStore, testutil::StallingStore};

    #[tokio::test]
    async fn test_fast_operations_pass_through() {
        let store = TimeoutStore::new(MemoryStore::new(), Duration::from_secs(1));
        store.set_with_ttl("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_operation_times_out() {
        let store = TimeoutStore::new(StallingStore::new(), Duration::from_millis(50));
        let err = store.get("k").await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout { elapsed_ms: 50 }));
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_quota_times_out() {
        let store = TimeoutStore::new(StallingStore::new(), Duration::from_millis(10));
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let err = store.consume_daily_quota("k", today).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout { .. }));
    }
}
