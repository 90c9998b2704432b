//! Shared state store trait definition.
//!
//! [`StateStore`] is the seam between the admission core and the networked
//! key-value store that holds identity records and the durable cache tier.
//! The surface is deliberately small: field maps, strings, an atomic field
//! increment, TTLs, a liveness probe, and one compound atomic operation for
//! the daily quota.
//!
//! | Method | Redis equivalent |
//! |--------|------------------|
//! | [`get_fields`](StateStore::get_fields) | `HGETALL` |
//! | [`set_fields`](StateStore::set_fields) | `HSET` (+ `PEXPIRE`) |
//! | [`increment_field`](StateStore::increment_field) | `HINCRBY` |
//! | [`get`](StateStore::get) | `GET` |
//! | [`set_with_ttl`](StateStore::set_with_ttl) | `SET .. PX` |
//! | [`ping`](StateStore::ping) | `PING` |
//! | [`consume_daily_quota`](StateStore::consume_daily_quota) | Lua script |
//!
//! The trait is object safe; the admission core holds an
//! `Arc<dyn StateStore>` and never locks around it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    error::StoreResult,
    types::{FieldMap, QuotaDecision},
};

/// Abstract shared state store.
///
/// Implementations must be `Send + Sync` and safe for unbounded concurrent
/// use. All coordination between concurrent callers is delegated to the
/// store's own atomic operations.
///
/// # Example
///
/// ```
/// use admission_storage::{MemoryStore, StateStore};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = MemoryStore::new();
/// store.set_with_ttl("greeting", "hello", std::time::Duration::from_secs(60)).await.unwrap();
/// assert_eq!(store.get("greeting").await.unwrap().as_deref(), Some("hello"));
/// # });
/// ```
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns every field stored under `key`.
    ///
    /// An absent (or expired) key yields an empty map, mirroring `HGETALL`.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn get_fields(&self, key: &str) -> StoreResult<FieldMap>;

    /// Writes `fields` under `key`, merging with existing fields.
    ///
    /// With `ttl: Some(..)` the whole key expires after the duration; with
    /// `None` any existing expiry is left untouched.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn set_fields(&self, key: &str, fields: FieldMap, ttl: Option<Duration>)
    -> StoreResult<()>;

    /// Atomically adds `delta` to an integer field and returns the new value.
    ///
    /// A missing field counts as zero. A non-integer field fails with
    /// [`StoreError::Serialization`](crate::StoreError::Serialization).
    #[must_use = "store operations may fail and errors must be handled"]
    async fn increment_field(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64>;

    /// Returns the string stored under `key`, if any.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Stores a string that expires after `ttl`, overwriting any previous
    /// value.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Liveness probe.
    #[must_use = "liveness results must be inspected"]
    async fn ping(&self) -> StoreResult<()>;

    /// Atomically applies the daily quota rule to the record under `key`.
    ///
    /// In one indivisible step:
    ///
    /// 1. if no record exists, return [`QuotaDecision::Missing`];
    /// 2. if the record's `last_reset` differs from `today`, set `requests_today` to `0` and
    ///    `last_reset` to `today`;
    /// 3. if `requests_today >= daily_limit`, return [`QuotaDecision::Exhausted`] without
    ///    incrementing;
    /// 4. otherwise increment `requests_today` and return [`QuotaDecision::Admitted`] with the
    ///    post-increment value.
    ///
    /// Concurrent callers for the same key observe these steps serially, so
    /// a day-boundary reset can neither be lost nor applied twice.
    #[must_use = "quota decisions must be inspected"]
    async fn consume_daily_quota(&self, key: &str, today: NaiveDate)
    -> StoreResult<QuotaDecision>;
}
