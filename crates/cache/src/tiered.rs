//! Two-tier response cache.
//!
//! [`ResponseCache`] fronts the inference engine with:
//!
//! - **in-process tier**: a bounded [`moka::sync::Cache`] with a short TTL. Reads never suspend.
//! - **shared tier**: string entries in the [`StateStore`] under `response:{fingerprint}` with a
//!   longer TTL, shared by every process.
//!
//! Reads go local first, then shared; a shared hit is copied into the
//! in-process tier before it is returned. Writes go to both tiers, local
//! first. Shared tier failures and timeouts are logged and counted, never
//! returned: a failing read is a miss and a failing write leaves the entry
//! in-process only.
//!
//! # Single flight
//!
//! [`get_or_compute`](ResponseCache::get_or_compute) lets concurrent
//! callers that miss on the same fingerprint share one computation inside
//! this process. The plain [`lookup`](ResponseCache::lookup) /
//! [`store`](ResponseCache::store) pair does not coordinate, and concurrent
//! writers of one fingerprint settle as last writer wins.

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use admission_storage::{StateStore, StoreError, StoreResult};
use fail::fail_point;
use moka::sync::Cache;
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    config::{CacheConfig, SHARED_KEY_PREFIX},
    fingerprint::Fingerprint,
    stats::{CacheStats, CacheStatsSnapshot},
};

/// The tier that served a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// In-process tier.
    Local,
    /// Shared store tier.
    Shared,
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Shared => f.write_str("shared"),
        }
    }
}

/// A cache hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    /// The cached text.
    pub text: Arc<str>,
    /// Where it was found.
    pub tier: CacheTier,
}

/// Result of [`ResponseCache::get_or_compute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOutcome {
    /// The response text.
    pub text: Arc<str>,
    /// `Some` if served from a tier, `None` if freshly computed.
    pub tier: Option<CacheTier>,
}

impl CacheOutcome {
    /// Returns `true` if the text came from the cache.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.tier.is_some()
    }
}

impl From<CachedResponse> for CacheOutcome {
    fn from(hit: CachedResponse) -> Self {
        Self { text: hit.text, tier: Some(hit.tier) }
    }
}

type FlightMap = HashMap<Fingerprint, Arc<tokio::sync::Mutex<()>>>;

/// Deterministic two-tier response cache.
///
/// Cheaply cloneable; clones share both tiers and the counters.
#[derive(Clone)]
pub struct ResponseCache {
    local: Cache<Fingerprint, Arc<str>>,
    shared: Option<Arc<dyn StateStore>>,
    config: CacheConfig,
    stats: Arc<CacheStats>,
    in_flight: Arc<Mutex<FlightMap>>,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("config", &self.config)
            .field("shared", &self.shared.is_some())
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl ResponseCache {
    /// Creates a cache. Without a `shared` store only the in-process tier
    /// is used.
    #[builder]
    pub fn new(#[builder(default)] config: CacheConfig, shared: Option<Arc<dyn StateStore>>) -> Self {
        let local = Cache::builder()
            .max_capacity(config.local_capacity())
            .time_to_live(config.local_ttl())
            .build();
        Self {
            local,
            shared,
            config,
            stats: Arc::new(CacheStats::default()),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Looks `fingerprint` up in the in-process tier, then the shared tier.
    ///
    /// Shared tier errors and timeouts are reported as a miss.
    #[tracing::instrument(skip_all, fields(fingerprint = %fingerprint))]
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Option<CachedResponse> {
        if let Some(text) = self.local.get(fingerprint) {
            self.stats.record_local_hit();
            tracing::debug!("in-process cache hit");
            return Some(CachedResponse { text, tier: CacheTier::Local });
        }

        let Some(shared) = self.shared.as_deref() else {
            self.stats.record_miss();
            return None;
        };

        match self.shared_get(shared, fingerprint).await {
            Ok(Some(value)) => {
                let text: Arc<str> = Arc::from(value);
                self.local.insert(fingerprint.clone(), Arc::clone(&text));
                self.stats.record_shared_hit();
                tracing::debug!("shared cache hit");
                Some(CachedResponse { text, tier: CacheTier::Shared })
            },
            Ok(None) => {
                self.stats.record_miss();
                None
            },
            Err(e) => {
                self.stats.record_shared_read_error();
                self.stats.record_miss();
                tracing::warn!(error = %e, "shared cache read failed, treating as miss");
                None
            },
        }
    }

    /// Writes `text` to the in-process tier and, best effort, to the shared
    /// tier.
    #[tracing::instrument(skip_all, fields(fingerprint = %fingerprint))]
    pub async fn store(&self, fingerprint: &Fingerprint, text: impl Into<Arc<str>>) {
        let text = text.into();
        self.local.insert(fingerprint.clone(), Arc::clone(&text));
        self.stats.record_write();

        let Some(shared) = self.shared.as_deref() else {
            return;
        };
        if let Err(e) = self.shared_put(shared, fingerprint, &text).await {
            self.stats.record_shared_write_error();
            tracing::warn!(error = %e, "shared cache write failed, entry kept in-process only");
        }
    }

    /// Returns the cached text for `fingerprint`, or runs `compute`, stores
    /// its output and returns it.
    ///
    /// Concurrent callers in this process that miss on the same fingerprint
    /// wait for the first one; they are then served from the in-process
    /// tier and `compute` runs once. A failed computation is not cached and
    /// the next waiter computes again.
    ///
    /// # Errors
    ///
    /// Returns the error of `compute`.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        fingerprint: &Fingerprint,
        compute: F,
    ) -> Result<CacheOutcome, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        if let Some(hit) = self.lookup(fingerprint).await {
            return Ok(hit.into());
        }

        let flight = FlightSlot::join(&self.in_flight, fingerprint);
        let _turn = flight.lock.lock().await;

        // Filled by the caller that held the slot before us.
        if let Some(text) = self.local.get(fingerprint) {
            self.stats.record_local_hit();
            return Ok(CacheOutcome { text, tier: Some(CacheTier::Local) });
        }

        let text: Arc<str> = Arc::from(compute().await?);
        self.store(fingerprint, Arc::clone(&text)).await;
        Ok(CacheOutcome { text, tier: None })
    }

    /// Number of in-process entries.
    #[must_use]
    pub fn local_len(&self) -> u64 {
        self.local.run_pending_tasks();
        self.local.entry_count()
    }

    /// Drops every in-process entry. The shared tier is untouched.
    pub fn clear_local(&self) {
        self.local.invalidate_all();
        self.local.run_pending_tasks();
    }

    /// Hit/miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    async fn shared_get(
        &self,
        shared: &dyn StateStore,
        fingerprint: &Fingerprint,
    ) -> StoreResult<Option<String>> {
        fail_point!("cache-shared-get", |_| {
            Err(StoreError::connection("injected shared cache read failure"))
        });
        let key = shared_key(fingerprint);
        bounded(self.config.shared_timeout(), shared.get(&key)).await
    }

    async fn shared_put(
        &self,
        shared: &dyn StateStore,
        fingerprint: &Fingerprint,
        text: &str,
    ) -> StoreResult<()> {
        fail_point!("cache-shared-put", |_| {
            Err(StoreError::connection("injected shared cache write failure"))
        });
        let key = shared_key(fingerprint);
        bounded(self.config.shared_timeout(), shared.set_with_ttl(&key, text, self.config.shared_ttl()))
            .await
    }
}

/// Store key of the shared entry for `fingerprint`.
#[must_use]
pub fn shared_key(fingerprint: &Fingerprint) -> String {
    format!("{SHARED_KEY_PREFIX}{fingerprint}")
}

async fn bounded<T>(
    deadline: Duration,
    operation: impl Future<Output = StoreResult<T>>,
) -> StoreResult<T> {
    match tokio::time::timeout(deadline, operation).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::timeout(deadline)),
    }
}

/// Membership in the single-flight group of one fingerprint.
///
/// The map entry is removed when the last member leaves, including when a
/// caller is cancelled mid-computation.
struct FlightSlot<'a> {
    map: &'a Mutex<FlightMap>,
    fingerprint: &'a Fingerprint,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> FlightSlot<'a> {
    fn join(map: &'a Mutex<FlightMap>, fingerprint: &'a Fingerprint) -> Self {
        let lock = Arc::clone(map.lock().entry(fingerprint.clone()).or_default());
        Self { map, fingerprint, lock }
    }
}

impl Drop for FlightSlot<'_> {
    fn drop(&mut self) {
        let mut map = self.map.lock();
        // One reference is the map's, one is ours.
        let last = map
            .get(self.fingerprint)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock) && Arc::strong_count(entry) <= 2);
        if last {
            map.remove(self.fingerprint);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use admission_storage::{
        MemoryStore,
        testutil::{CountingStore, FailingStore, StallingStore},
    };

    use super::*;
    use crate::fingerprint::GenerationParams;

    fn fp(prompt: &str) -> Fingerprint {
        GenerationParams { prompt: prompt.into(), max_tokens: 64, temperature: 0.1, top_p: 0.95 }
            .fingerprint()
    }

    fn with_shared(store: impl StateStore + 'static) -> ResponseCache {
        ResponseCache::builder().shared(Arc::new(store)).build()
    }

    #[tokio::test]
    async fn test_local_only_round_trip() {
        let cache = ResponseCache::builder().build();
        assert_eq!(cache.lookup(&fp("a")).await, None);

        cache.store(&fp("a"), "alpha").await;
        let hit = cache.lookup(&fp("a")).await.unwrap();
        assert_eq!(&*hit.text, "alpha");
        assert_eq!(hit.tier, CacheTier::Local);
        assert_eq!(cache.local_len(), 1);
    }

    #[tokio::test]
    async fn test_store_then_lookup_skips_shared_tier() {
        let store = CountingStore::new(MemoryStore::new());
        let cache = with_shared(store.clone());

        cache.store(&fp("a"), "alpha").await;
        assert_eq!(store.writes(), 1);

        let hit = cache.lookup(&fp("a")).await.unwrap();
        assert_eq!(hit.tier, CacheTier::Local);
        assert_eq!(store.reads(), 0);
    }

    #[tokio::test]
    async fn test_shared_hit_repopulates_local() {
        let store = CountingStore::new(MemoryStore::new());
        store.set_with_ttl(&shared_key(&fp("a")), "alpha", Duration::from_secs(60)).await.unwrap();
        let cache = with_shared(store.clone());

        let first = cache.lookup(&fp("a")).await.unwrap();
        assert_eq!(first.tier, CacheTier::Shared);
        let second = cache.lookup(&fp("a")).await.unwrap();
        assert_eq!(second.tier, CacheTier::Local);
        assert_eq!(&*second.text, "alpha");
        assert_eq!(store.reads(), 1);

        let stats = cache.stats();
        assert_eq!((stats.local_hits, stats.shared_hits, stats.misses), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_write_lands_in_shared_tier_with_prefix() {
        let store = MemoryStore::new();
        let cache = with_shared(store.clone());
        cache.store(&fp("a"), "alpha").await;

        let key = shared_key(&fp("a"));
        assert!(key.starts_with("response:"));
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("alpha"));
    }

    #[tokio::test]
    async fn test_failing_shared_tier_degrades_to_local() {
        let store = FailingStore::new(MemoryStore::new());
        store.set_failing(true);
        let cache = with_shared(store);

        assert_eq!(cache.lookup(&fp("a")).await, None);
        cache.store(&fp("a"), "alpha").await;
        assert_eq!(cache.lookup(&fp("a")).await.unwrap().tier, CacheTier::Local);

        let stats = cache.stats();
        assert_eq!(stats.shared_read_errors, 1);
        assert_eq!(stats.shared_write_errors, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_shared_tier_times_out_as_miss() {
        let config =
            CacheConfig::builder().shared_timeout(Duration::from_millis(50)).build().unwrap();
        let cache =
            ResponseCache::builder().config(config).shared(Arc::new(StallingStore::new())).build();

        assert_eq!(cache.lookup(&fp("a")).await, None);
        cache.store(&fp("a"), "alpha").await;
        assert_eq!(cache.stats().shared_write_errors, 1);
        assert!(cache.lookup(&fp("a")).await.is_some());
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let cache = with_shared(MemoryStore::new());
        cache.store(&fp("a"), "first").await;
        cache.store(&fp("a"), "second").await;
        assert_eq!(&*cache.lookup(&fp("a")).await.unwrap().text, "second");
    }

    #[tokio::test]
    async fn test_get_or_compute_caches_success_only() {
        let cache = ResponseCache::builder().build();

        let err = cache
            .get_or_compute(&fp("a"), || async { Err::<String, _>("engine down") })
            .await
            .unwrap_err();
        assert_eq!(err, "engine down");
        assert_eq!(cache.local_len(), 0);

        let computed =
            cache.get_or_compute(&fp("a"), || async { Ok::<_, ()>("alpha".to_owned()) }).await;
        let computed = computed.unwrap();
        assert!(!computed.is_cached());

        let cached = cache
            .get_or_compute(&fp("a"), || async { Err::<String, _>("recomputed") })
            .await
            .unwrap();
        assert_eq!(cached.tier, Some(CacheTier::Local));
        assert_eq!(&*cached.text, "alpha");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_compute_once() {
        let cache = ResponseCache::builder().build();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(&fp("shared"), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, ()>("text".to_owned())
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut served_from_cache = 0;
        for handle in handles {
            let outcome = handle.await.unwrap();
            assert_eq!(&*outcome.text, "text");
            served_from_cache += usize::from(outcome.tier.is_some());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(served_from_cache, 15);
        assert_eq!(cache.stats().local_hits, 15);
        assert!(cache.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_computation_releases_slot() {
        let cache = ResponseCache::builder().build();
        let key = fp("a");
        let pending = cache.get_or_compute(&key, std::future::pending::<Result<String, ()>>);
        let _ = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(cache.in_flight.lock().is_empty());

        let outcome =
            cache.get_or_compute(&key, || async { Ok::<_, ()>("alpha".to_owned()) }).await;
        assert!(!outcome.unwrap().is_cached());
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(CacheTier::Local.to_string(), "local");
        assert_eq!(serde_json::to_string(&CacheTier::Shared).unwrap(), "\"shared\"");
    }
}
