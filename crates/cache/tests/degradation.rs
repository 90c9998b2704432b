#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
//! Behaviour of the response cache when the shared tier misbehaves, and
//! across cache instances sharing one store.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use admission_cache::{CacheConfig, CacheTier, GenerationParams, ResponseCache};
use admission_storage::{
    MemoryStore, StateStore,
    testutil::{CountingStore, FailingStore, StallingStore},
};

fn params(prompt: &str) -> GenerationParams {
    GenerationParams { prompt: prompt.to_owned(), max_tokens: 256, temperature: 0.1, top_p: 0.95 }
}

#[tokio::test]
async fn unreachable_shared_tier_misses_and_stores_locally() {
    let store = FailingStore::new(MemoryStore::new());
    store.set_failing(true);
    let cache = ResponseCache::builder().shared(Arc::new(store.clone())).build();
    let fp = params("unreachable").fingerprint();

    assert!(cache.lookup(&fp).await.is_none());
    cache.store(&fp, "local only").await;
    let hit = cache.lookup(&fp).await.expect("served from the in-process tier");
    assert_eq!(hit.tier, CacheTier::Local);

    // Nothing reached the shared store while it was down.
    store.set_failing(false);
    assert_eq!(store.inner().get(&admission_cache::shared_key(&fp)).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn hung_shared_tier_is_bounded_by_timeout() {
    let config = CacheConfig::builder().shared_timeout(Duration::from_millis(200)).build().unwrap();
    let cache =
        ResponseCache::builder().config(config).shared(Arc::new(StallingStore::new())).build();
    let fp = params("hung").fingerprint();

    let started = tokio::time::Instant::now();
    assert!(cache.lookup(&fp).await.is_none());
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn second_process_is_served_from_shared_tier() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let first = ResponseCache::builder().shared(Arc::clone(&store)).build();
    let second = ResponseCache::builder().shared(store).build();
    let fp = params("warm").fingerprint();

    first.store(&fp, "from the first process").await;

    let hit = second.lookup(&fp).await.expect("shared tier hit");
    assert_eq!(hit.tier, CacheTier::Shared);
    assert_eq!(second.lookup(&fp).await.expect("now local").tier, CacheTier::Local);
}

#[tokio::test]
async fn reordered_parameters_share_an_entry() {
    let cache = ResponseCache::builder().build();
    let typed = params("same").fingerprint();
    let reordered = admission_cache::Fingerprint::from_json(&serde_json::json!({
        "top_p": 0.95,
        "temperature": 0.1,
        "prompt": "same",
        "max_tokens": 256,
    }));

    cache.store(&typed, "one entry").await;
    assert_eq!(&*cache.lookup(&reordered).await.expect("same fingerprint").text, "one entry");
}

#[tokio::test]
async fn local_hit_never_touches_shared_tier() {
    let store = CountingStore::new(MemoryStore::new());
    let cache = ResponseCache::builder().shared(Arc::new(store.clone())).build();
    let fp = params("counted").fingerprint();

    cache.store(&fp, "text").await;
    store.reset();

    for _ in 0..10 {
        assert_eq!(cache.lookup(&fp).await.unwrap().tier, CacheTier::Local);
    }
    assert_eq!(store.total(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_flight_with_failing_shared_tier() {
    let store = FailingStore::new(MemoryStore::new());
    store.set_failing(true);
    let cache = ResponseCache::builder().shared(Arc::new(store)).build();
    let fp = params("stampede").fingerprint();
    let engine_calls = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            let fp = fp.clone();
            let engine_calls = Arc::clone(&engine_calls);
            tokio::spawn(async move {
                cache
                    .get_or_compute(&fp, || async move {
                        engine_calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok::<_, std::convert::Infallible>("generated".to_owned())
                    })
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut fresh = 0;
    for task in tasks {
        let outcome = task.await.unwrap();
        assert_eq!(&*outcome.text, "generated");
        if !outcome.is_cached() {
            fresh += 1;
        }
    }
    assert_eq!(engine_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fresh, 1);
}
