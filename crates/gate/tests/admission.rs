//! End-to-end admission through a fully wired `GateContext`.
//!
//! Covers the request-time credential paths (assertions, privileged keys,
//! stored keys), daily quota exhaustion and rollover, concurrent admission
//! at the limit, and the store-failure policies.

#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use admission_authn::{
    AssertionKeyPair, Permission, PermissionSet,
    api_key::record_key,
    testutil::{expired_assertion, provision_key, valid_assertion},
};
use admission_cache::GenerationParams;
use admission_gate::{
    FailurePolicy, GateConfig, GateContext, GateError, GenerationError, InferenceEngine,
};
use admission_storage::{
    FIELD_LAST_RESET, FIELD_REQUESTS_TODAY, FieldMap, MemoryStore, StateStore, format_reset_date,
    testutil::{CountingStore, FailingStore},
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Days, Utc};
use tokio::task::JoinSet;

const SEED: [u8; 32] = [42; 32];

struct ConstantEngine;

#[async_trait]
impl InferenceEngine for ConstantEngine {
    async fn generate(&self, _params: &GenerationParams) -> Result<String, GenerationError> {
        Ok("constant".to_owned())
    }

    fn model_name(&self) -> &str {
        "constant"
    }
}

fn config(policy: FailurePolicy) -> GateConfig {
    GateConfig {
        admin_keys: vec!["root-key".into()],
        api_keys: vec!["svc-key".into()],
        read_only_keys: vec!["dash-key".into()],
        assertion_signing_key: Some(URL_SAFE_NO_PAD.encode(SEED)),
        quota_failure_policy: policy,
        ..GateConfig::default()
    }
}

fn context_over(store: Arc<dyn StateStore>, policy: FailurePolicy) -> GateContext {
    GateContext::with_store(config(policy), store, Arc::new(ConstantEngine)).expect("wire context")
}

fn generate_only() -> PermissionSet {
    PermissionSet::from_iter([Permission::Generate])
}

#[tokio::test]
async fn valid_assertion_admits_with_embedded_identity() {
    let context = context_over(Arc::new(MemoryStore::new()), FailurePolicy::Closed);
    let keys = AssertionKeyPair::from_seed(&SEED);

    let token = valid_assertion(&keys, "batch-runner", &generate_only());
    let identity = context.gate().admit(&token, Permission::Generate).await.expect("admitted");
    assert_eq!(identity.identity_id(), "batch-runner");
    assert!(identity.has_permission(Permission::Generate));
    assert!(!identity.has_permission(Permission::Admin));
}

#[tokio::test]
async fn expired_assertion_is_rejected() {
    let context = context_over(Arc::new(MemoryStore::new()), FailurePolicy::Closed);
    let keys = AssertionKeyPair::from_seed(&SEED);

    let token = expired_assertion(&keys, "batch-runner", generate_only(), 120);
    let err = context.gate().admit(&token, Permission::Generate).await.expect_err("expired");
    assert!(matches!(err, GateError::TokenExpired));
    assert_eq!(err.http_status(), 401);
}

#[tokio::test]
async fn assertion_from_foreign_key_is_malformed() {
    let context = context_over(Arc::new(MemoryStore::new()), FailurePolicy::Closed);
    let foreign = AssertionKeyPair::generate();

    let token = valid_assertion(&foreign, "intruder", &generate_only());
    assert!(matches!(
        context.gate().admit(&token, Permission::Generate).await,
        Err(GateError::TokenMalformed(_))
    ));
}

#[tokio::test]
async fn unknown_key_is_not_found() {
    let context = context_over(Arc::new(MemoryStore::new()), FailurePolicy::Closed);
    let err = context
        .gate()
        .admit("ak_definitely-not-provisioned", Permission::Generate)
        .await
        .expect_err("unknown");
    assert!(matches!(err, GateError::CredentialNotFound));
    assert_eq!(err.to_string(), "Invalid API key");
}

#[tokio::test]
async fn privileged_keys_never_touch_the_store() {
    let store = CountingStore::new(MemoryStore::new());
    let context = context_over(Arc::new(store.clone()), FailurePolicy::Closed);

    assert_eq!(
        context.gate().admit("root-key", Permission::Admin).await.expect("admin").identity_id(),
        "admin"
    );
    assert!(context.gate().admit("svc-key", Permission::Generate).await.is_ok());
    assert!(matches!(
        context.gate().admit("dash-key", Permission::Generate).await,
        Err(GateError::PermissionDenied { required: Permission::Generate })
    ));
    assert_eq!(store.total(), 0);
}

#[tokio::test]
async fn limit_then_exhausted_then_rollover() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let key = provision_key(Arc::clone(&store), "team", generate_only(), 3).await;
    let context = context_over(Arc::clone(&store), FailurePolicy::Closed);

    for _ in 0..3 {
        context.gate().admit(&key, Permission::Generate).await.expect("within limit");
    }
    let err = context.gate().admit(&key, Permission::Generate).await.expect_err("exhausted");
    assert!(matches!(err, GateError::QuotaExceeded { daily_limit: 3 }));
    assert_eq!(err.http_status(), 429);

    // Pretend the counter was last reset yesterday.
    let yesterday = Utc::now().date_naive().checked_sub_days(Days::new(1)).expect("yesterday");
    let mut fields = FieldMap::new();
    fields.insert(FIELD_LAST_RESET.into(), format_reset_date(yesterday));
    store.set_fields(&record_key(&key), fields, None).await.expect("backdate");

    for expected in 1..=3 {
        let identity = context.gate().admit(&key, Permission::Generate).await.expect("new day");
        assert_eq!(identity.usage().map(|u| u.requests_today), Some(expected));
    }
    assert!(context.gate().admit(&key, Permission::Generate).await.is_err());

    let record = store.get_fields(&record_key(&key)).await.expect("record");
    assert_eq!(record.get(FIELD_REQUESTS_TODAY).map(String::as_str), Some("3"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_admits_at_last_slot_admit_exactly_one() {
    const CALLERS: usize = 24;

    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let key = provision_key(Arc::clone(&store), "team", generate_only(), 5).await;
    let context = context_over(Arc::clone(&store), FailurePolicy::Closed);
    for _ in 0..4 {
        context.gate().admit(&key, Permission::Generate).await.expect("warm up counter");
    }

    let mut set = JoinSet::new();
    for _ in 0..CALLERS {
        let gate = context.gate().clone();
        let key = key.to_string();
        set.spawn(async move { gate.admit(&key, Permission::Generate).await });
    }

    let mut admitted = 0;
    let mut exceeded = 0;
    while let Some(result) = set.join_next().await {
        match result.expect("task panicked") {
            Ok(_) => admitted += 1,
            Err(GateError::QuotaExceeded { .. }) => exceeded += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(exceeded, CALLERS - 1);
}

#[tokio::test]
async fn quota_store_failure_is_unavailable_by_default() {
    let store = FailingStore::new(MemoryStore::new());
    let key = provision_key(Arc::new(store.clone()), "team", generate_only(), 5).await;
    let context = context_over(Arc::new(store.clone()), FailurePolicy::Closed);

    store.fail_quota(true);
    let err = context.gate().admit(&key, Permission::Generate).await.expect_err("fail closed");
    assert!(matches!(err, GateError::StoreUnavailable(_)));
    assert_eq!(err.http_status(), 503);
    assert_eq!(err.to_string(), "Service temporarily unavailable");

    // Privileged keys keep working while the store is down.
    store.set_failing(true);
    assert!(context.gate().admit("svc-key", Permission::Generate).await.is_ok());
}

#[tokio::test]
async fn quota_store_failure_admits_under_fail_open() {
    let store = FailingStore::new(MemoryStore::new());
    let key = provision_key(Arc::new(store.clone()), "team", generate_only(), 5).await;
    let context = context_over(Arc::new(store.clone()), FailurePolicy::Open);

    store.fail_quota(true);
    assert!(context.gate().admit(&key, Permission::Generate).await.is_ok());

    store.fail_quota(false);
    let identity = context.gate().admit(&key, Permission::Generate).await.expect("counted");
    assert_eq!(identity.usage().map(|u| u.requests_today), Some(1));
}
