#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection in the authn crate.
//!
//! The `fail` dev-dependency enables the `failpoints` feature for test
//! builds.

use std::sync::Arc;

use admission_authn::{
    ApiKeyProvisioner, CredentialVerifier, NewApiKey, QuotaLedger, error::AuthError,
};
use admission_storage::{MemoryStore, StateStore};
use zeroize::Zeroizing;

async fn setup() -> (Arc<dyn StateStore>, Zeroizing<String>) {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let created = ApiKeyProvisioner::new(Arc::clone(&store))
        .create(NewApiKey::builder().user_id("fp-team").daily_limit(10).build())
        .await
        .expect("failed to provision key");
    (store, created.api_key)
}

#[tokio::test]
async fn quota_failpoint_reports_store_unavailable() {
    let scenario = fail::FailScenario::setup();
    let (store, key) = setup().await;
    fail::cfg("quota-before-consume", "return").expect("failed to configure fail point");

    let verifier = CredentialVerifier::builder().store(store).build();
    let result = verifier.verify(&key).await;
    assert!(
        matches!(result, Err(AuthError::StoreUnavailable(_))),
        "quota step should fail when fail point is active"
    );

    scenario.teardown();
}

#[tokio::test]
async fn quota_without_failpoint_admits() {
    let scenario = fail::FailScenario::setup();
    let (store, key) = setup().await;

    let verifier = CredentialVerifier::builder().store(Arc::clone(&store)).build();
    let identity = verifier.verify(&key).await.expect("admitted");
    assert_eq!(identity.usage().map(|u| u.requests_today), Some(1));

    let ledger = QuotaLedger::new(store);
    let record = admission_authn::api_key::record_key(&key);
    assert_eq!(ledger.consume(&record).await.expect("admitted").requests_today, 2);

    scenario.teardown();
}
