//! Shared test utilities for credential testing.
//!
//! Helpers for minting assertions with arbitrary timestamps, crafting raw
//! JWT strings for attack tests, and seeding a store with API keys.
//! Feature-gated behind `testutil`.
//!
//! ```toml
//! [dev-dependencies]
//! admission-authn = { path = "../authn", features = ["testutil"] }
//! ```

use std::sync::Arc;

use admission_storage::{MemoryStore, StateStore};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use zeroize::Zeroizing;

use crate::{
    api_key::{ApiKeyProvisioner, NewApiKey},
    assertion::{AssertionClaims, AssertionKeyPair, DEFAULT_ASSERTION_TTL},
    identity::PermissionSet,
};

/// Seconds since the epoch.
#[must_use]
pub fn now_secs() -> u64 {
    Utc::now().timestamp() as u64
}

/// Mints an assertion for `sub` that expired `ago_secs` seconds ago.
///
/// # Panics
///
/// Panics if signing fails.
pub fn expired_assertion(
    keys: &AssertionKeyPair,
    sub: &str,
    permissions: PermissionSet,
    ago_secs: u64,
) -> String {
    let now = now_secs();
    let claims = AssertionClaims {
        sub: sub.to_owned(),
        permissions,
        iat: now.saturating_sub(ago_secs + 3600),
        exp: now.saturating_sub(ago_secs),
    };
    keys.issuer(DEFAULT_ASSERTION_TTL).sign(&claims).expect("failed to sign test assertion")
}

/// Mints a valid assertion for `sub`.
///
/// # Panics
///
/// Panics if signing fails.
pub fn valid_assertion(keys: &AssertionKeyPair, sub: &str, permissions: &PermissionSet) -> String {
    keys.issuer(DEFAULT_ASSERTION_TTL)
        .issue(sub, permissions)
        .expect("failed to issue test assertion")
        .token
}

/// Creates a raw JWT string from arbitrary header and payload JSON, with the
/// given (possibly empty) signature segment.
///
/// # Panics
///
/// Panics if JSON serialization fails.
pub fn craft_raw_jwt(
    header_json: &serde_json::Value,
    payload_json: &serde_json::Value,
    signature: &str,
) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.{signature}")
}

/// Provisions an API key with `daily_limit` into `store` and returns the raw
/// key.
///
/// # Panics
///
/// Panics if the store write fails.
pub async fn provision_key(
    store: Arc<dyn StateStore>,
    user_id: &str,
    permissions: PermissionSet,
    daily_limit: u64,
) -> Zeroizing<String> {
    ApiKeyProvisioner::new(store)
        .create(
            NewApiKey::builder()
                .user_id(user_id)
                .permissions(permissions)
                .daily_limit(daily_limit)
                .build(),
        )
        .await
        .expect("failed to provision test key")
        .api_key
}

/// Creates a [`MemoryStore`] holding one provisioned key.
///
/// # Panics
///
/// Panics if the store write fails.
pub async fn store_with_key(
    user_id: &str,
    permissions: PermissionSet,
    daily_limit: u64,
) -> (MemoryStore, Zeroizing<String>) {
    let store = MemoryStore::new();
    let key = provision_key(Arc::new(store.clone()), user_id, permissions, daily_limit).await;
    (store, key)
}

/// Asserts that a `Result<T, AuthError>` is an `Err` of the given variant.
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use admission_authn::{assert_auth_error, error::AuthError};
///
/// let result: Result<(), AuthError> = Err(AuthError::token_expired());
/// assert_auth_error!(result, TokenExpired);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "expected AuthError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "{}: expected AuthError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}
