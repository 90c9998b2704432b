//! # Admission Authentication
//!
//! Credential verification and quota accounting for the admission core.
//!
//! This crate provides:
//! - **Signed assertions**: EdDSA JWTs verified by signature + expiry only
//! - **Opaque API keys**: `ak_` keys stored as SHA-256 digests, provisioned by admins
//! - **Privileged keys**: statically configured keys with fixed identities
//! - **Quota ledger**: atomic daily counters with day-boundary reset
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use admission_authn::{CredentialVerifier, PrivilegedKeys};
//! use admission_storage::MemoryStore;
//!
//! # async fn example(token: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let verifier = CredentialVerifier::builder()
//!     .store(Arc::new(MemoryStore::new()))
//!     .privileged(PrivilegedKeys::from_comma_lists("root-key", "", ""))
//!     .build();
//!
//! let identity = verifier.verify(token).await?;
//! println!("caller: {}", identity.identity_id());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Opaque API keys and records.
pub mod api_key;
/// Signed assertions.
pub mod assertion;
/// Authentication error types.
pub mod error;
/// Identities and permissions.
pub mod identity;
/// Privileged key tiers.
pub mod privileged;
/// Daily quota ledger.
pub mod quota;
/// Shared test utilities.
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
/// Algorithm validation.
pub mod validation;
/// Credential dispatch.
pub mod verifier;

pub use api_key::{
    ApiKeyProvisioner, ApiKeyRecord, DEFAULT_DAILY_LIMIT, NewApiKey, ProvisionedKey,
    generate_api_key, hash_api_key,
};
pub use assertion::{
    ASSERTION_PREFIX, AssertionClaims, AssertionConfig, AssertionIssuer, AssertionKeyPair,
    AssertionVerifier, DEFAULT_ASSERTION_TTL, IssuedAssertion,
};
pub use error::{AuthError, Result};
pub use identity::{CredentialKind, Identity, Permission, PermissionSet, QuotaUsage};
pub use privileged::{PrivilegedKeys, PrivilegedTier};
pub use quota::QuotaLedger;
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
pub use verifier::{CredentialVerifier, Resolution, StoredCredential};
