//! Credential verification.
//!
//! [`CredentialVerifier`] turns a bearer token into an [`Identity`]:
//!
//! 1. tokens starting with [`ASSERTION_PREFIX`](crate::ASSERTION_PREFIX) are verified as signed
//!    assertions (signature + expiry, no store access);
//! 2. otherwise the token is compared with the statically configured privileged keys, which
//!    resolve to fixed identities without touching the store;
//! 3. otherwise the token is hashed and its record looked up in the store, and the quota ledger
//!    counts the request.
//!
//! [`resolve`](CredentialVerifier::resolve) performs steps 1–3 up to the
//! record lookup; [`verify`](CredentialVerifier::verify) additionally runs the
//! ledger. Callers that need their own policy for a failing quota step (the
//! admission gate) use `resolve` and drive the ledger themselves.

use std::sync::Arc;

use admission_storage::StateStore;

use crate::{
    api_key::{ApiKeyRecord, record_key},
    assertion::{AssertionVerifier, looks_like_assertion},
    error::AuthError,
    identity::Identity,
    privileged::PrivilegedKeys,
    quota::QuotaLedger,
};

/// A store-backed credential whose request has not been counted yet.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredCredential {
    identity: Identity,
    record_key: String,
}

impl StoredCredential {
    /// The identity with counters as last stored.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Store key of the record; pass to [`QuotaLedger::consume`].
    #[must_use]
    pub fn record_key(&self) -> &str {
        &self.record_key
    }

    /// Consumes the credential, returning the identity.
    #[must_use]
    pub fn into_identity(self) -> Identity {
        self.identity
    }
}

// The record key embeds the key digest.
impl std::fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredCredential").field("identity", &self.identity).finish_non_exhaustive()
    }
}

/// Outcome of credential resolution, before any quota accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A verified signed assertion. Never metered.
    Assertion(Identity),
    /// A privileged key. Never metered.
    Privileged(Identity),
    /// A store-backed API key. Must go through the quota ledger.
    Stored(StoredCredential),
}

impl Resolution {
    /// The resolved identity.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        match self {
            Self::Assertion(identity) | Self::Privileged(identity) => identity,
            Self::Stored(credential) => credential.identity(),
        }
    }
}

/// Verifies bearer tokens against all three credential schemes.
#[derive(Clone)]
pub struct CredentialVerifier {
    assertions: Option<AssertionVerifier>,
    privileged: PrivilegedKeys,
    store: Arc<dyn StateStore>,
    ledger: QuotaLedger,
}

impl std::fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVerifier")
            .field("assertions", &self.assertions.is_some())
            .field("privileged", &self.privileged)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl CredentialVerifier {
    /// Creates a verifier.
    ///
    /// Without an `assertions` verifier every assertion-shaped token is
    /// rejected as malformed.
    #[builder]
    pub fn new(
        store: Arc<dyn StateStore>,
        assertions: Option<AssertionVerifier>,
        #[builder(default)] privileged: PrivilegedKeys,
    ) -> Self {
        let ledger = QuotaLedger::new(Arc::clone(&store));
        Self { assertions, privileged, store, ledger }
    }

    /// The ledger used by [`verify`](Self::verify).
    #[must_use]
    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    /// Resolves `token` to an identity without counting the request.
    ///
    /// # Errors
    ///
    /// - [`AuthError::TokenExpired`] / [`AuthError::TokenMalformed`] for failing assertions
    /// - [`AuthError::CredentialNotFound`] for unknown opaque keys
    /// - [`AuthError::StoreUnavailable`] if the record lookup failed
    #[tracing::instrument(skip_all)]
    pub async fn resolve(&self, token: &str) -> Result<Resolution, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::token_malformed("empty bearer token"));
        }

        if looks_like_assertion(token) {
            let verifier = self
                .assertions
                .as_ref()
                .ok_or_else(|| AuthError::token_malformed("signed assertions are not accepted"))?;
            let identity = verifier.verify(token)?.into_identity();
            tracing::debug!(identity_id = identity.identity_id(), "signed assertion verified");
            return Ok(Resolution::Assertion(identity));
        }

        if let Some(tier) = self.privileged.match_token(token) {
            tracing::debug!(tier = ?tier, "privileged key matched");
            return Ok(Resolution::Privileged(tier.identity()));
        }

        let record_key = record_key(token);
        let fields = self.store.get_fields(&record_key).await.map_err(|e| {
            tracing::warn!(error = %e, "credential lookup failed");
            AuthError::store_unavailable(e)
        })?;
        let record = ApiKeyRecord::from_fields(&fields)
            .map_err(AuthError::store_unavailable)?
            .ok_or_else(AuthError::credential_not_found)?;

        tracing::debug!(identity_id = %record.user_id, "API key record found");
        Ok(Resolution::Stored(StoredCredential { identity: record.to_identity(), record_key }))
    }

    /// Resolves `token` and, for store-backed keys, counts the request.
    ///
    /// A failing quota step is reported as
    /// [`AuthError::StoreUnavailable`]; the request is not admitted.
    ///
    /// # Errors
    ///
    /// Everything [`resolve`](Self::resolve) returns, plus
    /// [`AuthError::QuotaExceeded`] when the daily limit is reached.
    #[tracing::instrument(skip_all)]
    pub async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        match self.resolve(token).await? {
            Resolution::Assertion(identity) | Resolution::Privileged(identity) => Ok(identity),
            Resolution::Stored(credential) => {
                let usage = self.ledger.consume(credential.record_key()).await?;
                Ok(credential.into_identity().with_usage(usage))
            },
        }
    }
}
