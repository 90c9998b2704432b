//! The admission gate.
//!
//! [`AdmissionGate::admit`] is the single request-time decision point:
//!
//! 1. resolve the bearer token (signed assertion, privileged key, or stored API key);
//! 2. for stored keys, count the request in the quota ledger;
//! 3. check that the identity holds the required permission.
//!
//! Quota is consumed before the permission check, so a stored key that is
//! refused for lacking a permission still spends one request.

use std::str::FromStr;

use admission_authn::{
    AuthError, CredentialVerifier, Identity, Permission, Resolution, StoredCredential,
};
use admission_storage::ConfigError;
use serde::{Deserialize, Serialize};

use crate::{
    endpoint::{Access, Endpoint},
    error::{GateError, Result},
};

/// Outcome when the quota step cannot reach the store.
///
/// Applies only after the credential record was found; a failing record
/// lookup is always [`GateError::StoreUnavailable`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Reject with [`GateError::StoreUnavailable`].
    #[default]
    Closed,
    /// Admit without counting the request.
    Open,
}

/// Policy used unless configured otherwise.
pub const DEFAULT_QUOTA_FAILURE_POLICY: FailurePolicy = FailurePolicy::Closed;

impl FailurePolicy {
    /// The configuration spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "closed" | "fail-closed" | "fail_closed" => Ok(Self::Closed),
            "open" | "fail-open" | "fail_open" => Ok(Self::Open),
            other => Err(ConfigError::Invalid {
                field: "quota_failure_policy",
                reason: format!("expected `closed` or `open`, got `{other}`"),
            }),
        }
    }
}

/// Composes credential verification, quota accounting and the permission
/// check.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    verifier: CredentialVerifier,
    quota_failure_policy: FailurePolicy,
}

#[bon::bon]
impl AdmissionGate {
    /// Creates a gate.
    #[builder]
    pub fn new(
        verifier: CredentialVerifier,
        #[builder(default = DEFAULT_QUOTA_FAILURE_POLICY)] quota_failure_policy: FailurePolicy,
    ) -> Self {
        Self { verifier, quota_failure_policy }
    }

    /// The underlying verifier.
    #[must_use]
    pub fn verifier(&self) -> &CredentialVerifier {
        &self.verifier
    }

    /// The configured quota failure policy.
    #[must_use]
    pub fn quota_failure_policy(&self) -> FailurePolicy {
        self.quota_failure_policy
    }

    /// Admits `token` if it resolves to an identity within quota that holds
    /// `required`.
    ///
    /// # Errors
    ///
    /// - [`GateError::TokenMalformed`], [`GateError::TokenExpired`], [`GateError::CredentialNotFound`]
    ///   for credential problems
    /// - [`GateError::QuotaExceeded`] when the daily limit is reached
    /// - [`GateError::StoreUnavailable`] when the store fails (subject to the failure policy for the
    ///   quota step)
    /// - [`GateError::PermissionDenied`] when `required` is not granted
    #[tracing::instrument(skip_all, fields(permission = %required))]
    pub async fn admit(&self, token: &str, required: Permission) -> Result<Identity> {
        let identity = self.authenticate(token).await?;
        if !identity.has_permission(required) {
            tracing::debug!(identity_id = identity.identity_id(), "permission denied");
            return Err(GateError::permission_denied(required));
        }
        Ok(identity)
    }

    /// Admits `token` without a permission check.
    ///
    /// # Errors
    ///
    /// As [`admit`](Self::admit), except [`GateError::PermissionDenied`].
    pub async fn authenticate(&self, token: &str) -> Result<Identity> {
        match self.verifier.resolve(token).await? {
            Resolution::Assertion(identity) | Resolution::Privileged(identity) => Ok(identity),
            Resolution::Stored(credential) => self.meter(credential).await,
        }
    }

    /// Applies the access rule of `endpoint`. Public endpoints yield
    /// `Ok(None)` without looking at `token`.
    ///
    /// # Errors
    ///
    /// As [`admit`](Self::admit).
    pub async fn admit_endpoint(&self, token: &str, endpoint: Endpoint) -> Result<Option<Identity>> {
        match endpoint.access() {
            Access::Public => Ok(None),
            Access::Authenticated => self.authenticate(token).await.map(Some),
            Access::Requires(permission) => self.admit(token, permission).await.map(Some),
        }
    }

    async fn meter(&self, credential: StoredCredential) -> Result<Identity> {
        match self.verifier.ledger().consume(credential.record_key()).await {
            Ok(usage) => Ok(credential.into_identity().with_usage(usage)),
            Err(AuthError::StoreUnavailable(source))
                if self.quota_failure_policy == FailurePolicy::Open =>
            {
                tracing::warn!(
                    identity_id = credential.identity().identity_id(),
                    error = %source,
                    "quota store unavailable, admitting uncounted under fail-open policy",
                );
                Ok(credential.into_identity())
            },
            Err(e) => Err(e.into()),
        }
    }
}
