//! Authentication error types.
//!
//! Every failure of credential verification or quota consumption maps to
//! one variant here. Messages never include raw keys, key digests or store
//! addresses.

use admission_storage::StoreError;
use thiserror::Error;

/// Credential and quota errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]` — new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Signed assertion could not be decoded or verified: bad signature,
    /// broken structure, missing claims or a disallowed algorithm.
    #[error("Malformed token: {0}")]
    TokenMalformed(String),

    /// Signed assertion is past its expiry.
    #[error("Token expired")]
    TokenExpired,

    /// Opaque key is neither privileged nor present in the store.
    #[error("Credential not found")]
    CredentialNotFound,

    /// Daily request limit reached.
    #[error("Daily quota of {daily_limit} requests exhausted")]
    QuotaExceeded {
        /// The identity's daily ceiling.
        daily_limit: u64,
    },

    /// Shared state store unreachable, timed out, or holding unreadable data.
    ///
    /// Wraps the original [`StoreError`] to preserve the source chain for
    /// structured logging.
    #[error("Credential store unavailable")]
    StoreUnavailable(
        /// The underlying store error.
        #[source]
        StoreError,
    ),

    /// Minting a signed assertion failed.
    #[error("Failed to sign assertion: {0}")]
    SigningFailed(String),
}

impl AuthError {
    /// Creates a [`AuthError::TokenMalformed`] error.
    pub fn token_malformed(message: impl Into<String>) -> Self {
        Self::TokenMalformed(message.into())
    }

    /// Creates a [`AuthError::TokenExpired`] error.
    pub fn token_expired() -> Self {
        Self::TokenExpired
    }

    /// Creates a [`AuthError::CredentialNotFound`] error.
    pub fn credential_not_found() -> Self {
        Self::CredentialNotFound
    }

    /// Creates a [`AuthError::QuotaExceeded`] error.
    pub fn quota_exceeded(daily_limit: u64) -> Self {
        Self::QuotaExceeded { daily_limit }
    }

    /// Creates a [`AuthError::StoreUnavailable`] error.
    pub fn store_unavailable(source: StoreError) -> Self {
        Self::StoreUnavailable(source)
    }

    /// Creates a [`AuthError::SigningFailed`] error.
    pub fn signing_failed(message: impl Into<String>) -> Self {
        Self::SigningFailed(message.into())
    }

    /// Returns `true` for failures of the shared store rather than of the
    /// credential itself.
    #[must_use]
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::InvalidToken => AuthError::token_malformed("invalid token structure"),
            ErrorKind::InvalidSignature => AuthError::token_malformed("invalid signature"),
            ErrorKind::InvalidAlgorithm => AuthError::token_malformed("algorithm not accepted"),
            ErrorKind::MissingRequiredClaim(claim) => {
                AuthError::token_malformed(format!("missing claim: {claim}"))
            },
            ErrorKind::Json(_) => AuthError::token_malformed("claims do not match the schema"),
            ErrorKind::Base64(_) | ErrorKind::Utf8(_) => {
                AuthError::token_malformed("token segments are not valid base64url")
            },
            _ => AuthError::token_malformed("token rejected"),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::StoreUnavailable(err)
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;
