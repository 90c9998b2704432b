//! Gate error taxonomy and status categories.
//!
//! Every request-time failure maps to one [`GateError`] variant, and every
//! variant to one stable [`StatusCategory`]. Display strings are safe to
//! return to callers: they never contain raw keys, key digests, prompts or
//! store addresses.

use admission_authn::{AuthError, Permission};
use admission_storage::{ConfigError, StoreError};
use thiserror::Error;

use crate::engine::GenerationError;

/// Stable outcome class of an error, with its HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCategory {
    /// 400: the request itself is invalid.
    BadRequest,
    /// 401: missing, malformed, expired or unknown credential.
    Unauthorized,
    /// 403: authenticated but lacking the required permission.
    Forbidden,
    /// 429: daily quota exhausted.
    TooManyRequests,
    /// 500: generation or internal failure.
    InternalError,
    /// 503: shared state store or inference engine unavailable.
    ServiceUnavailable,
}

impl StatusCategory {
    /// HTTP status code for the category.
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::TooManyRequests => 429,
            Self::InternalError => 500,
            Self::ServiceUnavailable => 503,
        }
    }
}

/// Errors surfaced by the admission gate and the generation service.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases; match with a wildcard arm.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GateError {
    /// Credential could not be parsed or verified.
    #[error("Invalid token: {0}")]
    TokenMalformed(String),

    /// Signed assertion is past its expiry.
    #[error("Token expired")]
    TokenExpired,

    /// Opaque key is unknown.
    #[error("Invalid API key")]
    CredentialNotFound,

    /// Daily request limit reached.
    #[error("Daily limit of {daily_limit} requests exceeded")]
    QuotaExceeded {
        /// The identity's daily ceiling.
        daily_limit: u64,
    },

    /// Identity lacks the permission the entry point requires.
    #[error("Permission '{required}' required")]
    PermissionDenied {
        /// The missing permission.
        required: Permission,
    },

    /// Shared state store unreachable or timed out during admission.
    #[error("Service temporarily unavailable")]
    StoreUnavailable(#[source] StoreError),

    /// The inference engine failed or timed out.
    #[error("Generation failed")]
    GenerationFailed(#[source] GenerationError),

    /// Request parameters out of bounds or missing.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Startup configuration rejected.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Unexpected failure with no better category.
    #[error("Internal error")]
    Internal(String),
}

impl GateError {
    /// Creates a [`GateError::PermissionDenied`] error.
    pub fn permission_denied(required: Permission) -> Self {
        Self::PermissionDenied { required }
    }

    /// Creates a [`GateError::InvalidRequest`] error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Creates a [`GateError::Internal`] error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The stable status category of this error.
    #[must_use]
    pub fn category(&self) -> StatusCategory {
        match self {
            Self::TokenMalformed(_) | Self::TokenExpired | Self::CredentialNotFound => {
                StatusCategory::Unauthorized
            },
            Self::PermissionDenied { .. } => StatusCategory::Forbidden,
            Self::QuotaExceeded { .. } => StatusCategory::TooManyRequests,
            Self::StoreUnavailable(_) | Self::GenerationFailed(GenerationError::Unavailable) => {
                StatusCategory::ServiceUnavailable
            },
            Self::InvalidRequest(_) => StatusCategory::BadRequest,
            Self::GenerationFailed(_) | Self::Config(_) | Self::Internal(_) => {
                StatusCategory::InternalError
            },
        }
    }

    /// Shorthand for `self.category().http_status()`.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        self.category().http_status()
    }
}

impl From<AuthError> for GateError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::TokenMalformed(reason) => Self::TokenMalformed(reason),
            AuthError::TokenExpired => Self::TokenExpired,
            AuthError::CredentialNotFound => Self::CredentialNotFound,
            AuthError::QuotaExceeded { daily_limit } => Self::QuotaExceeded { daily_limit },
            AuthError::StoreUnavailable(source) => Self::StoreUnavailable(source),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<GenerationError> for GateError {
    fn from(err: GenerationError) -> Self {
        Self::GenerationFailed(err)
    }
}

/// Result type alias for gate operations.
pub type Result<T> = std::result::Result<T, GateError>;
