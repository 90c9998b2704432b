//! Signed assertions.
//!
//! A signed assertion is a self-contained EdDSA JWT carrying the caller's
//! identity id and permission set. Verification is signature + expiry only:
//! it never touches the store and never suspends, and assertion holders are
//! not quota-tracked.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use admission_authn::{AssertionKeyPair, Permission, PermissionSet};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let keys = AssertionKeyPair::generate();
//! let issuer = keys.issuer(Duration::from_secs(3600));
//! let verifier = keys.verifier();
//!
//! let issued = issuer.issue("svc-batch", &PermissionSet::from_iter([Permission::Generate]))?;
//! let claims = verifier.verify(&issued.token)?;
//! assert_eq!(claims.sub, "svc-batch");
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use admission_storage::ConfigError;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header};
use rand::Rng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    error::AuthError,
    identity::{CredentialKind, Identity, PermissionSet},
    validation::validate_algorithm,
};

/// Tokens starting with this prefix are treated as signed assertions. It is
/// the base64url encoding of `{"`, the start of every JWT header.
pub const ASSERTION_PREFIX: &str = "eyJ";

/// Default assertion lifetime.
pub const DEFAULT_ASSERTION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Returns `true` if `token` should be verified as a signed assertion.
#[must_use]
pub fn looks_like_assertion(token: &str) -> bool {
    token.starts_with(ASSERTION_PREFIX)
}

/// Claims carried by a signed assertion.
///
/// ```json
/// {
///   "sub": "svc-batch",
///   "permissions": ["generate", "read"],
///   "iat": 1717200000,
///   "exp": 1717286400
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// Identity id of the holder.
    pub sub: String,
    /// Granted permissions.
    pub permissions: PermissionSet,
    /// Issued at (seconds since epoch).
    pub iat: u64,
    /// Expiration time (seconds since epoch).
    pub exp: u64,
}

impl AssertionClaims {
    /// Converts verified claims into an unmetered identity.
    #[must_use]
    pub fn into_identity(self) -> Identity {
        Identity::new(self.sub, self.permissions, CredentialKind::Assertion, None)
    }
}

/// Configuration for assertion issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssertionConfig {
    /// Lifetime of newly issued assertions.
    #[serde(with = "humantime_serde", default = "default_ttl")]
    pub(crate) ttl: Duration,
}

fn default_ttl() -> Duration {
    DEFAULT_ASSERTION_TTL
}

impl Default for AssertionConfig {
    fn default() -> Self {
        Self { ttl: DEFAULT_ASSERTION_TTL }
    }
}

#[bon::bon]
impl AssertionConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `ttl` is shorter than one second.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_ASSERTION_TTL)] ttl: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self { ttl };
        config.validate()?;
        Ok(config)
    }

    /// Checks field ranges; used after deserialization as well.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `ttl` is shorter than one second.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl < Duration::from_secs(1) {
            return Err(ConfigError::BelowMinimum {
                field: "ttl",
                value: format!("{}ms", self.ttl.as_millis()),
                min: "1s".to_owned(),
            });
        }
        Ok(())
    }

    /// Lifetime of newly issued assertions.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// An Ed25519 key pair for minting and verifying assertions.
#[derive(Clone)]
pub struct AssertionKeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for AssertionKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssertionKeyPair").finish_non_exhaustive()
    }
}

impl AssertionKeyPair {
    /// Derives the key pair from a 32-byte Ed25519 seed.
    #[must_use]
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let verifying_key = SigningKey::from_bytes(seed).verifying_key();
        Self {
            encoding: EncodingKey::from_ed_der(&pkcs8_der(seed)),
            // `from_ed_der` takes the raw 32-byte public key.
            decoding: DecodingKey::from_ed_der(verifying_key.as_bytes()),
        }
    }

    /// Derives the key pair from a base64url (unpadded) encoded seed, the
    /// form used by `ASSERTION_SIGNING_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the value is not base64url or does not
    /// decode to exactly 32 bytes.
    pub fn from_base64url(encoded: &str) -> Result<Self, ConfigError> {
        let bytes = Zeroizing::new(URL_SAFE_NO_PAD.decode(encoded.trim()).map_err(|_| {
            ConfigError::Invalid {
                field: "assertion_signing_key",
                reason: "not valid base64url".to_owned(),
            }
        })?);
        let seed: Zeroizing<[u8; 32]> =
            Zeroizing::new(bytes.as_slice().try_into().map_err(|_| ConfigError::Invalid {
                field: "assertion_signing_key",
                reason: format!("expected 32 bytes, got {}", bytes.len()),
            })?);
        Ok(Self::from_seed(&seed))
    }

    /// Generates a fresh random key pair.
    #[must_use]
    pub fn generate() -> Self {
        let mut seed = Zeroizing::new([0u8; 32]);
        rand::rng().fill(&mut seed[..]);
        Self::from_seed(&seed)
    }

    /// Creates an issuer minting assertions valid for `ttl`.
    #[must_use]
    pub fn issuer(&self, ttl: Duration) -> AssertionIssuer {
        AssertionIssuer { encoding: self.encoding.clone(), ttl }
    }

    /// Creates a verifier for assertions signed by this pair.
    #[must_use]
    pub fn verifier(&self) -> AssertionVerifier {
        AssertionVerifier::new(self.decoding.clone())
    }
}

/// Wraps a raw Ed25519 seed in the fixed PKCS#8 v1 envelope.
fn pkcs8_der(seed: &[u8; 32]) -> Zeroizing<Vec<u8>> {
    let mut der = Zeroizing::new(vec![
        0x30, 0x2e, // SEQUENCE, 46 bytes
        0x02, 0x01, 0x00, // INTEGER version 0
        0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
        0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
        0x04, 0x22, // OCTET STRING, 34 bytes
        0x04, 0x20, // OCTET STRING, 32 bytes (the seed)
    ]);
    der.extend_from_slice(seed);
    der
}

/// A freshly minted assertion.
#[derive(Clone)]
pub struct IssuedAssertion {
    /// The compact JWT.
    pub token: String,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedAssertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedAssertion")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Mints signed assertions.
#[derive(Clone)]
pub struct AssertionIssuer {
    encoding: EncodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for AssertionIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssertionIssuer").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl AssertionIssuer {
    /// Lifetime of issued assertions.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mints an assertion for `identity_id` with `permissions`, valid from
    /// now for the configured TTL.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SigningFailed`] if encoding fails.
    #[tracing::instrument(skip(self, permissions))]
    pub fn issue(
        &self,
        identity_id: &str,
        permissions: &PermissionSet,
    ) -> Result<IssuedAssertion, AuthError> {
        let now = Utc::now().timestamp().max(0) as u64;
        let exp = now.saturating_add(self.ttl.as_secs());
        let claims = AssertionClaims {
            sub: identity_id.to_owned(),
            permissions: permissions.clone(),
            iat: now,
            exp,
        };
        let token = self.sign(&claims)?;
        let expires_at =
            DateTime::<Utc>::from_timestamp(exp as i64, 0).unwrap_or(DateTime::<Utc>::MAX_UTC);
        tracing::debug!(expires_at = %expires_at, "issued signed assertion");
        Ok(IssuedAssertion { token, expires_at })
    }

    /// Signs arbitrary claims.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SigningFailed`] if encoding fails.
    pub fn sign(&self, claims: &AssertionClaims) -> Result<String, AuthError> {
        jsonwebtoken::encode(&Header::new(Algorithm::EdDSA), claims, &self.encoding)
            .map_err(|e| AuthError::signing_failed(e.to_string()))
    }
}

/// Verifies signed assertions.
#[derive(Clone)]
pub struct AssertionVerifier {
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for AssertionVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssertionVerifier").finish_non_exhaustive()
    }
}

impl AssertionVerifier {
    /// Creates a verifier for the given public key.
    #[must_use]
    pub fn new(decoding: DecodingKey) -> Self {
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self { decoding, validation }
    }

    /// Creates a verifier from a base64url (unpadded) Ed25519 public key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the key cannot be parsed.
    pub fn from_public_key(public_key_b64: &str) -> Result<Self, ConfigError> {
        let decoding = DecodingKey::from_ed_components(public_key_b64).map_err(|e| {
            ConfigError::Invalid { field: "assertion_public_key", reason: e.to_string() }
        })?;
        Ok(Self::new(decoding))
    }

    /// Verifies signature and expiry and returns the claims.
    ///
    /// # Errors
    ///
    /// - [`AuthError::TokenExpired`] if the assertion is past its expiry
    /// - [`AuthError::TokenMalformed`] for everything else: undecodable structure, disallowed
    ///   algorithm, bad signature, missing or ill-typed claims
    pub fn verify(&self, token: &str) -> Result<AssertionClaims, AuthError> {
        let header = decode_header(token)
            .map_err(|_| AuthError::token_malformed("cannot decode assertion header"))?;
        validate_algorithm(&format!("{:?}", header.alg))?;

        let data = decode::<AssertionClaims>(token, &self.decoding, &self.validation)?;
        if data.claims.sub.trim().is_empty() {
            return Err(AuthError::token_malformed("missing claim: sub"));
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::identity::Permission;

    fn perms() -> PermissionSet {
        PermissionSet::from_iter([Permission::Generate, Permission::Read])
    }

    fn now() -> u64 {
        Utc::now().timestamp() as u64
    }

    fn raw_jwt(header: &serde_json::Value, payload: &serde_json::Value, sig: &str) -> String {
        let h = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header).unwrap());
        let p = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap());
        format!("{h}.{p}.{sig}")
    }

    #[test]
    fn test_issue_then_verify() {
        let keys = AssertionKeyPair::generate();
        let issued = keys.issuer(DEFAULT_ASSERTION_TTL).issue("svc", &perms()).unwrap();
        assert!(looks_like_assertion(&issued.token));

        let claims = keys.verifier().verify(&issued.token).unwrap();
        assert_eq!(claims.sub, "svc");
        assert_eq!(claims.permissions, perms());
        assert_eq!(claims.exp - claims.iat, DEFAULT_ASSERTION_TTL.as_secs());

        let identity = claims.into_identity();
        assert_eq!(identity.kind(), CredentialKind::Assertion);
        assert!(identity.usage().is_none());
    }

    #[test]
    fn test_expired_assertion_is_expired() {
        let keys = AssertionKeyPair::generate();
        let claims = AssertionClaims {
            sub: "svc".into(),
            permissions: perms(),
            iat: now() - 7200,
            exp: now() - 60,
        };
        let token = keys.issuer(DEFAULT_ASSERTION_TTL).sign(&claims).unwrap();

        assert!(matches!(keys.verifier().verify(&token), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn test_foreign_signature_is_malformed() {
        let signer = AssertionKeyPair::generate();
        let other = AssertionKeyPair::generate();
        let token = signer.issuer(DEFAULT_ASSERTION_TTL).issue("svc", &perms()).unwrap().token;

        assert!(matches!(other.verifier().verify(&token), Err(AuthError::TokenMalformed(_))));
    }

    #[test]
    fn test_expired_with_bad_signature_is_malformed() {
        let signer = AssertionKeyPair::generate();
        let other = AssertionKeyPair::generate();
        let claims = AssertionClaims {
            sub: "svc".into(),
            permissions: perms(),
            iat: now() - 7200,
            exp: now() - 60,
        };
        let token = signer.issuer(DEFAULT_ASSERTION_TTL).sign(&claims).unwrap();

        assert!(matches!(other.verifier().verify(&token), Err(AuthError::TokenMalformed(_))));
    }

    #[test]
    fn test_none_algorithm_is_malformed() {
        let keys = AssertionKeyPair::generate();
        let token = raw_jwt(
            &json!({"alg": "none", "typ": "JWT"}),
            &json!({"sub": "svc", "permissions": ["admin"], "iat": now(), "exp": now() + 60}),
            "",
        );
        assert!(matches!(keys.verifier().verify(&token), Err(AuthError::TokenMalformed(_))));
    }

    #[test]
    fn test_symmetric_algorithm_is_malformed() {
        let keys = AssertionKeyPair::generate();
        let token = raw_jwt(
            &json!({"alg": "HS256", "typ": "JWT"}),
            &json!({"sub": "svc", "permissions": ["admin"], "iat": now(), "exp": now() + 60}),
            "c2lnbmF0dXJl",
        );
        assert!(matches!(keys.verifier().verify(&token), Err(AuthError::TokenMalformed(_))));
    }

    #[test]
    fn test_missing_claims_are_malformed() {
        let keys = AssertionKeyPair::generate();
        let issuer = keys.issuer(DEFAULT_ASSERTION_TTL);
        let encoding = issuer.encoding.clone();

        // Signed correctly but without the permissions claim.
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::EdDSA),
            &json!({"sub": "svc", "iat": now(), "exp": now() + 60}),
            &encoding,
        )
        .unwrap();
        assert!(matches!(keys.verifier().verify(&token), Err(AuthError::TokenMalformed(_))));

        // And without an expiry.
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::EdDSA),
            &json!({"sub": "svc", "permissions": [], "iat": now()}),
            &encoding,
        )
        .unwrap();
        assert!(matches!(keys.verifier().verify(&token), Err(AuthError::TokenMalformed(_))));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let keys = AssertionKeyPair::generate();
        for token in ["eyJ", "eyJhbGciOi.broken", "eyJ.eyJ.eyJ", "not-a-jwt"] {
            assert!(
                matches!(keys.verifier().verify(token), Err(AuthError::TokenMalformed(_))),
                "{token} should be malformed"
            );
        }
    }

    #[test]
    fn test_seed_round_trip_through_base64url() {
        let seed = [7u8; 32];
        let from_seed = AssertionKeyPair::from_seed(&seed);
        let from_b64 = AssertionKeyPair::from_base64url(&URL_SAFE_NO_PAD.encode(seed)).unwrap();

        let token = from_seed.issuer(DEFAULT_ASSERTION_TTL).issue("svc", &perms()).unwrap().token;
        assert!(from_b64.verifier().verify(&token).is_ok());
    }

    #[test]
    fn test_bad_seed_rejected() {
        assert!(AssertionKeyPair::from_base64url("!!!").is_err());
        assert!(AssertionKeyPair::from_base64url(&URL_SAFE_NO_PAD.encode([1u8; 16])).is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(AssertionConfig::builder().ttl(Duration::from_millis(10)).build().is_err());
        assert_eq!(AssertionConfig::builder().build().unwrap().ttl(), DEFAULT_ASSERTION_TTL);
        let config: AssertionConfig = serde_json::from_str(r#"{"ttl":"2h"}"#).unwrap();
        assert_eq!(config.ttl(), Duration::from_secs(7200));
    }
}
