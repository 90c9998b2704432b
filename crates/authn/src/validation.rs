//! Signed assertion algorithm policy.
//!
//! Only EdDSA (Ed25519) assertions are accepted. The header algorithm is
//! checked before any signature work so that `none` and symmetric
//! algorithms are rejected up front with a clear reason.

use crate::error::AuthError;

/// Algorithms that are never accepted.
///
/// - `none`: no signature at all
/// - `HS256`, `HS384`, `HS512`: symmetric, so any verifier could also mint
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Accepted algorithms.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["EdDSA"];

/// Validates an assertion header algorithm.
///
/// # Errors
///
/// Returns [`AuthError::TokenMalformed`] if the algorithm is forbidden or
/// not in [`ACCEPTED_ALGORITHMS`].
///
/// # Examples
///
/// ```
/// use admission_authn::validation::validate_algorithm;
///
/// assert!(validate_algorithm("EdDSA").is_ok());
/// assert!(validate_algorithm("HS256").is_err());
/// assert!(validate_algorithm("RS256").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<(), AuthError> {
    if FORBIDDEN_ALGORITHMS.contains(&alg) {
        return Err(AuthError::token_malformed(format!("algorithm '{alg}' is not allowed")));
    }
    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::token_malformed(format!(
            "algorithm '{alg}' is not accepted (only EdDSA is supported)"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_eddsa_accepted() {
        assert!(validate_algorithm("EdDSA").is_ok());
    }

    #[rstest]
    #[case("none")]
    #[case("HS256")]
    #[case("HS384")]
    #[case("HS512")]
    fn test_forbidden_algorithms_rejected(#[case] alg: &str) {
        assert!(
            matches!(validate_algorithm(alg), Err(AuthError::TokenMalformed(ref msg)) if msg.contains("not allowed"))
        );
    }

    #[rstest]
    #[case("RS256")]
    #[case("ES256")]
    #[case("")]
    fn test_unlisted_algorithms_rejected(#[case] alg: &str) {
        assert!(
            matches!(validate_algorithm(alg), Err(AuthError::TokenMalformed(ref msg)) if msg.contains("not accepted"))
        );
    }
}
