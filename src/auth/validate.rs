//! Offline claim validation.
//!
//! Cheap checks that reject obviously unusable tokens before any network
//! call. No signature is checked here.

use chrono::{DateTime, Utc};

use super::claims::TokenClaims;

/// Reasons a token fails offline validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OfflineValidationError {
    /// `exp` is at or before the current time.
    #[error("token expired at {0}")]
    Expired(DateTime<Utc>),

    /// `nbf` is after the current time.
    #[error("token not valid before {0}")]
    NotYetValid(DateTime<Utc>),

    /// The expected audience is not among the token's audiences.
    #[error("token audience does not include '{0}'")]
    AudienceMismatch(String),
}

/// Validate `claims` against the current time and `expected_audience`.
///
/// An empty `expected_audience` accepts any audience.
pub fn validate(claims: &TokenClaims, expected_audience: &str) -> Result<(), OfflineValidationError> {
    validate_at(claims, expected_audience, Utc::now())
}

/// [`validate`] with an explicit clock.
pub fn validate_at(
    claims: &TokenClaims,
    expected_audience: &str,
    now: DateTime<Utc>,
) -> Result<(), OfflineValidationError> {
    if let Some(exp) = claims.expires_at() {
        if now >= exp {
            return Err(OfflineValidationError::Expired(exp));
        }
    }

    if let Some(nbf) = claims.not_before() {
        if now < nbf {
            return Err(OfflineValidationError::NotYetValid(nbf));
        }
    }

    if !expected_audience.is_empty() && !claims.audiences().contains(expected_audience) {
        return Err(OfflineValidationError::AudienceMismatch(
            expected_audience.to_string(),
        ));
    }

    Ok(())
}
