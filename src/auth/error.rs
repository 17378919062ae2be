//! Per-request authorization failures and their challenge codes.

use std::fmt;
use std::time::Duration;

use super::claims::ClaimsError;
use super::exchange::TokenExchangeError;
use super::oidc::OidcError;
use super::review::ReviewError;
use super::validate::OfflineValidationError;

/// Why a request was rejected. Local to one request, never retried.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No `Authorization: Bearer <token>` header.
    #[error("missing or malformed bearer token")]
    MissingOrMalformedHeader,

    /// The token could not be parsed.
    #[error("token could not be parsed: {0}")]
    ClaimsParse(#[from] ClaimsError),

    /// The token failed offline validation.
    #[error("token failed offline validation: {0}")]
    OfflineValidation(#[from] OfflineValidationError),

    /// The token failed OIDC verification.
    #[error("OIDC verification failed: {0}")]
    OidcVerification(#[from] OidcError),

    /// The token could not be exchanged.
    #[error("token exchange failed: {0}")]
    TokenExchange(#[from] TokenExchangeError),

    /// The token review call itself failed.
    #[error("backend authorization failed: {0}")]
    BackendAuthorization(#[from] ReviewError),

    /// The backend reviewed the token and rejected it.
    #[error("backend denied token: {0}")]
    Denied(String),

    /// The decision did not complete in time.
    #[error("authorization did not complete within {0:?}")]
    DeadlineExceeded(Duration),
}

impl AuthError {
    /// The challenge code reported to the client.
    #[must_use]
    pub fn challenge(&self) -> Challenge {
        match self {
            Self::MissingOrMalformedHeader => Challenge::MissingToken,
            _ => Challenge::InvalidToken,
        }
    }
}

/// `error` parameter of a `WWW-Authenticate: Bearer` challenge (RFC 6750 §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Challenge {
    /// No credential was presented.
    MissingToken,
    /// A credential was presented and rejected.
    InvalidToken,
}

impl Challenge {
    /// Wire value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidToken => "invalid_token",
        }
    }

    /// Human-readable response body.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::MissingToken => "Unauthorized: Bearer token required",
            Self::InvalidToken => "Unauthorized: Invalid token",
        }
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
