//! Bearer token claims, parsed before any signature check.
//!
//! The payload of a compact JWT is decoded here **without** verifying the
//! signature. Trust in the token is established later, either by the OIDC
//! verifier or by the backend token review, which re-validates the raw token
//! against its own trust root. Nothing in this module may be used to make an
//! access decision on its own.

use std::collections::BTreeSet;
use std::fmt;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Error variants for malformed bearer tokens.
#[derive(Debug, thiserror::Error)]
pub enum ClaimsError {
    /// The token is not three dot-separated segments.
    #[error("token is not a compact JWT (expected 3 segments, found {0})")]
    Malformed(usize),

    /// The payload segment is not valid base64url.
    #[error("token payload is not valid base64url: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// The payload is not a JSON object with the expected claim types.
    #[error("token payload is not a valid claims object: {0}")]
    Payload(#[from] serde_json::Error),

    /// A numeric date claim is outside the representable range.
    #[error("claim '{0}' is not a valid timestamp")]
    Timestamp(&'static str),
}

/// Claims of an untrusted bearer token.
///
/// Immutable once constructed. The subject and raw token are redacted in
/// `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenClaims {
    issuer: Option<String>,
    subject: Option<String>,
    audiences: BTreeSet<String>,
    expires_at: Option<DateTime<Utc>>,
    not_before: Option<DateTime<Utc>>,
    issued_at: Option<DateTime<Utc>>,
    scope: Option<String>,
    raw: String,
}

/// Wire form of the registered claims we care about.
#[derive(Deserialize)]
struct RawClaims {
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default, deserialize_with = "deserialize_audience")]
    aud: BTreeSet<String>,
    #[serde(default)]
    exp: Option<serde_json::Number>,
    #[serde(default)]
    nbf: Option<serde_json::Number>,
    #[serde(default)]
    iat: Option<serde_json::Number>,
    #[serde(default)]
    scope: Option<String>,
}

/// `aud` may be a single string or an array of strings (RFC 7519 §4.1.3).
fn deserialize_audience<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    Ok(match Option::<StringOrVec>::deserialize(deserializer)? {
        Some(StringOrVec::String(s)) => BTreeSet::from([s]),
        Some(StringOrVec::Vec(v)) => v.into_iter().collect(),
        None => BTreeSet::new(),
    })
}

/// NumericDate (RFC 7519 §2) may be fractional; whole seconds are kept.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn timestamp(
    name: &'static str,
    value: Option<serde_json::Number>,
) -> Result<Option<DateTime<Utc>>, ClaimsError> {
    let Some(value) = value else {
        return Ok(None);
    };

    let secs = value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
            .map(|f| f.trunc() as i64)
    });

    secs.and_then(|s| DateTime::from_timestamp(s, 0))
        .map(Some)
        .ok_or(ClaimsError::Timestamp(name))
}

impl TokenClaims {
    /// Parse a compact JWT into claims without verifying its signature.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimsError`] if the token does not have three segments, the
    /// payload is not base64url, or the payload is not a claims object.
    pub fn parse(token: &str) -> Result<Self, ClaimsError> {
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return Err(ClaimsError::Malformed(segments.len()));
        }

        // Some issuers pad their segments even though RFC 7515 forbids it.
        let payload = URL_SAFE_NO_PAD.decode(segments[1].trim_end_matches('='))?;
        let raw: RawClaims = serde_json::from_slice(&payload)?;

        Ok(Self {
            issuer: raw.iss,
            subject: raw.sub,
            audiences: raw.aud,
            expires_at: timestamp("exp", raw.exp)?,
            not_before: timestamp("nbf", raw.nbf)?,
            issued_at: timestamp("iat", raw.iat)?,
            scope: raw.scope,
            raw: token.to_string(),
        })
    }

    /// Issuer (`iss`), if present.
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    /// Subject (`sub`), if present.
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Audiences (`aud`).
    pub fn audiences(&self) -> &BTreeSet<String> {
        &self.audiences
    }

    /// Expiry (`exp`), if present.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Not-before (`nbf`), if present.
    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.not_before
    }

    /// Issued-at (`iat`), if present.
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    /// The compact token these claims were parsed from.
    pub fn raw_token(&self) -> &str {
        &self.raw
    }

    /// Scopes from the space-delimited `scope` claim.
    ///
    /// A missing or blank claim yields an empty set.
    pub fn scopes(&self) -> BTreeSet<String> {
        self.scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(String::from)
            .collect()
    }

    /// Check whether the token carries `scope`.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope
            .as_deref()
            .is_some_and(|s| s.split_whitespace().any(|candidate| candidate == scope))
    }
}

impl fmt::Debug for TokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenClaims")
            .field("issuer", &self.issuer)
            .field("subject", &self.subject.as_ref().map(|_| "[REDACTED]"))
            .field("audiences", &self.audiences)
            .field("expires_at", &self.expires_at)
            .field("not_before", &self.not_before)
            .field("issued_at", &self.issued_at)
            .field("scope", &self.scope)
            .field("raw", &"[REDACTED]")
            .finish()
    }
}
