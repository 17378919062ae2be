//! OAuth 2.0 Token Exchange (RFC 8693) client.
//!
//! Trades an OIDC-verified subject token for an access token whose audience
//! is the protected backend. Exchanged tokens are scoped to a single request;
//! nothing is cached.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

/// RFC 8693 grant type.
pub const TOKEN_EXCHANGE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
/// Token type of the subject token we send.
pub const JWT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:jwt";
/// Token type we ask the issuer for.
pub const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";

/// Upper bound on how much of an error body is kept for diagnostics.
const BODY_EXCERPT_LEN: usize = 256;

/// Error variants for failed exchanges.
#[derive(Debug, thiserror::Error)]
pub enum TokenExchangeError {
    /// The token endpoint could not be reached.
    #[error("token endpoint request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The token endpoint answered with a non-success status.
    #[error("token endpoint returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Leading part of the response body.
        body: String,
    },

    /// The response body is not a token response.
    #[error("token endpoint response is not valid JSON: {0}")]
    InvalidResponse(#[from] serde_json::Error),

    /// The response has no usable `access_token`.
    #[error("token endpoint response has no access_token")]
    MissingAccessToken,
}

/// A freshly exchanged credential.
#[derive(Clone, PartialEq, Eq)]
pub struct ExchangeResult {
    /// The new opaque access token.
    pub access_token: String,
    /// Lifetime reported by the issuer, if any.
    pub expires_in: Option<Duration>,
}

impl std::fmt::Debug for ExchangeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeResult")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// OAuth token response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Token exchange client bound to one token endpoint and one set of client
/// credentials.
pub struct TokenExchanger {
    http: Client,
    token_endpoint: String,
    client_id: String,
    client_secret: String,
    audience: String,
    scopes: Vec<String>,
}

impl TokenExchanger {
    /// Create a new exchanger.
    #[must_use]
    pub fn new(
        http: Client,
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        audience: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            http,
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            audience: audience.into(),
            scopes,
        }
    }

    /// Target audience of exchanged tokens.
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Exchange `subject_token` for a backend-audienced access token.
    ///
    /// # Errors
    ///
    /// Returns [`TokenExchangeError`] on transport failure, a non-success
    /// status, an unparseable body or a missing `access_token`.
    pub async fn exchange(&self, subject_token: &str) -> Result<ExchangeResult, TokenExchangeError> {
        let scope = self.scopes.join(" ");
        let mut params = vec![
            ("grant_type", TOKEN_EXCHANGE_GRANT_TYPE),
            ("subject_token", subject_token),
            ("subject_token_type", JWT_TOKEN_TYPE),
            ("requested_token_type", ACCESS_TOKEN_TYPE),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("audience", self.audience.as_str()),
        ];
        if !scope.is_empty() {
            params.push(("scope", scope.as_str()));
        }

        debug!(endpoint = %self.token_endpoint, audience = %self.audience, "Exchanging token");

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(TokenExchangeError::Status {
                status: status.as_u16(),
                body: excerpt(&body),
            });
        }

        let token_response: TokenResponse = serde_json::from_str(&body)?;
        let access_token = token_response
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(TokenExchangeError::MissingAccessToken)?;

        Ok(ExchangeResult {
            access_token,
            expires_in: token_response.expires_in.map(Duration::from_secs),
        })
    }
}

/// Truncate `body` on a character boundary.
fn excerpt(body: &str) -> String {
    match body.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_keeps_short_bodies() {
        assert_eq!(excerpt("invalid_grant"), "invalid_grant");
    }

    #[test]
    fn excerpt_truncates_long_bodies() {
        let body = "é".repeat(1000);

        let out = excerpt(&body);

        assert_eq!(out.chars().count(), BODY_EXCERPT_LEN + 3);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn debug_redacts_access_token() {
        let result = ExchangeResult {
            access_token: "secret-token".to_string(),
            expires_in: Some(Duration::from_secs(300)),
        };

        assert!(!format!("{result:?}").contains("secret-token"));
    }
}
