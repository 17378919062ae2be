//! Backend authorization via Kubernetes `TokenReview`.
//!
//! The protected cluster is the final authority on a bearer token: it checks
//! the signature against its own trust root and reports the identity and
//! groups. A token that passed every local check can still be rejected here.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, Client};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::BackendConfig;
use crate::{Error, Result};

/// Path of the `TokenReview` collection on the API server.
pub const TOKEN_REVIEW_PATH: &str = "/apis/authentication.k8s.io/v1/tokenreviews";

/// Error variants for a token review call that could not complete.
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    /// The API server could not be reached.
    #[error("token review request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API server refused the review request itself.
    #[error("token review returned HTTP {0}")]
    Status(u16),
}

/// Result of a completed token review.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationOutcome {
    /// Whether the backend accepted the token.
    pub allowed: bool,
    /// Username the token maps to.
    pub subject: Option<String>,
    /// Group memberships.
    pub groups: Vec<String>,
    /// Reason reported by the backend for a denial.
    pub error: Option<String>,
}

/// A backend able to review bearer tokens.
#[async_trait]
pub trait TokenReviewer: Send + Sync {
    /// Review `token` for `audience`.
    async fn review(&self, token: &str, audience: &str) -> std::result::Result<AuthorizationOutcome, ReviewError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenReviewRequest<'a> {
    api_version: &'static str,
    kind: &'static str,
    spec: TokenReviewSpec<'a>,
}

#[derive(Serialize)]
struct TokenReviewSpec<'a> {
    token: &'a str,
    audiences: [&'a str; 1],
}

#[derive(Deserialize)]
struct TokenReviewResponse {
    #[serde(default)]
    status: TokenReviewStatus,
}

#[derive(Default, Deserialize)]
struct TokenReviewStatus {
    #[serde(default)]
    authenticated: bool,
    #[serde(default)]
    user: UserInfo,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Default, Deserialize)]
struct UserInfo {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    groups: Vec<String>,
}

/// [`TokenReviewer`] backed by a Kubernetes API server.
pub struct KubernetesTokenReviewer {
    http: Client,
    api_server: String,
    credential: Option<String>,
}

impl KubernetesTokenReviewer {
    /// Create a reviewer from an HTTP client, API server URL and the bearer
    /// credential the gateway itself presents.
    #[must_use]
    pub fn new(http: Client, api_server: impl Into<String>, credential: Option<String>) -> Self {
        Self {
            http,
            api_server: api_server.into().trim_end_matches('/').to_string(),
            credential,
        }
    }

    /// Build a reviewer from configuration, loading the CA bundle and the
    /// gateway's own token from disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the CA bundle or token file cannot be read
    /// or parsed, or the API server URL is invalid.
    pub fn from_config(config: &BackendConfig, timeout: Duration) -> Result<Self> {
        url::Url::parse(&config.api_server)
            .map_err(|e| Error::Config(format!("Invalid backend API server URL: {e}")))?;

        let mut builder = Client::builder().timeout(timeout);
        if let Some(ca_file) = &config.ca_file {
            builder = builder.add_root_certificate(load_ca_bundle(ca_file)?);
        }
        let http = builder.build()?;

        let credential = match (&config.token, &config.token_file) {
            (Some(token), _) => Some(token.clone()),
            (None, Some(path)) => Some(
                std::fs::read_to_string(path)
                    .map_err(|e| {
                        Error::Config(format!("Cannot read token file {}: {e}", path.display()))
                    })?
                    .trim()
                    .to_string(),
            ),
            (None, None) => None,
        };

        Ok(Self::new(http, config.api_server.clone(), credential))
    }
}

/// Read a PEM CA bundle.
fn load_ca_bundle(path: &Path) -> Result<Certificate> {
    let pem = std::fs::read(path)
        .map_err(|e| Error::Config(format!("Cannot read CA file {}: {e}", path.display())))?;
    if !String::from_utf8_lossy(&pem).contains("-----BEGIN CERTIFICATE-----") {
        return Err(Error::Config(format!(
            "CA file {} contains no PEM certificates",
            path.display()
        )));
    }
    Certificate::from_pem(&pem)
        .map_err(|e| Error::Config(format!("Invalid CA file {}: {e}", path.display())))
}

#[async_trait]
impl TokenReviewer for KubernetesTokenReviewer {
    async fn review(&self, token: &str, audience: &str) -> std::result::Result<AuthorizationOutcome, ReviewError> {
        let body = TokenReviewRequest {
            api_version: "authentication.k8s.io/v1",
            kind: "TokenReview",
            spec: TokenReviewSpec {
                token,
                audiences: [audience],
            },
        };

        let mut request = self
            .http
            .post(format!("{}{TOKEN_REVIEW_PATH}", self.api_server))
            .json(&body);
        if let Some(credential) = &self.credential {
            request = request.bearer_auth(credential);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ReviewError::Status(response.status().as_u16()));
        }

        let review: TokenReviewResponse = response.json().await?;
        let status = review.status;
        debug!(
            authenticated = status.authenticated,
            username = status.user.username.as_deref().unwrap_or("-"),
            "Token review completed"
        );

        Ok(AuthorizationOutcome {
            allowed: status.authenticated,
            subject: status.user.username,
            groups: status.user.groups,
            error: status.error,
        })
    }
}
