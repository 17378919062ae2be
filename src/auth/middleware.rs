//! Authorization middleware.
//!
//! Every request is either forwarded or rejected with `401` here, before any
//! protocol handler sees it:
//!
//! ```text
//! public path?            -> forward
//! auth not required?      -> forward
//! Bearer header?          -> no:  401 missing_token
//! parse + offline checks  -> fail: 401 invalid_token
//! OIDC verify (optional)  -> fail: 401 invalid_token
//! exchange (optional)     -> fail: 401 invalid_token
//! token review            -> deny: 401 invalid_token
//!                         -> allow: forward with TokenScopes + AuthenticatedUser
//! ```

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, info, warn};

use super::claims::TokenClaims;
use super::error::{AuthError, Challenge};
use super::exchange::{TOKEN_EXCHANGE_GRANT_TYPE, TokenExchanger};
use super::oidc::OidcProvider;
use super::review::{KubernetesTokenReviewer, TokenReviewer};
use super::validate;
use crate::config::AuthConfig;
use crate::{Error, Result};

/// Liveness endpoint.
pub const HEALTH_PATH: &str = "/healthz";
/// Protected resource metadata endpoint (RFC 9728).
pub const PROTECTED_RESOURCE_METADATA_PATH: &str = "/.well-known/oauth-protected-resource";

const WELL_KNOWN_PREFIX: &str = "/.well-known/";

/// Paths that never require a credential.
const PUBLIC_PATHS: [&str; 4] = [
    HEALTH_PATH,
    "/.well-known/oauth-authorization-server",
    PROTECTED_RESOURCE_METADATA_PATH,
    "/.well-known/openid-configuration",
];

/// Check if a path bypasses authorization.
#[must_use]
pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path) || path.starts_with(WELL_KNOWN_PREFIX)
}

/// Scopes of the presented token, attached to authorized requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenScopes(BTreeSet<String>);

impl TokenScopes {
    /// Check if `scope` was granted.
    #[must_use]
    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    /// Iterate over granted scopes in lexical order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Whether no scope was granted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeSet<String>> for TokenScopes {
    fn from(scopes: BTreeSet<String>) -> Self {
        Self(scopes)
    }
}

/// Identity reported by the token review, attached to authorized requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// Username.
    pub username: Option<String>,
    /// Group memberships.
    pub groups: Vec<String>,
}

/// Outcome of a successful authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    /// Scopes from the presented token.
    pub scopes: TokenScopes,
    /// Identity from the token review.
    pub user: AuthenticatedUser,
}

/// The per-request decision procedure and its collaborators.
///
/// Built once at startup and shared by every request; holds no per-request
/// state.
pub struct AuthPipeline {
    require_auth: bool,
    realm: String,
    audience: String,
    audience_override: bool,
    resource_metadata: Option<String>,
    request_timeout: Duration,
    oidc: Option<OidcProvider>,
    exchanger: Option<TokenExchanger>,
    reviewer: Arc<dyn TokenReviewer>,
}

impl AuthPipeline {
    /// Create a pipeline with no OIDC issuer and no token exchange.
    #[must_use]
    pub fn new(config: &AuthConfig, reviewer: Arc<dyn TokenReviewer>) -> Self {
        Self {
            require_auth: config.require_auth,
            realm: config.realm.clone(),
            audience: config.effective_audience().to_string(),
            audience_override: config.has_audience_override(),
            resource_metadata: config.server_url.as_deref().map(|url| {
                format!(
                    "{}{PROTECTED_RESOURCE_METADATA_PATH}",
                    url.trim_end_matches('/')
                )
            }),
            request_timeout: config.request_timeout,
            oidc: None,
            exchanger: None,
            reviewer,
        }
    }

    /// Verify tokens against `provider` before review.
    #[must_use]
    pub fn with_oidc(mut self, provider: OidcProvider) -> Self {
        self.oidc = Some(provider);
        self
    }

    /// Exchange OIDC-verified tokens before review.
    ///
    /// Exchange only runs when an OIDC provider is also configured.
    #[must_use]
    pub fn with_token_exchanger(mut self, exchanger: TokenExchanger) -> Self {
        self.exchanger = Some(exchanger);
        self
    }

    /// Build the pipeline and its collaborators from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend client cannot be built, the issuer
    /// cannot be discovered, or token exchange is configured against an issuer
    /// without a token endpoint.
    pub async fn from_config(config: &AuthConfig) -> Result<Self> {
        let reviewer =
            KubernetesTokenReviewer::from_config(&config.backend, config.request_timeout)?;
        let mut pipeline = Self::new(config, Arc::new(reviewer));

        let Some(issuer_url) = &config.issuer_url else {
            if config.token_exchange.is_partially_set() {
                warn!("Token exchange configured without an OIDC issuer, exchange disabled");
            }
            return Ok(pipeline);
        };

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let provider =
            OidcProvider::discover(http.clone(), issuer_url, config.jwks_cache_ttl).await?;

        let exchange = &config.token_exchange;
        if exchange.is_complete() {
            let token_endpoint = provider.token_endpoint().ok_or_else(|| {
                Error::Config(format!(
                    "Token exchange configured but issuer {issuer_url} has no token_endpoint"
                ))
            })?;
            let exchanger = TokenExchanger::new(
                http,
                token_endpoint,
                exchange.client_id.clone().unwrap_or_default(),
                exchange.client_secret.clone().unwrap_or_default(),
                exchange.audience.clone().unwrap_or_default(),
                exchange.scopes.clone(),
            );
            if !provider.supports_grant(TOKEN_EXCHANGE_GRANT_TYPE) {
                warn!(
                    issuer = %provider.issuer(),
                    "Issuer does not advertise the token-exchange grant, exchanges may fail"
                );
            }
            info!(audience = %exchanger.audience(), "Token exchange enabled");
            pipeline = pipeline.with_token_exchanger(exchanger);
        } else if exchange.is_partially_set() {
            warn!("Token exchange needs client_id, client_secret and audience, exchange disabled");
        }

        Ok(pipeline.with_oidc(provider))
    }

    /// Whether requests must carry a bearer token.
    pub fn requires_auth(&self) -> bool {
        self.require_auth
    }

    /// Run the decision procedure under the configured deadline.
    ///
    /// # Errors
    ///
    /// Returns the [`AuthError`] that ended the procedure.
    pub async fn authorize(
        &self,
        authorization: Option<&HeaderValue>,
    ) -> std::result::Result<Authorization, AuthError> {
        tokio::time::timeout(self.request_timeout, self.decide(authorization))
            .await
            .map_err(|_| AuthError::DeadlineExceeded(self.request_timeout))?
    }

    async fn decide(
        &self,
        authorization: Option<&HeaderValue>,
    ) -> std::result::Result<Authorization, AuthError> {
        let token = extract_bearer(authorization).ok_or(AuthError::MissingOrMalformedHeader)?;

        let claims = TokenClaims::parse(token)?;
        validate::validate(&claims, &self.audience)?;

        let mut exchanged = None;
        if let Some(oidc) = &self.oidc {
            oidc.verify(claims.raw_token(), &self.audience).await?;

            if let Some(exchanger) = &self.exchanger {
                let result = exchanger.exchange(claims.raw_token()).await.inspect_err(|e| {
                    warn!(error = %e, "token exchange failed");
                })?;
                exchanged = Some(result.access_token);
            }
        }

        let credential = exchanged.as_deref().unwrap_or_else(|| claims.raw_token());
        let outcome = self.reviewer.review(credential, &self.audience).await?;
        if !outcome.allowed {
            return Err(AuthError::Denied(outcome.error.unwrap_or_default()));
        }

        Ok(Authorization {
            scopes: TokenScopes::from(claims.scopes()),
            user: AuthenticatedUser {
                username: outcome.subject,
                groups: outcome.groups,
            },
        })
    }

    /// `WWW-Authenticate` value for a rejection.
    #[must_use]
    pub fn challenge_header(&self, challenge: Challenge) -> String {
        let mut value = format!("Bearer realm=\"{}\"", self.realm);
        if self.audience_override {
            let _ = write!(value, ", audience=\"{}\"", self.audience);
        }
        if let Some(url) = &self.resource_metadata {
            let _ = write!(value, ", resource_metadata=\"{url}\"");
        }
        let _ = write!(value, ", error=\"{challenge}\"");
        value
    }

    fn reject(&self, challenge: Challenge) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, self.challenge_header(challenge))],
            challenge.message(),
        )
            .into_response()
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
fn extract_bearer(value: Option<&HeaderValue>) -> Option<&str> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
}

/// Authorization middleware
pub async fn auth_middleware(
    State(pipeline): State<Arc<AuthPipeline>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();

    if is_public_path(path) {
        debug!(path = %path, "Public path, skipping auth");
        return next.run(request).await;
    }

    if !pipeline.require_auth {
        return next.run(request).await;
    }

    let decision = pipeline
        .authorize(request.headers().get(header::AUTHORIZATION))
        .await;

    match decision {
        Ok(authorization) => {
            debug!(
                path = %path,
                user = authorization.user.username.as_deref().unwrap_or("-"),
                "Authorized request"
            );
            request.extensions_mut().insert(authorization.scopes);
            request.extensions_mut().insert(authorization.user);
            next.run(request).await
        }
        Err(e) => {
            let remote_addr = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.to_string());
            debug!(
                method = %request.method(),
                path = %path,
                remote_addr = remote_addr.as_deref().unwrap_or("-"),
                reason = %e,
                "Authentication failed"
            );
            pipeline.reject(e.challenge())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::review::{AuthorizationOutcome, ReviewError};
    use async_trait::async_trait;

    struct AllowAll;

    #[async_trait]
    impl TokenReviewer for AllowAll {
        async fn review(
            &self,
            _token: &str,
            _audience: &str,
        ) -> std::result::Result<AuthorizationOutcome, ReviewError> {
            Ok(AuthorizationOutcome {
                allowed: true,
                ..Default::default()
            })
        }
    }

    fn pipeline(config: &AuthConfig) -> AuthPipeline {
        AuthPipeline::new(config, Arc::new(AllowAll))
    }

    #[test]
    fn test_public_path_check() {
        assert!(is_public_path("/healthz"));
        assert!(is_public_path("/.well-known/oauth-protected-resource"));
        assert!(is_public_path("/.well-known/oauth-authorization-server"));
        assert!(is_public_path("/.well-known/openid-configuration"));
        assert!(is_public_path("/.well-known/oauth-protected-resource/mcp"));
        assert!(!is_public_path("/healthz/extra"));
        assert!(!is_public_path("/mcp"));
        assert!(!is_public_path("/sse"));
        assert!(!is_public_path("/"));
    }

    #[test]
    fn test_extract_bearer() {
        let value = HeaderValue::from_static("Bearer abc.def.ghi");
        assert_eq!(extract_bearer(Some(&value)), Some("abc.def.ghi"));

        assert_eq!(extract_bearer(None), None);
        assert_eq!(extract_bearer(Some(&HeaderValue::from_static(""))), None);
        assert_eq!(extract_bearer(Some(&HeaderValue::from_static("Bearer "))), None);
        assert_eq!(extract_bearer(Some(&HeaderValue::from_static("Basic dXNlcjpwYXNz"))), None);
        assert_eq!(extract_bearer(Some(&HeaderValue::from_static("bearer abc"))), None);
    }

    #[test]
    fn test_challenge_default_audience_omitted() {
        let p = pipeline(&AuthConfig::default());

        assert_eq!(
            p.challenge_header(Challenge::MissingToken),
            r#"Bearer realm="Kubernetes MCP Server", error="missing_token""#
        );
    }

    #[test]
    fn test_challenge_with_audience_and_resource_metadata() {
        let config = AuthConfig {
            audience: "my-cluster".to_string(),
            server_url: Some("https://mcp.example.com/".to_string()),
            ..Default::default()
        };

        assert_eq!(
            pipeline(&config).challenge_header(Challenge::InvalidToken),
            concat!(
                r#"Bearer realm="Kubernetes MCP Server", audience="my-cluster", "#,
                r#"resource_metadata="https://mcp.example.com/.well-known/oauth-protected-resource", "#,
                r#"error="invalid_token""#
            )
        );
    }

    #[tokio::test]
    async fn test_missing_header_is_missing_token() {
        let p = pipeline(&AuthConfig::default());

        let err = p.authorize(None).await.unwrap_err();

        assert!(matches!(err, AuthError::MissingOrMalformedHeader));
    }

    #[tokio::test]
    async fn test_scopes_come_from_presented_token() {
        use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

        let body = URL_SAFE_NO_PAD.encode(r#"{"aud":"mcp-server","scope":"read list"}"#);
        let value = HeaderValue::from_str(&format!("Bearer e30.{body}.sig")).unwrap();

        let auth = pipeline(&AuthConfig::default())
            .authorize(Some(&value))
            .await
            .unwrap();

        assert!(auth.scopes.contains("read"));
        assert!(auth.scopes.contains("list"));
        assert_eq!(auth.scopes.iter().collect::<Vec<_>>(), vec!["list", "read"]);
    }
}
