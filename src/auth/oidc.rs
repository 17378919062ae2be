//! OIDC token verification: issuer discovery, JWKS caching and JWT signature
//! validation.
//!
//! # Verification flow
//!
//! 1. At startup, [`OidcProvider::discover`] fetches the issuer's
//!    `/.well-known/openid-configuration` and checks that the advertised
//!    `issuer` matches the configured one exactly.
//! 2. Per request, the JWT header is decoded (no verification) to extract
//!    `kid` and `alg`.
//! 3. The issuer's JWKS is read from cache (refreshed after the TTL, and once
//!    more on an unknown `kid`).
//! 4. Signature, `iss`, `aud` and `exp` are verified by `jsonwebtoken`.
//!
//! # Security properties
//!
//! - Symmetric (`oct`) keys and `HS*`/`none` algorithms are never accepted.
//! - Unknown `kid` triggers a single cache refresh before failing, at most
//!   once every 10 seconds per key set.
//! - Clock leeway is 60 seconds.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::{
    Algorithm, DecodingKey, Header, TokenData, Validation,
    jwk::{AlgorithmParameters, JwkSet},
};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Path appended to the issuer URL for OIDC discovery.
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// Forced refreshes (unknown `kid`) closer together than this reuse the
/// cached key set.
const MIN_FORCED_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Error variants for OIDC discovery and verification failures.
#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    /// JWT decode / signature / claim verification failed.
    #[error("JWT verification failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// The JWT header contains no `kid` field.
    #[error("JWT missing 'kid' field in header")]
    MissingKeyId,

    /// The `kid` in the JWT header is not in the issuer's JWKS.
    #[error("Unknown key ID: {0}")]
    UnknownKeyId(String),

    /// The JWT header names an algorithm this verifier refuses.
    #[error("Unsupported JWT algorithm: {0:?}")]
    UnsupportedAlgorithm(Algorithm),

    /// Network or HTTP error while talking to the issuer.
    #[error("Issuer request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The issuer answered discovery or JWKS requests with a non-success status.
    #[error("Issuer returned HTTP {status} for {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// The discovery document names a different issuer.
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// Configured issuer URL.
        expected: String,
        /// Issuer advertised by the discovery document.
        actual: String,
    },
}

/// The subset of the OIDC discovery document this gateway uses.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier.
    pub issuer: String,
    /// JWKS endpoint.
    pub jwks_uri: String,
    /// OAuth2 token endpoint, used for token exchange.
    #[serde(default)]
    pub token_endpoint: Option<String>,
    /// Grant types the issuer supports.
    #[serde(default)]
    pub grant_types_supported: Vec<String>,
}

/// Claims of a token whose signature and standard claims have been verified.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifiedClaims {
    /// Issuer.
    pub iss: String,
    /// Subject.
    #[serde(default)]
    pub sub: Option<String>,
    /// Expiry (Unix timestamp).
    pub exp: i64,
}

/// Cached JWKS entry.
struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// JWKS cache, one entry per JWKS URI.
pub struct JwksCache {
    inner: DashMap<String, CachedJwks>,
    http: Client,
    ttl: Duration,
}

impl JwksCache {
    /// Create a cache that keeps fetched key sets for `ttl`.
    #[must_use]
    pub fn new(http: Client, ttl: Duration) -> Self {
        Self {
            inner: DashMap::new(),
            http,
            ttl,
        }
    }

    /// Return the cached JWKS for `jwks_uri`, or fetch it if stale.
    ///
    /// If `force_refresh` is `true`, the cache is bypassed regardless of TTL.
    pub async fn get_or_fetch(&self, jwks_uri: &str, force_refresh: bool) -> Result<JwkSet, OidcError> {
        if let Some(cached) = self.inner.get(jwks_uri) {
            let age = cached.fetched_at.elapsed();
            if age < self.ttl && (!force_refresh || age < MIN_FORCED_REFRESH_INTERVAL) {
                if force_refresh {
                    debug!(jwks_uri = %jwks_uri, "JWKS fetched recently, forced refresh skipped");
                }
                return Ok(cached.keys.clone());
            }
        }

        debug!(jwks_uri = %jwks_uri, "Fetching JWKS");
        let response = self.http.get(jwks_uri).send().await?;
        if !response.status().is_success() {
            return Err(OidcError::Status {
                status: response.status().as_u16(),
                url: jwks_uri.to_string(),
            });
        }
        let jwks: JwkSet = response.json().await?;

        self.inner.insert(
            jwks_uri.to_string(),
            CachedJwks {
                keys: jwks.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(jwks)
    }
}

/// A discovered OIDC issuer. Immutable for the life of the process apart from
/// its internal key cache.
pub struct OidcProvider {
    metadata: ProviderMetadata,
    jwks: JwksCache,
}

impl OidcProvider {
    /// Discover the issuer at `issuer_url`.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError`] if the discovery document cannot be fetched or
    /// parsed, or advertises a different issuer.
    pub async fn discover(http: Client, issuer_url: &str, jwks_ttl: Duration) -> Result<Self, OidcError> {
        if !issuer_url.starts_with("https://") {
            warn!(issuer = %issuer_url, "OIDC issuer is not HTTPS");
        }

        let url = format!("{}{DISCOVERY_PATH}", issuer_url.trim_end_matches('/'));
        debug!(url = %url, "Discovering OIDC provider metadata");

        let response = http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(OidcError::Status {
                status: response.status().as_u16(),
                url,
            });
        }
        let metadata: ProviderMetadata = response.json().await?;

        if metadata.issuer != issuer_url {
            return Err(OidcError::IssuerMismatch {
                expected: issuer_url.to_string(),
                actual: metadata.issuer,
            });
        }

        info!(
            issuer = %metadata.issuer,
            token_endpoint = metadata.token_endpoint.as_deref().unwrap_or("-"),
            "OIDC provider discovered"
        );

        Ok(Self::from_metadata(http, metadata, jwks_ttl))
    }

    /// Build a provider from already-known metadata.
    #[must_use]
    pub fn from_metadata(http: Client, metadata: ProviderMetadata, jwks_ttl: Duration) -> Self {
        Self {
            metadata,
            jwks: JwksCache::new(http, jwks_ttl),
        }
    }

    /// Issuer identifier.
    pub fn issuer(&self) -> &str {
        &self.metadata.issuer
    }

    /// Token endpoint advertised by the issuer, if any.
    pub fn token_endpoint(&self) -> Option<&str> {
        self.metadata.token_endpoint.as_deref()
    }

    /// Whether the issuer advertises `grant_type`. An issuer that lists no
    /// grant types is assumed to allow it.
    pub fn supports_grant(&self, grant_type: &str) -> bool {
        let grants = &self.metadata.grant_types_supported;
        grants.is_empty() || grants.iter().any(|g| g == grant_type)
    }

    /// Verify the signature and standard claims of `token` for `audience`.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError`] if the token is malformed, signed with an unknown
    /// or unsupported key, expired, or issued by or for someone else.
    pub async fn verify(&self, token: &str, audience: &str) -> Result<VerifiedClaims, OidcError> {
        let header = jsonwebtoken::decode_header(token)?;
        let validation = self.build_validation(&header, audience)?;

        let kid = header.kid.ok_or(OidcError::MissingKeyId)?;
        let decoding_key = self.find_decoding_key(&kid).await?;

        let token_data: TokenData<VerifiedClaims> =
            jsonwebtoken::decode(token, &decoding_key, &validation)?;
        Ok(token_data.claims)
    }

    /// Find a decoding key by `kid`, refreshing the JWKS cache if not found.
    async fn find_decoding_key(&self, kid: &str) -> Result<DecodingKey, OidcError> {
        let jwks_uri = &self.metadata.jwks_uri;

        let jwks = self.jwks.get_or_fetch(jwks_uri, false).await?;
        if let Some(key) = find_key_in_jwks(&jwks, kid) {
            return Ok(key);
        }

        debug!(kid = %kid, "Key not found in cached JWKS, refreshing");
        let jwks = self.jwks.get_or_fetch(jwks_uri, true).await?;
        find_key_in_jwks(&jwks, kid).ok_or_else(|| OidcError::UnknownKeyId(kid.to_string()))
    }

    fn build_validation(&self, header: &Header, audience: &str) -> Result<Validation, OidcError> {
        let alg = match header.alg {
            alg @ (Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
            | Algorithm::ES256
            | Algorithm::ES384
            | Algorithm::EdDSA) => alg,
            other => return Err(OidcError::UnsupportedAlgorithm(other)),
        };

        let mut v = Validation::new(alg);
        v.leeway = 60;
        v.set_issuer(&[self.metadata.issuer.as_str()]);
        v.set_audience(&[audience]);
        v.set_required_spec_claims(&["exp", "iss", "aud"]);
        Ok(v)
    }
}

/// Find a JWK by `kid` in a `JwkSet` and convert it to a `DecodingKey`.
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    let jwk = jwks
        .keys
        .iter()
        .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))?;

    match &jwk.algorithm {
        AlgorithmParameters::RSA(_)
        | AlgorithmParameters::EllipticCurve(_)
        | AlgorithmParameters::OctetKeyPair(_) => DecodingKey::from_jwk(jwk).ok(),
        AlgorithmParameters::OctetKey(_) => None,
    }
}
