//! Configuration management

use std::{env, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Audience expected when no override is configured.
pub const DEFAULT_AUDIENCE: &str = "mcp-server";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `${VAR}` resolution.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
}

/// Authentication configuration for gateway access
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Require a bearer token on every non-public path (default: false)
    pub require_auth: bool,

    /// Audience override. Empty means [`DEFAULT_AUDIENCE`].
    pub audience: String,

    /// OIDC issuer URL. When set, tokens must carry a valid issuer signature.
    pub issuer_url: Option<String>,

    /// Public URL of this server, advertised in `resource_metadata`
    pub server_url: Option<String>,

    /// Realm reported in `WWW-Authenticate`
    pub realm: String,

    /// Deadline for the whole authorization decision of one request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// How long a fetched JWKS is trusted before re-fetching
    #[serde(with = "humantime_serde")]
    pub jwks_cache_ttl: Duration,

    /// Token review backend
    pub backend: BackendConfig,

    /// OAuth 2.0 token exchange settings
    pub token_exchange: TokenExchangeConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            require_auth: false,
            audience: String::new(),
            issuer_url: None,
            server_url: None,
            realm: "Kubernetes MCP Server".to_string(),
            request_timeout: Duration::from_secs(30),
            jwks_cache_ttl: Duration::from_secs(3600),
            backend: BackendConfig::default(),
            token_exchange: TokenExchangeConfig::default(),
        }
    }
}

impl AuthConfig {
    /// The audience override if set, otherwise [`DEFAULT_AUDIENCE`].
    #[must_use]
    pub fn effective_audience(&self) -> &str {
        if self.audience.is_empty() {
            DEFAULT_AUDIENCE
        } else {
            &self.audience
        }
    }

    /// Whether an audience override is configured.
    #[must_use]
    pub fn has_audience_override(&self) -> bool {
        !self.audience.is_empty()
    }
}

/// Kubernetes API server used for token review
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// API server URL
    pub api_server: String,
    /// PEM CA bundle trusted for the API server
    pub ca_file: Option<PathBuf>,
    /// Bearer token the gateway presents (supports `${VAR}`)
    pub token: Option<String>,
    /// File holding the bearer token the gateway presents
    pub token_file: Option<PathBuf>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_server: "https://kubernetes.default.svc".to_string(),
            ca_file: None,
            token: None,
            token_file: None,
        }
    }
}

/// OAuth 2.0 token exchange configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenExchangeConfig {
    /// OAuth client ID
    pub client_id: Option<String>,
    /// OAuth client secret (supports `${VAR}`)
    pub client_secret: Option<String>,
    /// Audience requested for exchanged tokens
    pub audience: Option<String>,
    /// Scopes requested for exchanged tokens
    pub scopes: Vec<String>,
}

impl TokenExchangeConfig {
    /// Whether client credentials and a target audience are all present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        [&self.client_id, &self.client_secret, &self.audience]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.is_empty()))
    }

    /// Whether any exchange setting has been provided.
    #[must_use]
    pub fn is_partially_set(&self) -> bool {
        self.client_id.is_some()
            || self.client_secret.is_some()
            || self.audience.is_some()
            || !self.scopes.is_empty()
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (MCP_AUTH_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("MCP_AUTH_GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();

        // Expand ${VAR} in secrets
        config.expand_env_vars();

        Ok(config)
    }

    /// Check settings that cannot be expressed in the schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a malformed issuer or server URL.
    pub fn validate(&self) -> Result<()> {
        if let Some(issuer) = &self.auth.issuer_url {
            url::Url::parse(issuer)
                .map_err(|e| Error::Config(format!("Invalid issuer URL '{issuer}': {e}")))?;
        }
        if let Some(server_url) = &self.auth.server_url {
            url::Url::parse(server_url)
                .map_err(|e| Error::Config(format!("Invalid server URL '{server_url}': {e}")))?;
        }
        Ok(())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in secret values
    fn expand_env_vars(&mut self) {
        // Pattern: ${VAR} or ${VAR:-default}
        let Ok(re) = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
            return;
        };

        for value in [
            &mut self.auth.token_exchange.client_secret,
            &mut self.auth.token_exchange.client_id,
            &mut self.auth.backend.token,
        ]
        .into_iter()
        .flatten()
        {
            *value = Self::expand_string(&re, value);
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            scaled_secs(mins, 60)
        } else if let Some(hours) = s.strip_suffix('h') {
            scaled_secs(hours, 3600)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }

    fn scaled_secs<E: serde::de::Error>(value: &str, unit: u64) -> Result<Duration, E> {
        let n = value.parse::<u64>().map_err(E::custom)?;
        n.checked_mul(unit)
            .map(Duration::from_secs)
            .ok_or_else(|| E::custom(format!("duration '{value}' x {unit}s overflows")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_effective_audience_defaults() {
        let auth = AuthConfig::default();
        assert_eq!(auth.effective_audience(), DEFAULT_AUDIENCE);
        assert!(!auth.has_audience_override());

        let auth = AuthConfig {
            audience: "my-cluster".to_string(),
            ..Default::default()
        };
        assert_eq!(auth.effective_audience(), "my-cluster");
        assert!(auth.has_audience_override());
    }

    #[test]
    fn test_token_exchange_completeness() {
        let mut cfg = TokenExchangeConfig::default();
        assert!(!cfg.is_complete());
        assert!(!cfg.is_partially_set());

        cfg.client_id = Some("gateway".to_string());
        cfg.client_secret = Some("s3cret".to_string());
        assert!(!cfg.is_complete());
        assert!(cfg.is_partially_set());

        cfg.audience = Some(String::new());
        assert!(!cfg.is_complete());

        cfg.audience = Some("kubernetes".to_string());
        assert!(cfg.is_complete());
    }

    #[test]
    fn test_load_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        std::fs::write(
            &path,
            r#"
server:
  port: 9000
auth:
  require_auth: true
  audience: "my-cluster"
  issuer_url: "https://sso.example.com/realms/mcp"
  request_timeout: "500ms"
  jwks_cache_ttl: "2h"
  backend:
    api_server: "https://10.0.0.1:6443"
    ca_file: "/etc/mcp/ca.crt"
  token_exchange:
    client_id: "mcp-gateway"
    client_secret: "${MCP_AUTH_GW_TEST_SECRET:-fallback}"
    audience: "kubernetes"
    scopes: ["openid", "groups"]
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();

        assert_eq!(config.server.port, 9000);
        assert!(config.auth.require_auth);
        assert_eq!(config.auth.effective_audience(), "my-cluster");
        assert_eq!(config.auth.request_timeout, Duration::from_millis(500));
        assert_eq!(config.auth.jwks_cache_ttl, Duration::from_secs(7200));
        assert_eq!(config.auth.backend.api_server, "https://10.0.0.1:6443");
        assert_eq!(
            config.auth.token_exchange.client_secret.as_deref(),
            Some("fallback")
        );
        assert!(config.auth.token_exchange.is_complete());
        assert_eq!(config.auth.token_exchange.scopes, vec!["openid", "groups"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = Config::load(Some(Path::new("/nonexistent/gateway.yaml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_validate_rejects_malformed_issuer() {
        let mut config = Config::default();
        config.auth.issuer_url = Some("not a url".to_string());

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_env_files_sets_env_vars() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("test.env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "MCP_AUTH_GW_TEST_KEY_A=hello_from_env_file").unwrap();
        drop(f);

        let config = Config {
            env_files: vec![env_path.to_string_lossy().to_string()],
            ..Default::default()
        };
        config.load_env_files();

        assert_eq!(env::var("MCP_AUTH_GW_TEST_KEY_A").unwrap(), "hello_from_env_file");
    }

    #[test]
    fn test_load_env_files_skips_missing() {
        let config = Config {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        // Should not panic
        config.load_env_files();
    }

    #[test]
    fn test_duration_overflow_is_an_error() {
        // GIVEN: minute and hour values whose seconds do not fit in u64
        let mins = format!("auth:\n  request_timeout: \"{}m\"\n", u64::MAX / 10);
        let hours = format!("auth:\n  jwks_cache_ttl: \"{}h\"\n", u64::MAX / 100);

        // THEN: rejected instead of wrapping or panicking
        assert!(serde_yaml::from_str::<Config>(&mins).is_err());
        assert!(serde_yaml::from_str::<Config>(&hours).is_err());

        let ok: Config = serde_yaml::from_str("auth:\n  request_timeout: \"2m\"\n").unwrap();
        assert_eq!(ok.auth.request_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_defaults_deserialized_from_empty_yaml() {
        let config: Config = serde_yaml::from_str("{}").unwrap();

        assert!(!config.auth.require_auth);
        assert_eq!(config.auth.realm, "Kubernetes MCP Server");
        assert_eq!(config.auth.request_timeout, Duration::from_secs(30));
        assert_eq!(config.server.host, "127.0.0.1");
    }
}
