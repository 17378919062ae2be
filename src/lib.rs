//! MCP Auth Gateway Library
//!
//! Bearer-token authorization in front of a Model Context Protocol server
//! that operates a Kubernetes cluster.
//!
//! # Features
//!
//! - **Offline checks**: expiry, not-before and audience from the token itself
//! - **OIDC**: signature and issuer verification against a discovered JWKS
//! - **Token exchange**: RFC 8693 exchange of the caller's token before use
//! - **Token review**: the Kubernetes API server has the final say
//! - **Challenges**: RFC 6750 `WWW-Authenticate` on every rejection

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))?,
    }

    Ok(())
}
