//! Error types for the gateway
//!
//! These cover startup and serving. Failures of a single request's
//! authorization live in [`crate::auth::AuthError`] and never leave the
//! middleware.

use std::io;

use thiserror::Error;

use crate::auth::OidcError;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// OIDC issuer could not be discovered at startup
    #[error("OIDC provider error: {0}")]
    Oidc(#[from] OidcError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
