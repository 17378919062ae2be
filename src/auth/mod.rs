//! Bearer-token authorization
//!
//! [`claims`] and [`validate`] work on the token alone. [`oidc`],
//! [`exchange`] and [`review`] talk to the identity provider and the
//! Kubernetes API server. [`middleware`] runs them in order for every request.

pub mod claims;
mod error;
pub mod exchange;
pub mod middleware;
pub mod oidc;
pub mod review;
pub mod validate;

pub use claims::{ClaimsError, TokenClaims};
pub use error::{AuthError, Challenge};
pub use exchange::{ExchangeResult, TokenExchangeError, TokenExchanger};
pub use middleware::{AuthPipeline, AuthenticatedUser, Authorization, TokenScopes, auth_middleware};
pub use oidc::{OidcError, OidcProvider};
pub use review::{AuthorizationOutcome, KubernetesTokenReviewer, ReviewError, TokenReviewer};
pub use validate::OfflineValidationError;
