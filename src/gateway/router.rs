//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::auth::middleware::HEALTH_PATH;
use crate::auth::{AuthPipeline, AuthenticatedUser, TokenScopes, auth_middleware};

/// Create the router
///
/// `protected` is mounted behind [`auth_middleware`]. The health endpoint
/// sits behind it too and is let through as a public path.
pub fn create_router(pipeline: Arc<AuthPipeline>, protected: Router) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health_handler))
        .merge(protected)
        // Authentication middleware (applied before other layers)
        .layer(middleware::from_fn_with_state(pipeline, auth_middleware))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Placeholder protocol endpoint: reports who the caller was authorized as.
pub fn protected_routes() -> Router {
    Router::new().route("/mcp", post(whoami_handler).get(whoami_handler))
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn whoami_handler(
    scopes: Option<Extension<TokenScopes>>,
    user: Option<Extension<AuthenticatedUser>>,
) -> impl IntoResponse {
    let scopes: Vec<String> = scopes
        .map(|Extension(s)| s.iter().map(String::from).collect())
        .unwrap_or_default();
    let user = user.map(|Extension(u)| u).unwrap_or_default();

    Json(json!({
        "authenticated": user.username.is_some() || !scopes.is_empty(),
        "username": user.username,
        "groups": user.groups,
        "scopes": scopes,
    }))
}
