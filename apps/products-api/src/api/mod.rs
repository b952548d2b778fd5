//! API routes module

pub mod session;

use axum::Router;
use axum_helpers::{AuthState, rpc_auth_middleware};

/// Create all API routes; everything here requires a validated bearer token.
pub fn routes(auth: AuthState) -> Router {
    Router::new()
        .nest("/session", session::router())
        .layer(axum::middleware::from_fn_with_state(auth, rpc_auth_middleware))
}
