//! Session endpoint

use axum::{routing::get, Extension, Json, Router};
use axum_helpers::AuthenticatedToken;
use serde::Serialize;

#[derive(Serialize)]
struct SessionResponse {
    authenticated: bool,
    token_length: usize,
}

/// Reports that the bearer token was accepted by the validator.
async fn session(Extension(token): Extension<AuthenticatedToken>) -> Json<SessionResponse> {
    Json(SessionResponse {
        authenticated: true,
        token_length: token.0.len(),
    })
}

pub fn router() -> Router {
    Router::new().route("/", get(session))
}
