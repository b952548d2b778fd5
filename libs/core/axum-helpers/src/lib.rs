//! # Axum Helpers
//!
//! Utilities for the HTTP edge of a broker-backed service.
//!
//! ## Modules
//!
//! - **[`auth`]**: Bearer-token middleware backed by the broker RPC validator,
//!   local JWT verification
//! - **[`server`]**: Router setup, health/readiness/metrics endpoints, graceful shutdown

pub mod auth;
pub mod server;

// Re-export auth types
pub use auth::{
    AuthState, AuthenticatedToken, JwtConfig, JwtVerifier, TokenClaims, TokenValidator,
    extract_bearer_token, rpc_auth_middleware,
};

// Re-export server types
pub use server::{
    HealthResponse, ReadyResponse, ShutdownCoordinator, create_production_app, create_router,
    health_router, metrics_router,
};
