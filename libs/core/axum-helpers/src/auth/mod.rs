//! Bearer-token authentication.
//!
//! - [`rpc_auth_middleware`]: every request is checked by a [`TokenValidator`],
//!   normally the broker-backed [`RpcClient`](messaging::RpcClient)
//! - [`JwtVerifier`]: local HMAC verification for tokens that arrive as events
//!
//! # Example
//!
//! ```ignore
//! use axum_helpers::auth::{AuthState, rpc_auth_middleware};
//!
//! let rpc = RpcClient::new(broker.clone(), RpcConfig::from(&broker_config));
//! let auth = AuthState::new(Arc::new(rpc)).with_shutdown(coordinator.cancellation_token());
//!
//! let protected = Router::new()
//!     .route("/api/session", get(handler))
//!     .layer(axum::middleware::from_fn_with_state(auth, rpc_auth_middleware));
//! ```

pub mod config;
pub mod jwt;
pub mod middleware;

pub use config::JwtConfig;
pub use jwt::{JwtVerifier, TokenClaims};
pub use middleware::{
    AuthState, AuthenticatedToken, TokenValidator, extract_bearer_token, rpc_auth_middleware,
};
