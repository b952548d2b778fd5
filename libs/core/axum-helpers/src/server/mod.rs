//! Server infrastructure module.
//!
//! This module provides:
//! - Router assembly with request tracing
//! - Health, readiness and metrics endpoints
//! - Graceful shutdown coordination
//!
//! # Example
//!
//! ```ignore
//! use axum_helpers::server::{create_production_app, create_router, health_router};
//! use core_config::app_info;
//!
//! let app = create_router(api_routes).merge(health_router(app_info!(), broker.health()));
//! create_production_app(app, &server_config, coordinator, cleanup).await?;
//! ```

pub mod app;
pub mod health;
pub mod shutdown;

pub use app::{create_production_app, create_router};
pub use health::{HealthResponse, ReadyResponse, health_router, metrics_router};
pub use shutdown::ShutdownCoordinator;
