use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use core_config::AppInfo;
use messaging::{BrokerHealth, HealthStatus};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub name: &'static str,
    pub version: &'static str,
    pub broker: HealthStatus,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub broker_connected: bool,
}

#[derive(Clone)]
struct HealthState {
    app: AppInfo,
    broker: BrokerHealth,
}

/// Liveness. Always 200 while the process runs; the body reports broker
/// state, which the supervisor repairs on its own.
async fn health_handler(State(state): State<HealthState>) -> Response {
    let broker = state.broker.status().await;
    let response = HealthResponse {
        status: broker.status.clone(),
        name: state.app.name,
        version: state.app.version,
        broker,
    };

    (StatusCode::OK, Json(response)).into_response()
}

/// Readiness. 503 until the broker connection is live, since no request
/// can be authenticated without it.
async fn ready_handler(State(state): State<HealthState>) -> Response {
    let broker_connected = state.broker.is_ready().await;
    let response = ReadyResponse {
        ready: broker_connected,
        broker_connected,
    };

    let status = if broker_connected {
        StatusCode::OK
    } else {
        tracing::warn!("Readiness check failed: broker disconnected");
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response)).into_response()
}

/// Creates a router with `/health` and `/ready`.
///
/// # Example
/// ```ignore
/// use axum_helpers::server::health_router;
/// use core_config::app_info;
///
/// let app = Router::new()
///     .merge(api_routes)
///     .merge(health_router(app_info!(), broker.health()));
/// ```
pub fn health_router(app_info: AppInfo, broker: BrokerHealth) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(HealthState {
            app: app_info,
            broker,
        })
}

/// Creates a router exposing Prometheus metrics at `/metrics`.
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route("/metrics", get(move || std::future::ready(handle.render())))
}
