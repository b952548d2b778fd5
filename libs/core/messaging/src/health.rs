//! Observable broker health, shared by the connection supervisor, the
//! background consumer and the HTTP probes.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Snapshot reported by `/health` and `/ready`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub status: String,
    pub broker_connected: bool,
    pub consumer_running: bool,
    pub reconnect_attempts: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Shared health state.
#[derive(Clone, Default)]
pub struct BrokerHealth {
    inner: Arc<RwLock<BrokerHealthInner>>,
}

#[derive(Default)]
struct BrokerHealthInner {
    broker_connected: bool,
    consumer_running: bool,
    consumer_failed: bool,
    reconnect_attempts: u64,
    last_error: Option<String>,
}

impl BrokerHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record connection state; a successful connect clears the last error.
    pub async fn set_connected(&self, connected: bool) {
        let mut inner = self.inner.write().await;
        inner.broker_connected = connected;
        if connected {
            inner.last_error = None;
        }
    }

    pub async fn set_consumer_running(&self, running: bool) {
        let mut inner = self.inner.write().await;
        inner.consumer_running = running;
        if running {
            inner.consumer_failed = false;
        }
    }

    /// The background consumer gave up; the process keeps serving degraded.
    pub async fn set_consumer_failed(&self, error: impl Into<String>) {
        let mut inner = self.inner.write().await;
        inner.consumer_running = false;
        inner.consumer_failed = true;
        inner.last_error = Some(error.into());
    }

    pub async fn record_reconnect_attempt(&self, error: impl Into<String>) {
        let mut inner = self.inner.write().await;
        inner.reconnect_attempts += 1;
        inner.last_error = Some(error.into());
    }

    /// Readiness: requests can only be authenticated with a live broker.
    ///
    /// There is no liveness counterpart: broker loss is handled by the
    /// supervisor, not by restarting the process.
    pub async fn is_ready(&self) -> bool {
        self.inner.read().await.broker_connected
    }

    pub async fn status(&self) -> HealthStatus {
        let inner = self.inner.read().await;
        let status = match (inner.broker_connected, inner.consumer_failed) {
            (true, false) => "healthy",
            (true, true) => "degraded",
            (false, _) => "unhealthy",
        };

        HealthStatus {
            status: status.to_string(),
            broker_connected: inner.broker_connected,
            consumer_running: inner.consumer_running,
            reconnect_attempts: inner.reconnect_attempts,
            last_error: inner.last_error.clone(),
        }
    }
}
