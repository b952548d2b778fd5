//! Prometheus metrics for RPC calls and the background consumer.

use metrics::{counter, gauge, histogram, Gauge};
use std::time::Duration;

/// Metrics for one request queue.
#[derive(Clone)]
pub struct RpcMetrics {
    request_queue: String,
}

impl RpcMetrics {
    pub fn new(request_queue: &str) -> Self {
        Self {
            request_queue: request_queue.to_string(),
        }
    }

    /// Record a completed call; `outcome` is `valid` or `invalid`.
    pub fn call_completed(&self, outcome: &'static str, duration: Duration) {
        counter!(
            "auth_rpc_calls_total",
            "queue" => self.request_queue.clone(),
            "outcome" => outcome
        )
        .increment(1);

        histogram!(
            "auth_rpc_call_duration_seconds",
            "queue" => self.request_queue.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a failed call by error kind.
    pub fn call_failed(&self, kind: &'static str) {
        counter!(
            "auth_rpc_calls_total",
            "queue" => self.request_queue.clone(),
            "outcome" => kind
        )
        .increment(1);
    }

    /// A reply arrived whose correlation id did not match.
    pub fn reply_discarded(&self) {
        counter!(
            "auth_rpc_replies_discarded_total",
            "queue" => self.request_queue.clone()
        )
        .increment(1);
    }

    /// Reply queue or consumer cleanup failed.
    pub fn cleanup_failed(&self) {
        counter!(
            "auth_rpc_cleanup_failures_total",
            "queue" => self.request_queue.clone()
        )
        .increment(1);
    }

    /// Count a call as in flight until the returned guard drops.
    pub fn track_in_flight(&self) -> InFlightGuard {
        let gauge = gauge!(
            "auth_rpc_calls_in_flight",
            "queue" => self.request_queue.clone()
        );
        gauge.increment(1.0);
        InFlightGuard { gauge }
    }
}

/// Decrements `auth_rpc_calls_in_flight` on drop, including when the call
/// future is abandoned mid-wait.
pub struct InFlightGuard {
    gauge: Gauge,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.decrement(1.0);
    }
}

/// Metrics for one event consumer.
#[derive(Clone)]
pub struct ConsumerMetrics {
    queue: String,
    handler: String,
}

impl ConsumerMetrics {
    pub fn new(queue: &str, handler: &str) -> Self {
        Self {
            queue: queue.to_string(),
            handler: handler.to_string(),
        }
    }

    pub fn event_received(&self) {
        counter!(
            "event_consumer_events_received_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .increment(1);
    }

    pub fn event_processed(&self, duration: Duration) {
        counter!(
            "event_consumer_events_processed_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .increment(1);

        histogram!(
            "event_consumer_event_duration_seconds",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .record(duration.as_secs_f64());
    }

    pub fn event_failed(&self, error_category: &str) {
        counter!(
            "event_consumer_events_failed_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone(),
            "category" => error_category.to_string()
        )
        .increment(1);
    }

    pub fn resubscribed(&self) {
        counter!(
            "event_consumer_resubscribes_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }
}

/// Install the global Prometheus recorder.
///
/// Fails if a recorder is already installed for this process.
pub fn init_metrics(
) -> Result<metrics_exporter_prometheus::PrometheusHandle, metrics_exporter_prometheus::BuildError>
{
    metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()
}
