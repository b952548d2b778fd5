//! Supervised reconnect loop for the shared broker connection.

use super::client::BrokerClient;
use crate::broker::Broker;
use crate::config::ReconnectPolicy;
use crate::retry::backoff_delay;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// How often the supervisor polls the session when no error was signalled.
const STATUS_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Cap on the exponent so delays stay at `max_delay` instead of overflowing.
const MAX_BACKOFF_EXPONENT: u32 = 16;

impl BrokerClient {
    /// Keep the connection alive until shutdown or [`close`](Self::close).
    ///
    /// Wakes on lapin connection errors and on a periodic status check. When
    /// the session is gone it re-dials with the configured backoff (delays
    /// capped at `retry_max_delay`, attempts unbounded) and reports progress
    /// through [`BrokerHealth`](crate::BrokerHealth). Never panics and never
    /// exits the process.
    pub async fn supervise(&self, mut shutdown: watch::Receiver<bool>) {
        let policy = ReconnectPolicy::from(self.config());
        let mut ticker = tokio::time::interval(STATUS_CHECK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("Broker supervisor started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = self.connection_lost.notified() => {}
                _ = ticker.tick() => {}
            }

            if self.is_closed() {
                break;
            }
            if self.is_connected() {
                continue;
            }

            warn!("Broker connection lost, reconnecting");
            self.health.set_connected(false).await;

            if !self.reconnect(&policy, &mut shutdown).await {
                break;
            }
        }

        info!("Broker supervisor stopped");
    }

    /// Re-dial until it works. Returns `false` if shutdown or close won the race.
    async fn reconnect(&self, policy: &ReconnectPolicy, shutdown: &mut watch::Receiver<bool>) -> bool {
        let mut attempt: u32 = 0;

        loop {
            if self.is_closed() || *shutdown.borrow() {
                return false;
            }

            match self.establish().await {
                Ok(()) => {
                    info!(attempts = attempt + 1, "Broker connection re-established");
                    return true;
                }
                Err(_) if self.is_closed() => return false,
                Err(e) => {
                    self.health.record_reconnect_attempt(e.to_string()).await;
                    let delay = backoff_delay(policy, attempt.min(MAX_BACKOFF_EXPONENT));
                    error!(
                        error = %e,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Broker reconnect failed"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                return false;
                            }
                        }
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}
