//! Configuration types for the broker bridge.

use core_config::broker::BrokerConfig;
use std::time::Duration;

/// Bounded exponential backoff used for connecting, reconnecting and
/// re-subscribing.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Attempts after the first failure (0 = fail fast)
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Randomize each delay to 50-100% of its value
    pub use_jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            use_jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Fail on the first error, as the original startup path did.
    pub fn fail_fast() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Delay before retry number `attempt` (0-based), before jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }
}

/// Settings for one [`RpcClient`](crate::RpcClient).
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Well-known queue the validator service consumes
    pub request_queue: String,

    /// How long a call waits for its correlated reply
    pub timeout: Duration,

    /// Content type stamped on request envelopes
    pub content_type: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            request_queue: "auth_queue".to_string(),
            timeout: Duration::from_secs(10),
            content_type: "application/json".to_string(),
        }
    }
}

impl RpcConfig {
    pub fn new(request_queue: impl Into<String>) -> Self {
        Self {
            request_queue: request_queue.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

impl From<&BrokerConfig> for RpcConfig {
    fn from(config: &BrokerConfig) -> Self {
        Self::new(config.auth_queue.clone()).with_timeout(config.auth_rpc_timeout)
    }
}

impl From<&BrokerConfig> for ReconnectPolicy {
    fn from(config: &BrokerConfig) -> Self {
        Self::default()
            .with_max_retries(config.connect_retries)
            .with_initial_delay(config.retry_initial_delay)
            .with_max_delay(config.retry_max_delay)
    }
}

/// Settings for a long-lived [`EventConsumer`](crate::EventConsumer).
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Application queue to drain
    pub queue_name: String,

    /// Tag prefix; a UUID is appended per subscription
    pub consumer_tag_prefix: String,

    /// Policy for re-subscribing after the delivery stream ends
    pub resubscribe: ReconnectPolicy,
}

impl ConsumerConfig {
    pub fn new(queue_name: impl Into<String>) -> Self {
        let queue_name = queue_name.into();
        Self {
            consumer_tag_prefix: format!("{}-consumer", queue_name),
            queue_name,
            resubscribe: ReconnectPolicy::default(),
        }
    }

    pub fn with_resubscribe_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.resubscribe = policy;
        self
    }

    pub(crate) fn next_consumer_tag(&self) -> String {
        format!("{}-{}", self.consumer_tag_prefix, uuid::Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_is_exponential_and_capped() {
        let policy = ReconnectPolicy::default()
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(30));

        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(5), Duration::from_secs(30));
        assert_eq!(policy.delay(40), Duration::from_secs(30));
    }

    #[test]
    fn test_rpc_config_from_broker_config() {
        let mut broker = BrokerConfig::new("amqp://localhost");
        broker.auth_rpc_timeout = Duration::from_secs(3);
        broker.auth_queue = "auth.validate".to_string();

        let rpc = RpcConfig::from(&broker);
        assert_eq!(rpc.request_queue, "auth.validate");
        assert_eq!(rpc.timeout, Duration::from_secs(3));
        assert_eq!(rpc.content_type, "application/json");
    }

    #[test]
    fn test_consumer_tags_are_unique() {
        let config = ConsumerConfig::new("token_created_queue");
        let a = config.next_consumer_tag();
        let b = config.next_consumer_tag();
        assert!(a.starts_with("token_created_queue-consumer-"));
        assert_ne!(a, b);
    }
}
