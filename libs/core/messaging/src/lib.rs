//! Request/reply and event consumption over a message broker.
//!
//! This library provides:
//! - **Broker seam**: the [`Broker`] trait with a RabbitMQ implementation
//!   ([`amqp::BrokerClient`]) and an in-process one for tests
//!   (`MemoryBroker`, feature `testing`)
//! - **RPC**: [`RpcClient`] validates bearer tokens against an external
//!   service by publishing to `auth_queue` and waiting on a private reply
//!   queue for the correlated answer
//! - **Events**: [`EventConsumer`] drains application queues such as
//!   `token_created_queue` with an [`EventHandler`]
//! - **Health**: [`BrokerHealth`] as reported by the supervisor and consumer
//!
//! # Example
//!
//! ```ignore
//! use messaging::{amqp::BrokerClient, RpcClient, RpcConfig};
//!
//! let broker = Arc::new(BrokerClient::connect(config.clone()).await?);
//! tokio::spawn({
//!     let broker = broker.clone();
//!     async move { broker.supervise(shutdown_rx).await }
//! });
//!
//! let rpc = RpcClient::new(broker.clone(), RpcConfig::from(&config));
//! match rpc.validate(token).await {
//!     Ok(true) => { /* accepted */ }
//!     Ok(false) => { /* 401 */ }
//!     Err(e) if e.is_retryable() => { /* 503 */ }
//!     Err(e) => { /* ... */ }
//! }
//! ```

pub mod amqp;
mod broker;
mod config;
mod consumer;
mod error;
mod health;
#[cfg(any(test, feature = "testing"))]
mod memory;
pub mod metrics;
mod retry;
mod rpc;

pub use broker::{Broker, DeliveryStream, Envelope};
pub use config::{ConsumerConfig, ReconnectPolicy, RpcConfig};
pub use consumer::{EventConsumer, EventHandler};
pub use error::{BrokerError, ErrorCategory, ProcessingError, RpcError};
pub use health::{BrokerHealth, HealthStatus};
#[cfg(any(test, feature = "testing"))]
pub use memory::{FailPoint, MemoryBroker};
pub use retry::retry_with_backoff;
pub use rpc::{CallState, PendingCall, RpcClient};

pub use tokio_util::sync::CancellationToken;
