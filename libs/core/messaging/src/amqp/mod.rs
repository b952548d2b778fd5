//! RabbitMQ (AMQP 0-9-1) implementation of the [`Broker`](crate::Broker) seam.
//!
//! One [`BrokerClient`] per process owns the single connection and channel.
//! It is constructed explicitly and shared by `Arc` with every user: the RPC
//! client, the background consumer and the reconnect supervisor.
//!
//! ```text
//! ┌──────────────┐   declare/publish/consume   ┌──────────────┐
//! │  RpcClient   │────────────────────────────▶│              │
//! └──────────────┘                             │ BrokerClient │──▶ RabbitMQ
//! ┌──────────────┐   consume                   │ (conn + chan)│
//! │EventConsumer │────────────────────────────▶│              │
//! └──────────────┘                             └──────▲───────┘
//!                                    supervise()      │ re-dial on loss
//! ```

mod client;
mod supervisor;

pub use client::BrokerClient;

/// The lapin-backed broker, under the name used at call sites.
pub type AmqpBroker = BrokerClient;
