//! Error types for the broker bridge.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error categories determine retry behavior.
///
/// - **Transient**: broker hiccup or timeout, the caller may retry
/// - **Permanent**: bad input or configuration, retrying will not help
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transient,
    Permanent,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Permanent => write!(f, "permanent"),
        }
    }
}

/// Failures of the broker transport itself.
///
/// Each variant maps to one primitive of the [`Broker`](crate::Broker) seam so
/// logs say which step failed.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Broker unreachable or authentication refused
    #[error("broker connection error: {0}")]
    Connection(String),

    /// Channel could not be opened or was closed underneath us
    #[error("broker channel error: {0}")]
    Channel(String),

    /// Queue declaration rejected or channel closed
    #[error("queue declare error: {0}")]
    QueueDeclare(String),

    /// Publish failed on the channel
    #[error("publish error: {0}")]
    Publish(String),

    /// Consumer registration or delivery stream failed
    #[error("consume error: {0}")]
    Consume(String),

    /// Consumer cancellation failed
    #[error("cancel error: {0}")]
    Cancel(String),

    /// Queue deletion failed
    #[error("queue delete error: {0}")]
    Delete(String),

    /// Orderly shutdown of channel or connection failed
    #[error("close error: {0}")]
    Close(String),

    /// No live session (never connected, closed, or reconnecting)
    #[error("broker is not connected")]
    NotConnected,
}

impl BrokerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BrokerError::Connection(msg) if msg.contains("ACCESS_REFUSED") => {
                ErrorCategory::Permanent
            }
            BrokerError::Close(_) => ErrorCategory::Permanent,
            _ => ErrorCategory::Transient,
        }
    }

    pub fn connection(error: impl fmt::Display) -> Self {
        Self::Connection(error.to_string())
    }

    pub fn channel(error: impl fmt::Display) -> Self {
        Self::Channel(error.to_string())
    }

    pub fn queue_declare(error: impl fmt::Display) -> Self {
        Self::QueueDeclare(error.to_string())
    }

    pub fn publish(error: impl fmt::Display) -> Self {
        Self::Publish(error.to_string())
    }

    pub fn consume(error: impl fmt::Display) -> Self {
        Self::Consume(error.to_string())
    }

    pub fn cancel(error: impl fmt::Display) -> Self {
        Self::Cancel(error.to_string())
    }

    pub fn delete(error: impl fmt::Display) -> Self {
        Self::Delete(error.to_string())
    }

    pub fn close(error: impl fmt::Display) -> Self {
        Self::Close(error.to_string())
    }
}

/// Outcome of a failed token-validation call.
///
/// A token that the validator rejects is *not* an error: it resolves as
/// `Ok(false)`. Everything here is an infrastructure failure the caller
/// may want to surface differently (503 instead of 401) or retry.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("timeout after {0:?} while waiting for reply")]
    Timeout(Duration),

    #[error("call cancelled before a reply arrived")]
    Cancelled,
}

impl RpcError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RpcError::Broker(e) => e.category(),
            RpcError::Timeout(_) => ErrorCategory::Transient,
            RpcError::Cancelled => ErrorCategory::Permanent,
        }
    }

    /// Whether retrying the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::Broker(BrokerError::QueueDeclare(_)) => "queue_declare",
            RpcError::Broker(BrokerError::Publish(_)) => "publish",
            RpcError::Broker(BrokerError::Consume(_)) => "consume",
            RpcError::Broker(_) => "broker",
            RpcError::Timeout(_) => "timeout",
            RpcError::Cancelled => "cancelled",
        }
    }
}

/// Error returned by an [`EventHandler`](crate::EventHandler).
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Temporary failure; the message is dropped (auto-ack) but the loop keeps going
    #[error("transient error: {message}")]
    Transient {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Malformed payload or rejected content
    #[error("permanent error: {message}")]
    Permanent {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProcessingError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            source: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
            source: None,
        }
    }

    pub fn permanent_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Permanent {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ProcessingError::Transient { .. } => ErrorCategory::Transient,
            ProcessingError::Permanent { .. } | ProcessingError::Serialization(_) => {
                ErrorCategory::Permanent
            }
        }
    }
}
