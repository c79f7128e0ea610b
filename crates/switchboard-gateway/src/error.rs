//! Gateway error types

use crate::metadata::MetadataError;
use crate::protocol::CloseCode;
use crate::queue::QueueError;
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to callers of shards and the shard manager
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("shard is already connected")]
    AlreadyConnected,

    #[error("shard is already disconnected")]
    AlreadyDisconnected,

    /// A local rate limit bucket rejected the command
    #[error("command {command} is rate limited, retry in {retry_after:?}")]
    RateLimited {
        command: &'static str,
        retry_after: Duration,
    },

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("handshake was not sent within {0:?}")]
    HandshakeTimeout(Duration),

    /// The connection dropped before the handshake went out
    #[error("connection lost during handshake")]
    ConnectionLost,

    /// The server closed the connection with a code that forbids reconnecting
    #[error("connection closed by server: {0}")]
    Fatal(CloseCode),

    #[error("gateway is shutting down")]
    Shutdown,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("gateway metadata unavailable: {0}")]
    Metadata(#[from] MetadataError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GatewayError {
    /// The caller may retry the same command later
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Queue(QueueError::Full { .. }))
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;
