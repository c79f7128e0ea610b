//! Transport layer
//!
//! Raw frame I/O underneath a shard. The protocol engine only sees decompressed JSON bytes
//! going in and [`GatewayMessage`]s going out.

mod memory;
mod websocket;

pub use memory::{MemoryTransport, MemoryTransportHandle, TransportEvent};
pub use websocket::WebSocketTransport;

use crate::protocol::GatewayMessage;
use async_trait::async_trait;
use flate2::read::ZlibDecoder;
use std::io::Read;
use std::sync::Arc;
use thiserror::Error;

/// Close code for a deliberate shutdown; the server drops the session
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code used when tearing down for a reconnect; the session stays resumable
pub const CLOSE_RESUMABLE: u16 = 4000;

/// Transport error type
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer closed the connection
    #[error("connection closed (code {code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },

    #[error("transport is not connected")]
    NotConnected,

    #[error("transport is already connected")]
    AlreadyConnected,

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("failed to inflate frame: {0}")]
    Decompress(#[from] std::io::Error),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TransportError {
    /// Close code sent by the peer, if this error is a close
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Closed { code, .. } => *code,
            _ => None,
        }
    }
}

/// A single full-duplex frame connection
///
/// `read` and `write_json` may run concurrently from different tasks.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connect to `endpoint` sending the extra `headers`
    async fn open(&self, endpoint: &str, headers: &[(String, String)]) -> Result<(), TransportError>;

    /// Next text frame, with binary frames already inflated
    async fn read(&self) -> Result<Vec<u8>, TransportError>;

    async fn write_json(&self, message: &GatewayMessage) -> Result<(), TransportError>;

    /// Send a close frame with `code` and drop the connection
    async fn close(&self, code: u16) -> Result<(), TransportError>;

    fn is_disconnected(&self) -> bool;
}

/// Creates one transport per shard
pub trait TransportFactory: Send + Sync {
    fn create(&self, shard_id: u32) -> Arc<dyn Transport>;
}

impl<F> TransportFactory for F
where
    F: Fn(u32) -> Arc<dyn Transport> + Send + Sync,
{
    fn create(&self, shard_id: u32) -> Arc<dyn Transport> {
        self(shard_id)
    }
}

/// Factory handing out [`WebSocketTransport`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketFactory;

impl TransportFactory for WebSocketFactory {
    fn create(&self, _shard_id: u32) -> Arc<dyn Transport> {
        Arc::new(WebSocketTransport::new())
    }
}

/// Inflate a zlib-compressed binary frame
pub fn inflate(bytes: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut out = Vec::with_capacity(bytes.len() * 4);
    ZlibDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_inflate_zlib_frame() {
        let json = br#"{"op":11,"d":null}"#;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(json).unwrap();
        let compressed = encoder.finish().unwrap();

        assert_eq!(inflate(&compressed).unwrap(), json);
    }

    #[test]
    fn test_inflate_rejects_garbage() {
        assert!(inflate(b"definitely not zlib").is_err());
    }

    #[test]
    fn test_close_code_accessor() {
        let err = TransportError::Closed {
            code: Some(4004),
            reason: "Authentication failed".to_string(),
        };
        assert_eq!(err.close_code(), Some(4004));
        assert_eq!(TransportError::NotConnected.close_code(), None);
    }
}
