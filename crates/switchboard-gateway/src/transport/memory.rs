//! In-process transport
//!
//! Lets a test (or any caller without a network) play the server side: push frames in, observe
//! what the shard opens, writes and closes.

use super::{inflate, Transport, TransportError};
use crate::protocol::GatewayMessage;
use async_trait::async_trait;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Something the client did to the transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened { endpoint: String },
    Written(GatewayMessage),
    Closed { code: u16 },
}

enum Inbound {
    Text(Vec<u8>),
    Binary(Vec<u8>),
    Close(u16),
}

struct Shared {
    connected: AtomicBool,
    fail_writes: AtomicBool,
    stall_writes: AtomicBool,
    opens: AtomicUsize,
}

/// Client side of the in-memory connection
pub struct MemoryTransport {
    shared: Arc<Shared>,
    inbound: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

/// Server side of a [`MemoryTransport`]
///
/// Frames pushed while the client is disconnected are delivered after its next `open`.
#[derive(Clone)]
pub struct MemoryTransportHandle {
    shared: Arc<Shared>,
    inbound: mpsc::UnboundedSender<Inbound>,
    events: Arc<Mutex<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryTransportHandle) {
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            stall_writes: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
        });
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let transport = Self {
            shared: shared.clone(),
            inbound: Mutex::new(inbound_rx),
            events: events_tx,
        };
        let handle = MemoryTransportHandle {
            shared,
            inbound: inbound_tx,
            events: Arc::new(Mutex::new(events_rx)),
        };
        (transport, handle)
    }

    fn record(&self, event: TransportEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, endpoint: &str, _headers: &[(String, String)]) -> Result<(), TransportError> {
        if self.shared.connected.swap(true, Ordering::AcqRel) {
            return Err(TransportError::AlreadyConnected);
        }
        self.shared.opens.fetch_add(1, Ordering::AcqRel);
        self.record(TransportEvent::Opened {
            endpoint: endpoint.to_string(),
        });
        Ok(())
    }

    async fn read(&self) -> Result<Vec<u8>, TransportError> {
        if self.is_disconnected() {
            return Err(TransportError::NotConnected);
        }

        let frame = self.inbound.lock().await.recv().await;
        match frame {
            Some(Inbound::Text(bytes)) => Ok(bytes),
            Some(Inbound::Binary(bytes)) => Ok(inflate(&bytes)?),
            Some(Inbound::Close(code)) => {
                self.shared.connected.store(false, Ordering::Release);
                Err(TransportError::Closed {
                    code: Some(code),
                    reason: "closed by peer".to_string(),
                })
            }
            None => {
                self.shared.connected.store(false, Ordering::Release);
                Err(TransportError::Closed {
                    code: None,
                    reason: "handle dropped".to_string(),
                })
            }
        }
    }

    async fn write_json(&self, message: &GatewayMessage) -> Result<(), TransportError> {
        if self.is_disconnected() {
            return Err(TransportError::NotConnected);
        }
        if self.shared.fail_writes.load(Ordering::Acquire) {
            return Err(TransportError::WebSocket("write failed".to_string()));
        }
        if self.shared.stall_writes.load(Ordering::Acquire) {
            // Like a socket whose send buffer never drains
            std::future::pending::<()>().await;
        }
        self.record(TransportEvent::Written(message.clone()));
        Ok(())
    }

    async fn close(&self, code: u16) -> Result<(), TransportError> {
        if !self.shared.connected.swap(false, Ordering::AcqRel) {
            return Err(TransportError::NotConnected);
        }
        self.record(TransportEvent::Closed { code });
        Ok(())
    }

    fn is_disconnected(&self) -> bool {
        !self.shared.connected.load(Ordering::Acquire)
    }
}

impl MemoryTransportHandle {
    /// Deliver a frame as a text message
    pub fn push(&self, message: &GatewayMessage) {
        if let Ok(json) = message.to_json() {
            self.push_raw(json.into_bytes());
        }
    }

    /// Deliver arbitrary bytes as a text message
    pub fn push_raw(&self, bytes: impl Into<Vec<u8>>) {
        let _ = self.inbound.send(Inbound::Text(bytes.into()));
    }

    /// Deliver a frame as a zlib-compressed binary message
    pub fn push_compressed(&self, message: &GatewayMessage) -> std::io::Result<()> {
        let json = message.to_json()?;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(json.as_bytes())?;
        let _ = self.inbound.send(Inbound::Binary(encoder.finish()?));
        Ok(())
    }

    /// Close the connection from the server side
    pub fn push_close(&self, code: u16) {
        let _ = self.inbound.send(Inbound::Close(code));
    }

    /// Make every following write fail until reset
    pub fn fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::Release);
    }

    /// Make every following write hang until the writer gives up on it
    pub fn stall_writes(&self, stall: bool) {
        self.shared.stall_writes.store(stall, Ordering::Release);
    }

    /// Wait for the next client action
    pub async fn next_event(&self) -> Option<TransportEvent> {
        self.events.lock().await.recv().await
    }

    /// Client action already recorded, if any
    pub fn try_next_event(&self) -> Option<TransportEvent> {
        self.events.try_lock().ok()?.try_recv().ok()
    }

    /// Wait for the next frame the client writes, skipping opens and closes
    pub async fn next_written(&self) -> Option<GatewayMessage> {
        loop {
            match self.next_event().await? {
                TransportEvent::Written(message) => return Some(message),
                _ => continue,
            }
        }
    }

    /// How many times the client opened this transport
    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }
}
