//! WebSocket transport over `tokio-tungstenite`

use super::{inflate, Transport, TransportError};
use crate::protocol::GatewayMessage;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// WebSocket client connection
///
/// The sink and the stream sit behind separate locks so the reader never blocks a writer.
pub struct WebSocketTransport {
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    stream: Mutex<Option<SplitStream<WsStream>>>,
    disconnected: AtomicBool,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self {
            sink: Mutex::new(None),
            stream: Mutex::new(None),
            disconnected: AtomicBool::new(true),
        }
    }

    fn mark_disconnected(&self) {
        self.disconnected.store(true, Ordering::Release);
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn ws_error(err: impl std::fmt::Display) -> TransportError {
    TransportError::WebSocket(err.to_string())
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, endpoint: &str, headers: &[(String, String)]) -> Result<(), TransportError> {
        if !self.is_disconnected() {
            return Err(TransportError::AlreadyConnected);
        }

        let mut request = endpoint.into_client_request().map_err(ws_error)?;
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(ws_error)?;
            let value = HeaderValue::from_str(value).map_err(ws_error)?;
            request.headers_mut().insert(name, value);
        }

        let (socket, response) = connect_async(request).await.map_err(ws_error)?;
        tracing::debug!(endpoint, status = %response.status(), "WebSocket connected");

        let (sink, stream) = socket.split();
        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        self.disconnected.store(false, Ordering::Release);
        Ok(())
    }

    async fn read(&self) -> Result<Vec<u8>, TransportError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(TransportError::NotConnected)?;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.into_bytes()),
                Some(Ok(Message::Binary(bytes))) => return Ok(inflate(&bytes)?),
                Some(Ok(Message::Close(frame))) => {
                    self.mark_disconnected();
                    let (code, reason) = frame.map_or((None, String::new()), |f| {
                        (Some(u16::from(f.code)), f.reason.into_owned())
                    });
                    return Err(TransportError::Closed { code, reason });
                }
                // Pings are answered by tungstenite itself
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => {
                    self.mark_disconnected();
                    return Err(ws_error(e));
                }
                None => {
                    self.mark_disconnected();
                    return Err(TransportError::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    });
                }
            }
        }
    }

    async fn write_json(&self, message: &GatewayMessage) -> Result<(), TransportError> {
        let text = message.to_json()?;
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;

        if let Err(e) = sink.send(Message::Text(text)).await {
            self.mark_disconnected();
            return Err(ws_error(e));
        }
        Ok(())
    }

    async fn close(&self, code: u16) -> Result<(), TransportError> {
        self.mark_disconnected();
        // A writer stuck on a dead socket must not hold up the teardown
        let sink = match tokio::time::timeout(CLOSE_TIMEOUT, self.sink.lock()).await {
            Ok(mut guard) => guard.take(),
            Err(_) => {
                tracing::debug!("Sink still busy, dropping the connection without a close frame");
                return Ok(());
            }
        };

        // The reader has normally been stopped already; never wait on it here
        if let Ok(mut stream) = self.stream.try_lock() {
            stream.take();
        }

        let mut sink = sink.ok_or(TransportError::NotConnected)?;
        let frame = CloseFrame {
            code: WsCloseCode::from(code),
            reason: "".into(),
        };
        let closing = async {
            sink.send(Message::Close(Some(frame))).await?;
            sink.close().await
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, closing).await {
            Ok(result) => result.map_err(ws_error),
            Err(_) => Err(TransportError::WebSocket("close handshake timed out".to_string())),
        }
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }
}
