//! State of one live connection
//!
//! A new link is created by every successful `open`; cancelling it stops the loops bound to it.

use crate::protocol::GatewayMessage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// A frame that skips the queue and the rate limiter
#[derive(Debug)]
pub(crate) struct DirectFrame {
    pub(crate) message: GatewayMessage,
    /// Fired once the frame has been written
    pub(crate) written: Option<oneshot::Sender<()>>,
}

#[derive(Debug)]
pub(crate) struct Link {
    pub(crate) id: u64,
    pub(crate) cancel: CancellationToken,
    direct: mpsc::UnboundedSender<DirectFrame>,
    handshake: Mutex<Option<oneshot::Sender<()>>>,
    failed: AtomicBool,
}

impl Link {
    pub(crate) fn new(
        id: u64,
        cancel: CancellationToken,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<DirectFrame>, oneshot::Receiver<()>) {
        let (direct, direct_rx) = mpsc::unbounded_channel();
        let (handshake, handshake_rx) = oneshot::channel();
        let link = Arc::new(Self {
            id,
            cancel,
            direct,
            handshake: Mutex::new(Some(handshake)),
            failed: AtomicBool::new(false),
        });
        (link, direct_rx, handshake_rx)
    }

    /// Hand a frame to the emit loop
    pub(crate) fn send_direct(&self, message: GatewayMessage, written: Option<oneshot::Sender<()>>) {
        if self.cancel.is_cancelled() {
            return;
        }
        if self.direct.send(DirectFrame { message, written }).is_err() {
            tracing::debug!(link = self.id, "Emit loop already stopped");
        }
    }

    /// Completion signal for the pending `connect`, available once
    pub(crate) fn take_handshake(&self) -> Option<oneshot::Sender<()>> {
        self.handshake.lock().take()
    }

    /// Cancel the link; true only for the first caller
    pub(crate) fn fail(&self) -> bool {
        let first = !self.failed.swap(true, Ordering::AcqRel);
        self.cancel.cancel();
        first
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
