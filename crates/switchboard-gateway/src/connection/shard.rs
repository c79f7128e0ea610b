//! Shard connection
//!
//! Owns one transport and drives it through the gateway handshake. Each live connection runs a
//! receive loop, an emit loop and, after Hello, a heartbeat loop, all bound to one [`Link`].

use super::link::Link;
use super::loops;
use super::session::Session;
use super::settings::ShardSettings;
use super::status::{ShardStatus, StatusCell};
use crate::error::{GatewayError, GatewayResult};
use crate::events::{GatewayEvent, ShardFault};
use crate::identify::IdentifyGate;
use crate::pool::EnvelopePool;
use crate::protocol::{CloseCode, GatewayCommand, GatewayMessage, IdentifyPayload, ResumePayload};
use crate::queue::SharedQueue;
use crate::ratelimit::{RateLimiter, Rejection};
use crate::transport::{Transport, TransportError, CLOSE_NORMAL, CLOSE_RESUMABLE};
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const GATEWAY_QUERY: &str = "/?v=10&encoding=json";

const INITIAL_BACKOFF: Duration = Duration::from_secs(3);
const MAX_BACKOFF: Duration = Duration::from_secs(300);
const BACKOFF_RESET: Duration = Duration::from_secs(60);

/// Process-wide collaborators every shard shares
#[derive(Clone)]
pub struct ShardContext {
    pub(crate) gate: IdentifyGate,
    pub(crate) pool: Arc<EnvelopePool>,
    pub(crate) events: mpsc::Sender<GatewayEvent>,
    pub(crate) faults: Option<mpsc::UnboundedSender<ShardFault>>,
    pub(crate) shutdown: CancellationToken,
}

impl ShardContext {
    pub fn new(
        gate: IdentifyGate,
        events: mpsc::Sender<GatewayEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            gate,
            pool: Arc::new(EnvelopePool::default()),
            events,
            faults: None,
            shutdown,
        }
    }

    pub fn with_pool(mut self, pool: Arc<EnvelopePool>) -> Self {
        self.pool = pool;
        self
    }

    /// Where shards report unrecoverable close codes
    pub fn with_faults(mut self, faults: mpsc::UnboundedSender<ShardFault>) -> Self {
        self.faults = Some(faults);
        self
    }
}

struct ActiveLink {
    link: Arc<Link>,
    tasks: Vec<JoinHandle<()>>,
}

struct ShardInner {
    id: u32,
    total: u32,
    gateway_url: String,
    settings: ShardSettings,
    transport: Arc<dyn Transport>,
    session: Session,
    status: StatusCell,
    limiter: RateLimiter,
    queue: SharedQueue,
    context: ShardContext,
    active: Mutex<Option<ActiveLink>>,
    /// Set from `connect` until teardown
    connected: AtomicBool,
    reconnecting: AtomicBool,
    /// Bumped by `disconnect`; stale reconnect loops stop when it changes
    epoch: AtomicU64,
    link_ids: AtomicU64,
    heartbeat_owner: AtomicU64,
    malformed: AtomicU32,
    /// Receive loop waiting on the event consumer
    stalled: AtomicBool,
    fatal: Mutex<Option<CloseCode>>,
}

/// One gateway connection
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct Shard {
    inner: Arc<ShardInner>,
}

impl Shard {
    pub fn new(
        id: u32,
        total: u32,
        gateway_url: impl Into<String>,
        settings: ShardSettings,
        transport: Arc<dyn Transport>,
        context: ShardContext,
    ) -> Self {
        let limiter = settings.rate_limiter();
        let queue = SharedQueue::new(settings.queue_capacity);
        Self {
            inner: Arc::new(ShardInner {
                id,
                total,
                gateway_url: gateway_url.into(),
                settings,
                transport,
                session: Session::new(),
                status: StatusCell::new(ShardStatus::Disconnected),
                limiter,
                queue,
                context,
                active: Mutex::new(None),
                connected: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                link_ids: AtomicU64::new(0),
                heartbeat_owner: AtomicU64::new(0),
                malformed: AtomicU32::new(0),
                stalled: AtomicBool::new(false),
                fatal: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.inner.id
    }

    /// Shard count this shard identifies with
    pub fn total(&self) -> u32 {
        self.inner.total
    }

    pub fn status(&self) -> ShardStatus {
        self.inner.status.get()
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Round trip of the last acknowledged heartbeat
    pub fn heartbeat_latency(&self) -> Option<Duration> {
        self.inner.session.latency()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Open the transport and wait until identify or resume has been written
    ///
    /// Fails with [`GatewayError::AlreadyConnected`] when a connection is live. If the handshake
    /// is not out within the configured timeout a reconnect is scheduled.
    pub async fn connect(&self) -> GatewayResult<()> {
        let inner = &self.inner;
        if inner.context.shutdown.is_cancelled() {
            return Err(GatewayError::Shutdown);
        }
        if inner.connected.swap(true, Ordering::AcqRel) {
            return Err(GatewayError::AlreadyConnected);
        }

        *inner.fatal.lock() = None;
        self.set_status(ShardStatus::Connecting);
        let endpoint = self.endpoint();
        tracing::debug!(shard_id = inner.id, endpoint = %endpoint, "Opening gateway connection");

        if let Err(e) = inner.transport.open(&endpoint, &[]).await {
            inner.connected.store(false, Ordering::Release);
            self.set_status(ShardStatus::Disconnected);
            return Err(e.into());
        }

        inner.session.reset_heartbeat();
        inner.malformed.store(0, Ordering::Release);

        let link_id = inner.link_ids.fetch_add(1, Ordering::AcqRel) + 1;
        let (link, direct, handshake) = Link::new(link_id, inner.context.shutdown.child_token());
        *inner.active.lock() = Some(ActiveLink {
            link: link.clone(),
            tasks: Vec::with_capacity(3),
        });
        self.set_status(ShardStatus::AwaitingHello);

        self.attach(&link, tokio::spawn(loops::receive_loop(self.clone(), link.clone())));
        self.attach(&link, tokio::spawn(loops::emit_loop(self.clone(), link.clone(), direct)));

        let timeout = inner.settings.handshake_timeout;
        tokio::select! {
            sent = handshake => match sent {
                Ok(()) => {
                    tracing::info!(shard_id = inner.id, total = inner.total, "Handshake sent");
                    Ok(())
                }
                Err(_) => Err(inner.fatal.lock().map_or(GatewayError::ConnectionLost, GatewayError::Fatal)),
            },
            () = tokio::time::sleep(timeout) => {
                tracing::warn!(shard_id = inner.id, ?timeout, "Handshake timed out");
                link.fail();
                self.trigger_reconnect("handshake timeout");
                Err(GatewayError::HandshakeTimeout(timeout))
            }
            () = inner.context.shutdown.cancelled() => Err(GatewayError::Shutdown),
        }
    }

    /// Close the connection normally
    ///
    /// The session is kept; see [`Session::reset`] to start over.
    pub async fn disconnect(&self) -> GatewayResult<()> {
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        self.teardown(CLOSE_NORMAL).await?;
        tracing::info!(shard_id = self.inner.id, "Shard disconnected");
        Ok(())
    }

    /// Forget session id and sequence so the next connection identifies
    pub fn reset_session(&self) {
        self.inner.session.reset();
    }

    /// Connect through the identify gate, retrying with backoff until it works
    ///
    /// Returns right away when another reconnect loop is already running for this shard.
    pub async fn reconnect_loop(&self) -> GatewayResult<()> {
        if self.inner.reconnecting.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let epoch = self.inner.epoch.load(Ordering::Acquire);
        self.run_reconnect_loop(epoch).await
    }

    /// Queue a command after it passes the rate limiter
    pub fn emit(&self, command: GatewayCommand) -> GatewayResult<()> {
        self.enqueue(command, false)
    }

    pub(crate) fn enqueue(&self, command: GatewayCommand, preapproved: bool) -> GatewayResult<()> {
        let name = command.name();
        if preapproved {
            self.inner.queue.add(command)?;
            return Ok(());
        }

        // Only a command the queue accepted takes a rate limit slot
        self.inner
            .limiter
            .admit(name, || self.inner.queue.add(command))
            .map_err(|rejection| match rejection {
                Rejection::Limited { retry_after } => GatewayError::RateLimited {
                    command: name,
                    retry_after,
                },
                Rejection::Refused(e) => GatewayError::Queue(e),
            })
    }

    /// Take every command not yet written
    pub fn steal_queue(&self) -> Vec<GatewayCommand> {
        self.inner.queue.steal()
    }

    /// Commands waiting to be written, oldest first
    pub fn queued(&self) -> Vec<GatewayCommand> {
        self.inner.queue.snapshot()
    }

    // === Internals shared with the loops and handlers ===

    pub(crate) fn settings(&self) -> &ShardSettings {
        &self.inner.settings
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub(crate) fn queue(&self) -> &SharedQueue {
        &self.inner.queue
    }

    pub(crate) fn pool(&self) -> &EnvelopePool {
        &self.inner.context.pool
    }

    pub(crate) fn set_status(&self, status: ShardStatus) {
        self.inner.status.set(status);
    }

    pub(crate) fn identify_message(&self) -> Result<GatewayMessage, serde_json::Error> {
        let settings = &self.inner.settings;
        GatewayMessage::identify(&IdentifyPayload {
            token: settings.token.clone(),
            intents: settings.intents,
            properties: settings.properties.clone(),
            compress: settings.compress,
            large_threshold: settings.large_threshold,
            shard: [self.inner.id, self.inner.total],
            presence: settings.presence.clone(),
        })
    }

    pub(crate) fn resume_message(&self) -> Result<GatewayMessage, serde_json::Error> {
        GatewayMessage::resume(&ResumePayload {
            token: self.inner.settings.token.clone(),
            session_id: self.inner.session.session_id(),
            seq: self.inner.session.sequence(),
        })
    }

    /// Keep a task bound to `link` so teardown can wait for it
    pub(crate) fn attach(&self, link: &Link, task: JoinHandle<()>) {
        let mut active = self.inner.active.lock();
        match active.as_mut() {
            Some(active) if active.link.id == link.id => active.tasks.push(task),
            // Link already torn down; the task sees the cancellation on its own
            _ => {}
        }
    }

    /// Claim heartbeating for `link`; a second claim for the same link is refused
    pub(crate) fn claim_heartbeat(&self, link: &Link) -> bool {
        self.inner
            .heartbeat_owner
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |owner| {
                (owner < link.id).then_some(link.id)
            })
            .is_ok()
    }

    pub(crate) fn release_heartbeat(&self, link: &Link) {
        let _ = self.inner.heartbeat_owner.compare_exchange(
            link.id,
            0,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Count a frame that could not be handled; true once the threshold is reached
    pub(crate) fn record_malformed(&self) -> bool {
        let count = self.inner.malformed.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= self.inner.settings.malformed_threshold {
            self.inner.malformed.store(0, Ordering::Release);
            return true;
        }
        false
    }

    pub(crate) fn clear_malformed(&self) {
        self.inner.malformed.store(0, Ordering::Release);
    }

    /// Stop `link` and reconnect, at most once per link
    pub(crate) fn abort(&self, link: &Link, reason: &'static str) {
        if link.fail() {
            self.trigger_reconnect(reason);
        }
    }

    /// Hand an event to the application, giving up if the link closes meanwhile
    ///
    /// While the application is behind, the receive loop waits here and [`Self::is_stalled`]
    /// reports true.
    pub(crate) async fn forward(&self, link: &Link, event: GatewayEvent) {
        let shard_id = self.inner.id;
        let event = match self.inner.context.events.try_send(event) {
            Ok(()) => return,
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(shard_id, "Event receiver dropped");
                return;
            }
            Err(TrySendError::Full(event)) => event,
        };

        tracing::debug!(shard_id, "Event consumer is behind, receive loop waiting");
        self.inner.stalled.store(true, Ordering::Release);
        tokio::select! {
            sent = self.inner.context.events.send(event) => {
                if sent.is_err() {
                    tracing::debug!(shard_id, "Event receiver dropped");
                }
            }
            () = link.cancel.cancelled() => {}
        }
        self.inner.stalled.store(false, Ordering::Release);
    }

    /// The receive loop is blocked on a full event channel, so unread frames may hold an ack
    pub(crate) fn is_stalled(&self) -> bool {
        self.inner.stalled.load(Ordering::Acquire)
    }

    /// Classify a failed read
    pub(crate) fn handle_read_error(&self, link: &Link, error: TransportError) {
        let shard_id = self.inner.id;
        match error.close_code().and_then(CloseCode::from_u16) {
            Some(code) if code.should_reconnect() => {
                if code.invalidates_session() {
                    self.inner.session.reset();
                }
                tracing::warn!(shard_id, code = %code, "Gateway closed the connection");
                self.abort(link, "closed by server");
            }
            Some(code) => {
                tracing::error!(shard_id, code = %code, "Gateway closed the connection permanently");
                *self.inner.fatal.lock() = Some(code);
                link.fail();
                self.report_fault(code);
                let shard = self.clone();
                tokio::spawn(async move {
                    let _ = shard.teardown(CLOSE_NORMAL).await;
                });
            }
            None => {
                tracing::warn!(shard_id, error = %error, "Gateway connection lost");
                self.abort(link, "connection lost");
            }
        }
    }

    fn report_fault(&self, code: CloseCode) {
        let fault = ShardFault {
            shard_id: self.inner.id,
            code,
        };
        let delivered = self
            .inner
            .context
            .faults
            .as_ref()
            .is_some_and(|faults| faults.send(fault).is_ok());
        if !delivered {
            tracing::error!(shard_id = fault.shard_id, code = %code, "Shard fault has no receiver");
        }
    }

    /// Tear down the current connection and reconnect in the background
    ///
    /// Overlapping requests collapse into one reconnect.
    pub(crate) fn trigger_reconnect(&self, reason: &'static str) {
        let shard_id = self.inner.id;
        if self.inner.context.shutdown.is_cancelled() {
            return;
        }
        if self.inner.reconnecting.swap(true, Ordering::AcqRel) {
            tracing::debug!(shard_id, reason, "Reconnect already in progress");
            return;
        }

        tracing::info!(shard_id, reason, "Scheduling reconnect");
        let epoch = self.inner.epoch.load(Ordering::Acquire);
        let shard = self.clone();
        tokio::spawn(async move {
            let _ = shard.teardown(CLOSE_RESUMABLE).await;
            if let Err(e) = shard.run_reconnect_loop(epoch).await {
                tracing::debug!(shard_id, error = %e, "Reconnect loop ended");
            }
        });
    }

    fn endpoint(&self) -> String {
        let resume_url = if self.inner.session.is_virgin() {
            None
        } else {
            self.inner.session.resume_url()
        };
        let base = resume_url.as_deref().unwrap_or(&self.inner.gateway_url);
        if base.contains('?') {
            return base.to_string();
        }
        format!("{}{GATEWAY_QUERY}", base.trim_end_matches('/'))
    }

    async fn run_reconnect_loop(&self, epoch: u64) -> GatewayResult<()> {
        let result = self.reconnect_attempts(epoch).await;
        self.inner.reconnecting.store(false, Ordering::Release);

        // A link lost between the handshake and the flag being cleared had nobody to reconnect it
        if result.is_ok() && self.inner.fatal.lock().is_none() {
            let lost = self
                .inner
                .active
                .lock()
                .as_ref()
                .is_some_and(|active| active.link.is_closed());
            if lost {
                self.trigger_reconnect("connection lost during handshake");
            }
        }
        result
    }

    async fn reconnect_attempts(&self, epoch: u64) -> GatewayResult<()> {
        let shard_id = self.inner.id;
        let shutdown = self.inner.context.shutdown.clone();
        let mut delay = INITIAL_BACKOFF;
        let mut attempt: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                return Err(GatewayError::Shutdown);
            }
            if self.inner.epoch.load(Ordering::Acquire) != epoch {
                tracing::debug!(shard_id, "Shard was disconnected, abandoning reconnect");
                return Ok(());
            }

            self.set_status(ShardStatus::Reconnecting);
            let shard = self.clone();
            let outcome = self
                .inner
                .context
                .gate
                .run(shard_id, async move { shard.connect().await }.boxed())
                .await;

            match outcome {
                Ok(()) => {
                    // Disconnected while the attempt waited in the gate
                    if self.inner.epoch.load(Ordering::Acquire) != epoch {
                        let _ = self.teardown(CLOSE_NORMAL).await;
                    }
                    return Ok(());
                }
                Err(GatewayError::AlreadyConnected) => return Ok(()),
                Err(e @ (GatewayError::Shutdown | GatewayError::Fatal(_))) => {
                    let _ = self.teardown(CLOSE_NORMAL).await;
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(shard_id, attempt, error = %e, "Connection attempt failed");
                    let _ = self.teardown(CLOSE_RESUMABLE).await;
                }
            }

            attempt += 1;
            delay += Duration::from_secs(4 + 2 * u64::from(attempt));
            if delay > MAX_BACKOFF {
                delay = BACKOFF_RESET;
            }
            let wait = self.inner.settings.scaled(delay);
            tracing::debug!(shard_id, attempt, ?wait, "Backing off before next attempt");

            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = shutdown.cancelled() => return Err(GatewayError::Shutdown),
            }
        }
    }

    /// Cancel the current link, close the transport with `code` and wait for the loops
    async fn teardown(&self, code: u16) -> GatewayResult<()> {
        let active = self.inner.active.lock().take();
        let Some(ActiveLink { link, tasks }) = active else {
            self.inner.connected.store(false, Ordering::Release);
            return Err(GatewayError::AlreadyDisconnected);
        };

        link.cancel.cancel();
        let transport = &self.inner.transport;
        if !transport.is_disconnected() {
            if let Err(e) = transport.close(code).await {
                tracing::debug!(shard_id = self.inner.id, error = %e, "Close failed");
            }
        }

        for task in tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!(shard_id = self.inner.id, error = %e, "Connection task panicked");
                }
            }
        }

        self.inner.connected.store(false, Ordering::Release);
        self.set_status(ShardStatus::Disconnected);
        Ok(())
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("id", &self.inner.id)
            .field("total", &self.inner.total)
            .field("status", &self.status())
            .field("sequence", &self.inner.session.sequence())
            .finish()
    }
}
