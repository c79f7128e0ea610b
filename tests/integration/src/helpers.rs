//! Test harnesses
//!
//! Every harness spawns tasks, so it must be created inside a tokio runtime. Tests that depend
//! on timers run with paused time; `expect_*` helpers use a generous timeout that only elapses
//! when the expected frame never comes.

use crate::fixtures::GATEWAY_URL;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use switchboard_gateway::metadata::StaticMetadata;
use switchboard_gateway::protocol::GatewayMessage;
use switchboard_gateway::transport::{
    MemoryTransport, MemoryTransportHandle, Transport, TransportEvent, TransportFactory,
};
use switchboard_gateway::{
    GatewayEvent, GatewayMetadata, IdentifyGate, IdentifyMetric, Shard, ShardContext, ShardFault,
    ShardManager, ShardSettings,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const EXPECT_TIMEOUT: Duration = Duration::from_secs(600);

/// Pause between identifies in tests
pub const TEST_RATE_LIMIT: Duration = Duration::from_millis(10);

/// One shard and the server side of its transport
pub struct TestShard {
    pub shard: Shard,
    pub server: MemoryTransportHandle,
    pub events: mpsc::Receiver<GatewayEvent>,
    pub faults: mpsc::UnboundedReceiver<ShardFault>,
    pub shutdown: CancellationToken,
}

impl TestShard {
    pub fn new(settings: ShardSettings) -> Self {
        Self::with_metric(settings, Arc::new(IdentifyMetric::default()))
    }

    pub fn with_metric(settings: ShardSettings, metric: Arc<IdentifyMetric>) -> Self {
        let shutdown = CancellationToken::new();
        let gate = IdentifyGate::spawn(TEST_RATE_LIMIT, metric, shutdown.clone());
        let (events, events_rx) = mpsc::channel(64);
        let (faults, faults_rx) = mpsc::unbounded_channel();
        let (transport, server) = MemoryTransport::new();

        let shard = Shard::new(
            0,
            1,
            GATEWAY_URL,
            settings,
            Arc::new(transport),
            ShardContext::new(gate, events, shutdown.clone()).with_faults(faults),
        );
        Self {
            shard,
            server,
            events: events_rx,
            faults: faults_rx,
            shutdown,
        }
    }

    /// Connect through the gate, answering Hello; returns the handshake frame
    pub async fn connect_with_hello(&self, heartbeat_interval: u64) -> GatewayMessage {
        let connecting = {
            let shard = self.shard.clone();
            tokio::spawn(async move { shard.reconnect_loop().await })
        };
        expect_opened(&self.server).await;
        self.server.push(&GatewayMessage::hello(heartbeat_interval));
        let handshake = expect_written(&self.server).await;
        connecting
            .await
            .expect("reconnect loop panicked")
            .expect("connect failed");
        handshake
    }
}

impl Drop for TestShard {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Transport factory remembering the server handle of every transport it creates
#[derive(Clone, Default)]
pub struct MemoryFleet {
    handles: Arc<Mutex<HashMap<u32, MemoryTransportHandle>>>,
}

impl MemoryFleet {
    /// Handle of the latest transport created for `shard_id`
    pub fn handle(&self, shard_id: u32) -> Option<MemoryTransportHandle> {
        self.handles.lock().get(&shard_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }
}

impl TransportFactory for MemoryFleet {
    fn create(&self, shard_id: u32) -> Arc<dyn Transport> {
        let (transport, handle) = MemoryTransport::new();
        self.handles.lock().insert(shard_id, handle);
        Arc::new(transport)
    }
}

/// A shard manager backed by a [`MemoryFleet`] and swappable metadata
pub struct TestManager {
    pub manager: ShardManager,
    pub fleet: MemoryFleet,
    pub metadata: Arc<StaticMetadata>,
    pub events: mpsc::Receiver<GatewayEvent>,
    pub shutdown: CancellationToken,
}

impl TestManager {
    pub fn new(shards: u32) -> Self {
        let fleet = MemoryFleet::default();
        let metadata = Arc::new(StaticMetadata::new(GatewayMetadata::new(GATEWAY_URL, shards)));
        let shutdown = CancellationToken::new();
        let (events, events_rx) = mpsc::channel(256);

        let manager = ShardManager::builder()
            .settings(ShardSettings::new("token"))
            .metadata(metadata.clone())
            .transports(Arc::new(fleet.clone()))
            .events(events)
            .shutdown(shutdown.clone())
            .shard_rate_limit(TEST_RATE_LIMIT)
            .build()
            .expect("manager config is valid");

        Self {
            manager,
            fleet,
            metadata,
            events: events_rx,
            shutdown,
        }
    }

    /// Wait for shard `shard_id` to open its transport, then answer Hello
    pub async fn accept(&self, shard_id: u32) -> GatewayMessage {
        let server = wait_for(|| self.fleet.handle(shard_id)).await;
        expect_opened(&server).await;
        server.push(&GatewayMessage::hello(45_000));
        expect_written(&server).await
    }
}

impl Drop for TestManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub async fn expect_event(server: &MemoryTransportHandle) -> TransportEvent {
    tokio::time::timeout(EXPECT_TIMEOUT, server.next_event())
        .await
        .expect("timed out waiting for a transport event")
        .expect("transport dropped")
}

pub async fn expect_written(server: &MemoryTransportHandle) -> GatewayMessage {
    tokio::time::timeout(EXPECT_TIMEOUT, server.next_written())
        .await
        .expect("timed out waiting for a written frame")
        .expect("transport dropped")
}

/// Wait for an `Opened` event, returning its endpoint
pub async fn expect_opened(server: &MemoryTransportHandle) -> String {
    match expect_event(server).await {
        TransportEvent::Opened { endpoint } => endpoint,
        other => panic!("expected open, got {other:?}"),
    }
}

/// Poll `probe` until it yields something, letting other tasks and timers run in between
pub async fn wait_for<T>(mut probe: impl FnMut() -> Option<T>) -> T {
    let waiting = async {
        loop {
            if let Some(value) = probe() {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };
    tokio::time::timeout(EXPECT_TIMEOUT, waiting)
        .await
        .expect("condition never became true")
}

/// Let spawned tasks run until they block
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}
