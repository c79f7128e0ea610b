//! Shard manager
//!
//! Owns every local shard of the process, routes commands to the shard that owns their entity
//! and moves queued work over when the shard count changes.

mod builder;
mod routing;
mod supervisor;

pub use builder::ShardManagerBuilder;

use crate::connection::{Shard, ShardContext, ShardSettings};
use crate::error::{GatewayError, GatewayResult};
use crate::events::{GatewayEvent, GatewayListener, ShardFault};
use crate::identify::{IdentifyGate, IdentifyMetric};
use crate::metadata::{GatewayMetadata, MetadataSource};
use crate::pool::EnvelopePool;
use crate::protocol::GatewayCommand;
use crate::transport::TransportFactory;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::Snowflake;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub(crate) struct ManagerInner {
    settings: ShardSettings,
    /// Configured ids; empty means every shard of the topology
    shard_ids: Vec<u32>,
    shard_count: Option<u32>,
    shards: DashMap<u32, Shard>,
    total: AtomicU32,
    /// Serializes shard initialization and redistribution
    topology: tokio::sync::Mutex<()>,
    metadata: Arc<dyn MetadataSource>,
    transports: Arc<dyn TransportFactory>,
    gate: IdentifyGate,
    metric: Arc<IdentifyMetric>,
    pool: Arc<EnvelopePool>,
    events: mpsc::Sender<GatewayEvent>,
    faults: mpsc::UnboundedSender<ShardFault>,
    shutdown: CancellationToken,
    listener: Option<Arc<dyn GatewayListener>>,
    auto_rescale: bool,
    /// Between `connect` and `disconnect`
    connected: AtomicBool,
    seeded: AtomicBool,
}

/// Handle to the local shard set
///
/// Cheap to clone.
#[derive(Clone)]
pub struct ShardManager {
    inner: Arc<ManagerInner>,
}

impl ShardManager {
    pub fn builder() -> ShardManagerBuilder {
        ShardManagerBuilder::new()
    }

    /// Create the shards without connecting them
    ///
    /// Runs once; later calls keep the existing shard set.
    pub async fn init(&self) -> GatewayResult<()> {
        let _topology = self.inner.topology.lock().await;
        if !self.inner.shards.is_empty() {
            return Ok(());
        }

        let metadata = self.inner.metadata.gateway_metadata().await?;
        if !self.inner.seeded.swap(true, Ordering::AcqRel) {
            self.inner.metric.seed(&metadata.session_start_limit);
        }
        self.install(&metadata, true)
    }

    /// Initialize if needed, then bring every shard up through the identify gate
    ///
    /// Returns once each shard has sent its handshake or given up for good.
    pub async fn connect(&self) -> GatewayResult<()> {
        self.init().await?;
        self.inner.connected.store(true, Ordering::Release);

        let shards = self.shards();
        tracing::info!(shards = shards.len(), total = self.shard_count(), "Connecting shards");
        let results = futures::future::join_all(shards.iter().map(|shard| shard.reconnect_loop())).await;

        for (shard, result) in shards.iter().zip(results) {
            match result {
                Ok(()) => {}
                Err(GatewayError::Shutdown) => return Err(GatewayError::Shutdown),
                Err(e) => tracing::warn!(shard_id = shard.id(), error = %e, "Shard did not connect"),
            }
        }
        Ok(())
    }

    /// Route a command to the owning shards
    ///
    /// Returns the entities no local shard owns or whose shard refused the command.
    pub fn emit(&self, command: GatewayCommand) -> GatewayResult<Vec<Snowflake>> {
        self.route(&command, false)
    }

    /// Disconnect every shard and forget their sessions
    pub async fn disconnect(&self) -> GatewayResult<()> {
        self.inner.connected.store(false, Ordering::Release);
        for shard in self.shards() {
            match shard.disconnect().await {
                Ok(()) | Err(GatewayError::AlreadyDisconnected) => {}
                Err(e) => tracing::warn!(shard_id = shard.id(), error = %e, "Disconnect failed"),
            }
            shard.reset_session();
        }
        Ok(())
    }

    /// Latency of every shard that has had a heartbeat acknowledged
    pub fn heartbeat_latencies(&self) -> HashMap<u32, Duration> {
        self.inner
            .shards
            .iter()
            .filter_map(|entry| entry.value().heartbeat_latency().map(|l| (*entry.key(), l)))
            .collect()
    }

    /// Shard count of the current topology; 0 before `init`
    pub fn shard_count(&self) -> u32 {
        self.inner.total.load(Ordering::Acquire)
    }

    pub fn get_shard(&self, id: u32) -> Option<Shard> {
        self.inner.shards.get(&id).map(|entry| entry.value().clone())
    }

    /// Local shards ordered by id
    pub fn shards(&self) -> Vec<Shard> {
        let mut shards: Vec<Shard> = self.inner.shards.iter().map(|e| e.value().clone()).collect();
        shards.sort_by_key(Shard::id);
        shards
    }

    pub fn identify_metric(&self) -> &Arc<IdentifyMetric> {
        &self.inner.metric
    }

    /// Rebuild the shard set from fresh metadata and replay unsent commands
    ///
    /// Returns the entities left without an owner, which are also passed to the listener.
    pub async fn redistribute(&self) -> GatewayResult<Vec<Snowflake>> {
        let _topology = self.inner.topology.lock().await;
        let metadata = self.inner.metadata.gateway_metadata().await?;
        let previous = self.shard_count();

        let old = self.shards();
        let mut stolen = Vec::new();
        for shard in &old {
            stolen.extend(shard.steal_queue());
        }
        for shard in &old {
            match shard.disconnect().await {
                Ok(()) | Err(GatewayError::AlreadyDisconnected) => {}
                Err(e) => tracing::debug!(shard_id = shard.id(), error = %e, "Disconnect failed"),
            }
        }
        self.inner.shards.clear();

        self.install(&metadata, false)?;
        tracing::info!(
            from = previous,
            to = self.shard_count(),
            replayed = stolen.len(),
            "Redistributing shards"
        );

        let mut unhandled = Vec::new();
        for command in routing::merge_commands(stolen) {
            match self.route(&command, true) {
                Ok(entities) => unhandled.extend(entities),
                Err(e) => {
                    tracing::warn!(command = command.name(), error = %e, "Replay failed");
                    unhandled.extend(command.entities());
                }
            }
        }

        if !unhandled.is_empty() {
            self.notify_unhandled(&unhandled);
        }

        if self.inner.connected.load(Ordering::Acquire) {
            for shard in self.shards() {
                tokio::spawn(async move {
                    if let Err(e) = shard.reconnect_loop().await {
                        tracing::warn!(shard_id = shard.id(), error = %e, "Shard did not reconnect");
                    }
                });
            }
        }
        Ok(unhandled)
    }

    /// Create shards for `metadata`, honoring configured ids and count when `configured`
    fn install(&self, metadata: &GatewayMetadata, configured: bool) -> GatewayResult<()> {
        let inner = &self.inner;
        let total = if configured {
            inner.shard_count.unwrap_or(metadata.shards)
        } else {
            metadata.shards
        }
        .max(1);

        let ids: Vec<u32> = if configured && !inner.shard_ids.is_empty() {
            inner.shard_ids.clone()
        } else {
            (0..total).collect()
        };
        if let Some(bad) = ids.iter().find(|&&id| id >= total) {
            return Err(GatewayError::config(format!(
                "shard id {bad} is out of range for {total} shards"
            )));
        }

        let context = ShardContext::new(inner.gate.clone(), inner.events.clone(), inner.shutdown.clone())
            .with_pool(inner.pool.clone())
            .with_faults(inner.faults.clone());

        for id in ids {
            let shard = Shard::new(
                id,
                total,
                metadata.url.clone(),
                inner.settings.clone(),
                inner.transports.create(id),
                context.clone(),
            );
            inner.shards.insert(id, shard);
        }
        inner.total.store(total, Ordering::Release);
        tracing::debug!(total, local = inner.shards.len(), url = %metadata.url, "Shards initialized");
        Ok(())
    }

    fn notify_unhandled(&self, entities: &[Snowflake]) {
        match &self.inner.listener {
            Some(listener) => listener.on_unhandled(entities),
            None => tracing::warn!(count = entities.len(), "Entities left without a shard"),
        }
    }

    fn report_fault(&self, fault: &ShardFault) {
        match &self.inner.listener {
            Some(listener) => listener.on_fault(fault),
            None => tracing::error!(shard_id = fault.shard_id, code = %fault.code, "Unhandled shard fault"),
        }
    }
}

impl std::fmt::Debug for ShardManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardManager")
            .field("total", &self.shard_count())
            .field("local", &self.inner.shards.len())
            .field("auto_rescale", &self.inner.auto_rescale)
            .finish()
    }
}
