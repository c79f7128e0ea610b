//! Shard manager builder

use super::{supervisor, ManagerInner, ShardManager};
use crate::connection::ShardSettings;
use crate::error::{GatewayError, GatewayResult};
use crate::events::{GatewayEvent, GatewayListener};
use crate::identify::{IdentifyGate, IdentifyMetric};
use crate::metadata::MetadataSource;
use crate::pool::EnvelopePool;
use crate::transport::{TransportFactory, WebSocketFactory};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Builder for [`ShardManager`]
///
/// Settings, metadata source, event sink and shutdown token are required.
pub struct ShardManagerBuilder {
    settings: Option<ShardSettings>,
    shard_ids: Vec<u32>,
    shard_count: Option<u32>,
    shard_rate_limit: Duration,
    identify_limit: usize,
    metric: Option<Arc<IdentifyMetric>>,
    metadata: Option<Arc<dyn MetadataSource>>,
    transports: Option<Arc<dyn TransportFactory>>,
    events: Option<mpsc::Sender<GatewayEvent>>,
    shutdown: Option<CancellationToken>,
    listener: Option<Arc<dyn GatewayListener>>,
    auto_rescale: bool,
}

impl ShardManagerBuilder {
    pub fn new() -> Self {
        Self {
            settings: None,
            shard_ids: Vec::new(),
            shard_count: None,
            shard_rate_limit: IdentifyGate::DEFAULT_RATE_LIMIT,
            identify_limit: IdentifyMetric::DEFAULT_CEILING,
            metric: None,
            metadata: None,
            transports: None,
            events: None,
            shutdown: None,
            listener: None,
            auto_rescale: true,
        }
    }

    pub fn settings(mut self, settings: ShardSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Run only these shards; by default every shard of the topology runs locally
    pub fn shard_ids(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.shard_ids = ids.into_iter().collect();
        self
    }

    /// Override the shard count recommended by the metadata source
    pub fn shard_count(mut self, count: u32) -> Self {
        self.shard_count = Some(count);
        self
    }

    /// Minimum pause between two identifies of this process
    pub fn shard_rate_limit(mut self, rate_limit: Duration) -> Self {
        self.shard_rate_limit = rate_limit;
        self
    }

    /// Identifies allowed per 24 hours
    pub fn identify_limit(mut self, limit: usize) -> Self {
        self.identify_limit = limit;
        self
    }

    /// Share an existing identify metric instead of creating one
    pub fn identify_metric(mut self, metric: Arc<IdentifyMetric>) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn metadata(mut self, metadata: Arc<dyn MetadataSource>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Defaults to [`WebSocketFactory`]
    pub fn transports(mut self, transports: Arc<dyn TransportFactory>) -> Self {
        self.transports = Some(transports);
        self
    }

    pub fn events(mut self, events: mpsc::Sender<GatewayEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn GatewayListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Redistribute automatically when the server asks for more shards (on by default)
    pub fn auto_rescale(mut self, enabled: bool) -> Self {
        self.auto_rescale = enabled;
        self
    }

    /// Build the manager and start its background tasks
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Returns `GatewayError::Config` if a required part is missing or the shard layout is invalid
    pub fn build(self) -> GatewayResult<ShardManager> {
        let settings = self
            .settings
            .ok_or_else(|| GatewayError::config("settings are required"))?;
        if settings.token.trim().is_empty() {
            return Err(GatewayError::config("token must not be empty"));
        }
        let metadata = self
            .metadata
            .ok_or_else(|| GatewayError::config("metadata source is required"))?;
        let events = self
            .events
            .ok_or_else(|| GatewayError::config("event sink is required"))?;
        let shutdown = self
            .shutdown
            .ok_or_else(|| GatewayError::config("shutdown token is required"))?;
        if !self.auto_rescale && self.listener.is_none() {
            return Err(GatewayError::config(
                "a listener is required when auto rescale is disabled",
            ));
        }
        if self.shard_count == Some(0) {
            return Err(GatewayError::config("shard count must be at least 1"));
        }
        if let Some(total) = self.shard_count {
            if let Some(bad) = self.shard_ids.iter().find(|&&id| id >= total) {
                return Err(GatewayError::config(format!(
                    "shard id {bad} is out of range for {total} shards"
                )));
            }
        }

        let metric = self
            .metric
            .unwrap_or_else(|| Arc::new(IdentifyMetric::with_ceiling(self.identify_limit)));
        let gate = IdentifyGate::spawn(self.shard_rate_limit, metric.clone(), shutdown.clone());
        let (faults, faults_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ManagerInner {
            settings,
            shard_ids: self.shard_ids,
            shard_count: self.shard_count,
            shards: DashMap::new(),
            total: AtomicU32::new(0),
            topology: tokio::sync::Mutex::new(()),
            metadata,
            transports: self.transports.unwrap_or_else(|| Arc::new(WebSocketFactory)),
            gate,
            metric,
            pool: Arc::new(EnvelopePool::default()),
            events,
            faults,
            shutdown: shutdown.clone(),
            listener: self.listener,
            auto_rescale: self.auto_rescale,
            connected: AtomicBool::new(false),
            seeded: AtomicBool::new(false),
        });
        tokio::spawn(supervisor::run(Arc::downgrade(&inner), faults_rx, shutdown));

        Ok(ShardManager { inner })
    }
}

impl Default for ShardManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
