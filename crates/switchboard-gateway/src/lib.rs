//! # switchboard-gateway
//!
//! Sharded client for a real-time gateway: per-shard sessions with identify, resume and
//! heartbeats, local rate limits, an outgoing command queue, process-wide identify admission
//! and a shard manager that routes commands and rescales.

pub mod connection;
pub mod error;
pub mod events;
mod handlers;
pub mod identify;
pub mod manager;
pub mod metadata;
pub mod pool;
pub mod protocol;
pub mod queue;
pub mod ratelimit;
pub mod transport;

pub use connection::{Session, Shard, ShardContext, ShardSettings, ShardStatus};
pub use error::{GatewayError, GatewayResult};
pub use events::{GatewayEvent, GatewayListener, LoggingListener, ShardFault};
pub use identify::{IdentifyGate, IdentifyMetric};
pub use manager::{ShardManager, ShardManagerBuilder};
pub use metadata::{GatewayMetadata, HttpMetadataSource, MetadataSource, StaticMetadata};
pub use protocol::GatewayCommand;

use std::sync::Arc;
use std::time::Duration;
use switchboard_common::{AppConfig, AppError, AppResult};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const EVENT_BUFFER: usize = 1024;

/// Run the gateway until ctrl-c
pub async fn run(config: AppConfig) -> AppResult<()> {
    let metadata = HttpMetadataSource::new(&config.bot.api_base_url, &config.bot.token)
        .map_err(|e| AppError::Metadata(e.to_string()))?;

    let settings = ShardSettings::new(config.bot.token.clone())
        .with_intents(config.bot.intents)
        .with_ignore_events(config.bot.ignore_events.iter().cloned());

    let shutdown = CancellationToken::new();
    let (events, mut events_rx) = mpsc::channel(EVENT_BUFFER);

    let mut builder = ShardManager::builder()
        .settings(settings)
        .metadata(Arc::new(metadata))
        .events(events)
        .shutdown(shutdown.clone())
        .listener(Arc::new(LoggingListener))
        .shard_rate_limit(Duration::from_millis(config.sharding.shard_rate_limit_ms))
        .identify_limit(config.sharding.identify_daily_limit)
        .auto_rescale(config.sharding.auto_rescale);
    if !config.sharding.shard_ids.is_empty() {
        builder = builder.shard_ids(config.sharding.shard_ids.iter().copied());
    }
    if let Some(count) = config.sharding.shard_count {
        builder = builder.shard_count(count);
    }
    let manager = builder.build().map_err(AppError::gateway)?;

    let consumer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            tracing::debug!(shard_id = event.shard_id, event = %event.name, bytes = event.payload.len(), "Dispatch");
        }
    });

    tracing::info!(name = %config.app.name, "Starting gateway");
    let connecting = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect().await })
    };

    tokio::signal::ctrl_c().await.map_err(AppError::internal)?;
    tracing::info!("Shutdown signal received");

    manager.disconnect().await.map_err(AppError::gateway)?;
    shutdown.cancel();

    match connecting.await {
        Ok(Ok(()) | Err(GatewayError::Shutdown)) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Connect ended with an error"),
        Err(e) => tracing::error!(error = %e, "Connect task failed"),
    }
    drop(manager);
    consumer.abort();

    tracing::info!("Gateway stopped");
    Ok(())
}
