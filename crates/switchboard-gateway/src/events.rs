//! What the gateway hands to the rest of the application

use crate::protocol::CloseCode;
use serde::de::DeserializeOwned;
use switchboard_core::Snowflake;

/// A dispatched event, payload still undecoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEvent {
    pub name: String,
    pub payload: Vec<u8>,
    pub shard_id: u32,
}

impl GatewayEvent {
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// A shard stopped because the server closed it with a code that forbids reconnecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardFault {
    pub shard_id: u32,
    pub code: CloseCode,
}

/// Receives conditions the gateway cannot resolve on its own
pub trait GatewayListener: Send + Sync {
    fn on_fault(&self, fault: &ShardFault);

    /// Entities no local shard owns after routing or redistribution
    fn on_unhandled(&self, entities: &[Snowflake]) {
        let _ = entities;
    }
}

/// Listener that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl GatewayListener for LoggingListener {
    fn on_fault(&self, fault: &ShardFault) {
        tracing::error!(shard_id = fault.shard_id, code = %fault.code, "Shard stopped");
    }

    fn on_unhandled(&self, entities: &[Snowflake]) {
        tracing::warn!(count = entities.len(), ?entities, "Entities without an owning shard");
    }
}
