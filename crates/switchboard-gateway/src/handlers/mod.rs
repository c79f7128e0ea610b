//! Inbound frame handlers
//!
//! One function per server op code. Handlers run on the receive loop, so anything slow is
//! spawned and bound to the link.

mod dispatch;
mod hello;
mod invalid_session;

use crate::connection::{heartbeat, Link, Shard};
use crate::protocol::{Envelope, OpCode};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

/// A frame that decoded but could not be acted on
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("payload decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type HandlerResult = Result<(), HandlerError>;

/// Route an envelope to its handler
pub(crate) async fn dispatch(shard: &Shard, link: &Arc<Link>, envelope: &Envelope) -> HandlerResult {
    let shard_id = shard.id();
    let Some(op) = envelope.op_code() else {
        tracing::debug!(shard_id, op = envelope.raw_op(), "Ignoring unknown op code");
        return Ok(());
    };

    match op {
        OpCode::Dispatch => dispatch::handle(shard, link, envelope).await,
        OpCode::Hello => hello::handle(shard, link, envelope),
        OpCode::Heartbeat => {
            tracing::trace!(shard_id, "Heartbeat requested by server");
            heartbeat::send(shard, link);
            Ok(())
        }
        OpCode::HeartbeatAck => {
            shard.session().record_heartbeat_ack(Instant::now());
            Ok(())
        }
        OpCode::Reconnect => {
            tracing::info!(shard_id, "Server requested reconnect");
            shard.abort(link, "reconnect requested");
            Ok(())
        }
        OpCode::InvalidSession => invalid_session::handle(shard, link, envelope),
        OpCode::Identify
        | OpCode::PresenceUpdate
        | OpCode::VoiceStateUpdate
        | OpCode::Resume
        | OpCode::RequestGuildMembers => {
            tracing::warn!(shard_id, op = %op, "Server sent a client op code");
            Ok(())
        }
    }
}
