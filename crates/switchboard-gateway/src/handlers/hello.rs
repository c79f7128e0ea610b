use super::{HandlerError, HandlerResult};
use crate::connection::{heartbeat, Link, Shard, ShardStatus};
use crate::protocol::{Envelope, HelloPayload};
use std::sync::Arc;
use std::time::Duration;

/// Start heartbeating and send identify or resume
///
/// The pending `connect` completes once the handshake frame is written.
pub(super) fn handle(shard: &Shard, link: &Arc<Link>, envelope: &Envelope) -> HandlerResult {
    let hello: HelloPayload = envelope.payload_as()?;
    if hello.heartbeat_interval == 0 {
        return Err(HandlerError::InvalidPayload("heartbeat interval is zero".to_string()));
    }
    let interval = Duration::from_millis(hello.heartbeat_interval);
    let session = shard.session();
    session.set_heartbeat_interval(interval);

    let Some(written) = link.take_handshake() else {
        tracing::debug!(shard_id = shard.id(), "Duplicate Hello ignored");
        return Ok(());
    };

    let message = if session.is_virgin() {
        shard.set_status(ShardStatus::Identifying);
        shard.identify_message()?
    } else {
        shard.set_status(ShardStatus::Resuming);
        shard.resume_message()?
    };
    tracing::debug!(shard_id = shard.id(), ?interval, op = %message.op, "Hello received");

    link.send_direct(message, Some(written));
    heartbeat::start(shard, link, interval);
    Ok(())
}
