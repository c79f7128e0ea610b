use super::{HandlerError, HandlerResult};
use crate::connection::{Link, Shard, ShardStatus};
use crate::events::GatewayEvent;
use crate::protocol::{Envelope, ReadyPayload};
use std::sync::Arc;

const READY: &str = "READY";
const RESUMED: &str = "RESUMED";

pub(super) async fn handle(shard: &Shard, link: &Arc<Link>, envelope: &Envelope) -> HandlerResult {
    let shard_id = shard.id();
    let sequence = envelope
        .sequence()
        .ok_or_else(|| HandlerError::InvalidPayload("dispatch without sequence".to_string()))?;

    if let Err(expected) = shard.session().advance(sequence) {
        tracing::warn!(shard_id, sequence, expected, "Sequence gap, reconnecting");
        shard.abort(link, "sequence mismatch");
        return Ok(());
    }

    match envelope.event_name() {
        READY => {
            let ready: ReadyPayload = envelope.payload_as()?;
            tracing::info!(shard_id, session_id = %ready.session_id, "Session ready");
            shard.session().set_ready(ready.session_id, ready.resume_gateway_url);
            shard.set_status(ShardStatus::Active);
        }
        RESUMED => {
            tracing::info!(shard_id, sequence, "Session resumed");
            shard.set_status(ShardStatus::Active);
        }
        _ => {}
    }

    if shard.settings().is_ignored(envelope.event_name()) {
        return Ok(());
    }

    let event = GatewayEvent {
        name: envelope.event_name().to_string(),
        payload: envelope.payload().to_vec(),
        shard_id,
    };
    shard.forward(link, event).await;
    Ok(())
}
