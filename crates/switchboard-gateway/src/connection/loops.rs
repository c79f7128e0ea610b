//! Receive and emit loops of a live connection

use super::link::{DirectFrame, Link};
use super::shard::Shard;
use crate::handlers;
use crate::transport::TransportError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Read frames until the link is cancelled or the transport fails
pub(crate) async fn receive_loop(shard: Shard, link: Arc<Link>) {
    let shard_id = shard.id();
    loop {
        let frame = tokio::select! {
            biased;
            () = link.cancel.cancelled() => break,
            frame = shard.transport().read() => frame,
        };

        match frame {
            Ok(bytes) => handle_frame(&shard, &link, &bytes).await,
            Err(e) => {
                if !link.is_closed() {
                    shard.handle_read_error(&link, e);
                }
                break;
            }
        }
    }

    // A connect still waiting for the handshake learns the link is gone
    drop(link.take_handshake());
    tracing::trace!(shard_id, link = link.id, "Receive loop stopped");
}

async fn handle_frame(shard: &Shard, link: &Arc<Link>, bytes: &[u8]) {
    let shard_id = shard.id();
    let mut envelope = shard.pool().get();

    let outcome = match envelope.decode_from(bytes) {
        Ok(()) => handlers::dispatch(shard, link, &envelope).await,
        Err(e) => Err(e.into()),
    };

    match outcome {
        Ok(()) => shard.clear_malformed(),
        Err(e) => {
            tracing::warn!(shard_id, op = envelope.raw_op(), error = %e, "Discarding malformed frame");
            if shard.record_malformed() {
                shard.abort(link, "too many malformed frames");
            }
        }
    }

    shard.pool().put(envelope);
}

/// Write direct frames as they come and one queued command per tick
pub(crate) async fn emit_loop(
    shard: Shard,
    link: Arc<Link>,
    mut direct: mpsc::UnboundedReceiver<DirectFrame>,
) {
    let shard_id = shard.id();
    let mut ticker = tokio::time::interval(shard.settings().emit_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = link.cancel.cancelled() => break,
            Some(frame) = direct.recv() => {
                let write = shard.transport().write_json(&frame.message);
                let Some(result) = until_cancelled(&link, write).await else {
                    break;
                };
                if let Err(e) = result {
                    write_failed(&shard, &link, &e);
                    break;
                }
                tracing::trace!(shard_id, op = %frame.message.op, "Direct frame written");
                if let Some(written) = frame.written {
                    let _ = written.send(());
                }
            }
            _ = ticker.tick() => {
                let Some(result) = until_cancelled(&link, drain_one(&shard)).await else {
                    break;
                };
                if let Err(e) = result {
                    write_failed(&shard, &link, &e);
                    break;
                }
            }
        }
    }

    tracing::trace!(shard_id, link = link.id, "Emit loop stopped");
}

/// Run a write unless the link is cancelled first; a dropped write leaves the queue head in place
async fn until_cancelled<F: Future>(link: &Link, write: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = link.cancel.cancelled() => None,
        output = write => Some(output),
    }
}

async fn drain_one(shard: &Shard) -> Result<bool, TransportError> {
    let transport = shard.transport().clone();
    let shard_id = shard.id();
    shard
        .queue()
        .try_send(|command| async move {
            let message = match command.to_message() {
                Ok(message) => message,
                Err(e) => {
                    // Retrying will not make it serializable
                    tracing::error!(shard_id, command = command.name(), error = %e, "Dropping unserializable command");
                    return Ok(());
                }
            };
            transport.write_json(&message).await
        })
        .await
}

fn write_failed(shard: &Shard, link: &Link, error: &TransportError) {
    if link.is_closed() {
        return;
    }
    tracing::warn!(shard_id = shard.id(), error = %error, "Write failed");
    shard.abort(link, "write failed");
}
