//! Heartbeating
//!
//! Started by Hello. Every tick checks that the previous heartbeat was acknowledged before
//! sending the next one; a missing ack means the connection is dead.

use super::link::Link;
use super::shard::Shard;
use crate::protocol::GatewayMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Start the heartbeat loop for `link` unless it already runs
pub(crate) fn start(shard: &Shard, link: &Arc<Link>, interval: Duration) {
    if !shard.claim_heartbeat(link) {
        tracing::debug!(shard_id = shard.id(), "Heartbeat already running");
        return;
    }
    let task = tokio::spawn(run(shard.clone(), link.clone(), interval));
    shard.attach(link, task);
}

/// Send one heartbeat with the last sequence number
pub(crate) fn send(shard: &Shard, link: &Link) {
    let session = shard.session();
    session.record_heartbeat_sent(Instant::now());
    link.send_direct(GatewayMessage::heartbeat(session.last_sequence()), None);
}

async fn run(shard: Shard, link: Arc<Link>, interval: Duration) {
    let shard_id = shard.id();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::debug!(shard_id, ?interval, "Heartbeat started");

    loop {
        tokio::select! {
            biased;
            () = link.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if !shard.session().check_heartbeat_ack() {
            // The ack may be sitting unread behind events the application has not taken
            if shard.is_stalled() {
                tracing::warn!(shard_id, "Heartbeat ack pending behind a slow event consumer");
            } else {
                tracing::warn!(shard_id, "Heartbeat was not acknowledged");
                shard.abort(&link, "heartbeat ack missing");
                break;
            }
        }
        send(&shard, &link);
    }

    shard.release_heartbeat(&link);
    tracing::trace!(shard_id, "Heartbeat stopped");
}
