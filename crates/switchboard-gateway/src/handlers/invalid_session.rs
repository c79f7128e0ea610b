use super::HandlerResult;
use crate::connection::{Link, Shard, ShardStatus};
use crate::protocol::Envelope;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Forget the session and identify again after a short random wait
///
/// The resumable flag is ignored; resuming an invalidated session rarely works.
pub(super) fn handle(shard: &Shard, link: &Arc<Link>, envelope: &Envelope) -> HandlerResult {
    let resumable: Option<bool> = envelope.payload_as()?;
    let shard_id = shard.id();
    shard.session().reset();

    let jitter = Duration::from_millis(rand::thread_rng().gen_range(1_000..=5_000));
    let wait = shard.settings().scaled(jitter);
    tracing::warn!(shard_id, ?resumable, ?wait, "Session invalidated, identifying again");

    let task = {
        let shard = shard.clone();
        let link = link.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = link.cancel.cancelled() => return,
            }
            match shard.identify_message() {
                Ok(message) => {
                    shard.set_status(ShardStatus::Identifying);
                    link.send_direct(message, None);
                }
                Err(e) => {
                    tracing::error!(shard_id, error = %e, "Could not build identify");
                    shard.abort(&link, "identify failed");
                }
            }
        })
    };
    shard.attach(link, task);
    Ok(())
}
