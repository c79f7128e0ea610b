//! Handles faults reported by shards

use super::{ManagerInner, ShardManager};
use crate::events::ShardFault;
use std::sync::Weak;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub(super) async fn run(
    manager: Weak<ManagerInner>,
    mut faults: mpsc::UnboundedReceiver<ShardFault>,
    shutdown: CancellationToken,
) {
    loop {
        let fault = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            fault = faults.recv() => match fault {
                Some(fault) => fault,
                None => break,
            },
        };
        let Some(inner) = manager.upgrade() else {
            break;
        };
        let manager = ShardManager { inner };

        if !(fault.code.requires_rescale() && manager.inner.auto_rescale) {
            manager.report_fault(&fault);
            continue;
        }

        tracing::warn!(shard_id = fault.shard_id, code = %fault.code, "Server requires more shards");
        match manager.redistribute().await {
            Ok(unhandled) => {
                tracing::info!(total = manager.shard_count(), unhandled = unhandled.len(), "Rescaled");
            }
            Err(e) => {
                tracing::error!(error = %e, "Redistribution failed");
                manager.report_fault(&fault);
            }
        }

        // The old shard set may have reported the same condition more than once
        while let Ok(pending) = faults.try_recv() {
            if !pending.code.requires_rescale() {
                manager.report_fault(&pending);
            }
        }
    }
    tracing::debug!("Fault supervisor stopped");
}
