use super::IdentifyMetric;
use crate::error::{GatewayError, GatewayResult};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

struct IdentifyRequest {
    shard_id: u32,
    run: BoxFuture<'static, GatewayResult<()>>,
    reply: oneshot::Sender<GatewayResult<()>>,
}

/// Process-wide serializer of connection attempts
///
/// One worker task executes queued attempts strictly in arrival order. After a successful
/// attempt it records the identify and holds the gate for the shard rate limit, or longer when
/// the daily quota is exhausted.
#[derive(Clone)]
pub struct IdentifyGate {
    requests: mpsc::UnboundedSender<IdentifyRequest>,
    metric: Arc<IdentifyMetric>,
    shutdown: CancellationToken,
}

impl IdentifyGate {
    /// Default pause between two identifies
    pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_secs(5);

    /// Start the worker on the current runtime
    pub fn spawn(rate_limit: Duration, metric: Arc<IdentifyMetric>, shutdown: CancellationToken) -> Self {
        let (requests, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker(rx, rate_limit, metric.clone(), shutdown.clone()));
        Self {
            requests,
            metric,
            shutdown,
        }
    }

    pub fn metric(&self) -> &Arc<IdentifyMetric> {
        &self.metric
    }

    /// Queue `attempt` and wait for its outcome
    ///
    /// Returns [`GatewayError::Shutdown`] without running the attempt once shutdown fires.
    pub async fn run(
        &self,
        shard_id: u32,
        attempt: BoxFuture<'static, GatewayResult<()>>,
    ) -> GatewayResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(GatewayError::Shutdown);
        }

        let (reply, outcome) = oneshot::channel();
        self.requests
            .send(IdentifyRequest {
                shard_id,
                run: attempt,
                reply,
            })
            .map_err(|_| GatewayError::Shutdown)?;

        tokio::select! {
            result = outcome => result.unwrap_or(Err(GatewayError::Shutdown)),
            () = self.shutdown.cancelled() => Err(GatewayError::Shutdown),
        }
    }
}

async fn worker(
    mut requests: mpsc::UnboundedReceiver<IdentifyRequest>,
    rate_limit: Duration,
    metric: Arc<IdentifyMetric>,
    shutdown: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };
        let IdentifyRequest { shard_id, run, reply } = request;

        let penalty = metric.penalty();
        if !penalty.is_zero() {
            tracing::warn!(shard_id, wait = ?penalty, "Identify quota exhausted, holding connection attempt");
            tokio::select! {
                () = tokio::time::sleep(penalty) => {}
                () = shutdown.cancelled() => break,
            }
        }

        tracing::debug!(shard_id, "Running connection attempt");
        let result = tokio::select! {
            result = run => result,
            () = shutdown.cancelled() => Err(GatewayError::Shutdown),
        };
        let succeeded = result.is_ok();
        // The requester may have given up on shutdown
        let _ = reply.send(result);

        if !succeeded {
            continue;
        }

        metric.record();
        let cooldown = rate_limit.max(metric.penalty());
        tracing::trace!(shard_id, ?cooldown, identifies = metric.count(), "Identify recorded");
        tokio::select! {
            () = tokio::time::sleep(cooldown) => {}
            () = shutdown.cancelled() => break,
        }
    }

    tracing::debug!("Identify gate stopped");
}
