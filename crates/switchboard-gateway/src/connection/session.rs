//! Session state
//!
//! Written by the receive loop and read by the heartbeat loop, hence the lock.

use parking_lot::RwLock;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct SessionInner {
    session_id: String,
    sequence: u64,
    resume_url: Option<String>,
    heartbeat_interval: Duration,
    last_heartbeat_sent: Option<Instant>,
    last_heartbeat_ack: Option<Instant>,
    latency: Option<Duration>,
}

/// Resumable session of one shard
#[derive(Debug, Default)]
pub struct Session {
    inner: RwLock<SessionInner>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never identified: no session id and no sequence number
    ///
    /// Decides between identify and resume.
    pub fn is_virgin(&self) -> bool {
        let inner = self.inner.read();
        inner.session_id.is_empty() && inner.sequence == 0
    }

    pub fn session_id(&self) -> String {
        self.inner.read().session_id.clone()
    }

    pub fn sequence(&self) -> u64 {
        self.inner.read().sequence
    }

    /// Last sequence as sent in heartbeats, `None` before the first dispatch
    pub fn last_sequence(&self) -> Option<u64> {
        let sequence = self.sequence();
        (sequence != 0).then_some(sequence)
    }

    pub fn resume_url(&self) -> Option<String> {
        self.inner.read().resume_url.clone()
    }

    /// Accept `sequence` only if it directly follows the current one
    ///
    /// On a gap the stored sequence is left untouched and the expected value is returned.
    pub fn advance(&self, sequence: u64) -> Result<(), u64> {
        let mut inner = self.inner.write();
        let expected = inner.sequence + 1;
        if sequence != expected {
            return Err(expected);
        }
        inner.sequence = sequence;
        Ok(())
    }

    pub fn set_ready(&self, session_id: impl Into<String>, resume_url: Option<String>) {
        let mut inner = self.inner.write();
        inner.session_id = session_id.into();
        inner.resume_url = resume_url;
    }

    /// Forget the session so the next handshake identifies
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.session_id.clear();
        inner.sequence = 0;
        inner.resume_url = None;
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.inner.read().heartbeat_interval
    }

    pub fn set_heartbeat_interval(&self, interval: Duration) {
        self.inner.write().heartbeat_interval = interval;
    }

    /// Clear heartbeat bookkeeping from a previous connection
    pub fn reset_heartbeat(&self) {
        let mut inner = self.inner.write();
        inner.last_heartbeat_sent = None;
        inner.last_heartbeat_ack = None;
    }

    pub fn record_heartbeat_sent(&self, at: Instant) {
        self.inner.write().last_heartbeat_sent = Some(at);
    }

    pub fn record_heartbeat_ack(&self, at: Instant) {
        self.inner.write().last_heartbeat_ack = Some(at);
    }

    /// Whether the previous heartbeat, if any, was acknowledged
    ///
    /// Also updates the latency from that round trip.
    pub fn check_heartbeat_ack(&self) -> bool {
        let mut inner = self.inner.write();
        match (inner.last_heartbeat_sent, inner.last_heartbeat_ack) {
            (None, _) => true,
            (Some(sent), Some(ack)) if ack >= sent => {
                inner.latency = Some(ack - sent);
                true
            }
            _ => false,
        }
    }

    pub fn latency(&self) -> Option<Duration> {
        self.inner.read().latency
    }
}
