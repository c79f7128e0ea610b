//! Envelope recycling

use crate::protocol::Envelope;
use parking_lot::Mutex;

/// Free list of decoded envelopes shared by every shard
///
/// An envelope goes back into the pool once the handler for it has returned.
#[derive(Debug)]
pub struct EnvelopePool {
    free: Mutex<Vec<Envelope>>,
    max_idle: usize,
}

impl EnvelopePool {
    pub const DEFAULT_MAX_IDLE: usize = 64;

    pub fn new(max_idle: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
        }
    }

    pub fn get(&self) -> Envelope {
        self.free.lock().pop().unwrap_or_default()
    }

    pub fn put(&self, mut envelope: Envelope) {
        envelope.reset();
        let mut free = self.free.lock();
        if free.len() < self.max_idle {
            free.push(envelope);
        }
    }

    /// Envelopes currently waiting for reuse
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

impl Default for EnvelopePool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_IDLE)
    }
}
