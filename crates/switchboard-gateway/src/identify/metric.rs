use crate::metadata::SessionStartLimit;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Rolling count of identifies inside the quota window
///
/// Each identify is stored as the instant it leaves the window, so entries seeded from server
/// metadata can expire earlier than a full window.
#[derive(Debug)]
pub struct IdentifyMetric {
    ceiling: usize,
    window: Duration,
    expiries: Mutex<VecDeque<Instant>>,
}

impl IdentifyMetric {
    pub const DEFAULT_CEILING: usize = 1000;
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

    pub fn new(ceiling: usize, window: Duration) -> Self {
        Self {
            ceiling: ceiling.max(1),
            window,
            expiries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_ceiling(ceiling: usize) -> Self {
        Self::new(ceiling, Self::DEFAULT_WINDOW)
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn record(&self) {
        self.record_at(Instant::now());
    }

    pub fn record_at(&self, now: Instant) {
        let mut expiries = self.expiries.lock();
        prune(&mut expiries, now);
        expiries.push_back(now + self.window);
    }

    pub fn count(&self) -> usize {
        self.count_at(Instant::now())
    }

    pub fn count_at(&self, now: Instant) -> usize {
        let mut expiries = self.expiries.lock();
        prune(&mut expiries, now);
        expiries.len()
    }

    pub fn penalty(&self) -> Duration {
        self.penalty_at(Instant::now())
    }

    /// How long until the next identify fits the quota
    ///
    /// Zero while fewer than `ceiling` identifies fall inside the window; otherwise the time until
    /// the oldest one leaves it.
    pub fn penalty_at(&self, now: Instant) -> Duration {
        let mut expiries = self.expiries.lock();
        prune(&mut expiries, now);
        if expiries.len() < self.ceiling {
            return Duration::ZERO;
        }
        expiries
            .front()
            .map_or(Duration::ZERO, |oldest| oldest.saturating_duration_since(now))
    }

    pub fn seed(&self, limit: &SessionStartLimit) {
        self.seed_at(limit, Instant::now());
    }

    /// Account for identifies the server says were already used in the current window
    ///
    /// They all leave the window when the server quota resets.
    pub fn seed_at(&self, limit: &SessionStartLimit, now: Instant) {
        let used = limit.used().min(self.ceiling);
        if used == 0 {
            return;
        }

        let expiry = now + limit.resets_in().min(self.window);
        let mut expiries = self.expiries.lock();
        prune(&mut expiries, now);
        expiries.extend(std::iter::repeat(expiry).take(used));
        expiries.make_contiguous().sort_unstable();
    }
}

impl Default for IdentifyMetric {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CEILING, Self::DEFAULT_WINDOW)
    }
}

fn prune(expiries: &mut VecDeque<Instant>, now: Instant) {
    while expiries.front().is_some_and(|expiry| *expiry <= now) {
        expiries.pop_front();
    }
}
