use std::time::Duration;
use tokio::time::Instant;

/// Capacity and window of a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    pub capacity: usize,
    pub window: Duration,
}

impl BucketConfig {
    pub const fn new(capacity: usize, window: Duration) -> Self {
        Self { capacity, window }
    }

    /// 120 commands per minute, the limit the service applies to every connection
    pub const fn global() -> Self {
        Self::new(120, Duration::from_secs(60))
    }

    /// 5 presence updates per minute
    pub const fn presence() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

/// Ring buffer of the last `capacity` admission times
///
/// A bucket is blocked while its oldest retained entry is still inside the window.
#[derive(Debug, Clone)]
pub struct Bucket {
    entries: Vec<Option<Instant>>,
    window: Duration,
}

impl Bucket {
    pub fn new(config: BucketConfig) -> Self {
        Self {
            entries: vec![None; config.capacity.max(1)],
            window: config.window,
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn is_blocked_at(&self, now: Instant) -> bool {
        self.entries[0].is_some_and(|oldest| now.saturating_duration_since(oldest) <= self.window)
    }

    /// Drop the oldest entry and append `now`
    pub fn insert_at(&mut self, now: Instant) {
        self.entries.rotate_left(1);
        if let Some(last) = self.entries.last_mut() {
            *last = Some(now);
        }
    }

    /// Time until the bucket unblocks, zero when it is open
    pub fn retry_after_at(&self, now: Instant) -> Duration {
        match self.entries[0] {
            Some(oldest) if self.is_blocked_at(now) => {
                (oldest + self.window).saturating_duration_since(now) + Duration::from_millis(1)
            }
            _ => Duration::ZERO,
        }
    }
}
