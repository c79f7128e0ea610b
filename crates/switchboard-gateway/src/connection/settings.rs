//! Per-shard tuning

use crate::protocol::{IdentifyProperties, UpdatePresencePayload};
use crate::ratelimit::{BucketConfig, RateLimiter};
use std::collections::HashSet;
use std::time::Duration;
use switchboard_core::Intents;

/// Everything a shard needs besides its id and transport
#[derive(Debug, Clone)]
pub struct ShardSettings {
    pub token: String,
    pub intents: Intents,
    pub properties: IdentifyProperties,
    /// Ask for zlib-compressed frames
    pub compress: bool,
    pub large_threshold: u8,
    /// Presence sent with identify
    pub presence: Option<UpdatePresencePayload>,
    /// Dispatch names that are tracked but not forwarded
    pub ignore_events: HashSet<String>,
    /// How often the emit loop drains one queued command
    pub emit_interval: Duration,
    /// Upper bound for `connect` to get the handshake out
    pub handshake_timeout: Duration,
    /// Consecutive undecodable frames before forcing a reconnect
    pub malformed_threshold: u32,
    /// `None` for an unbounded queue
    pub queue_capacity: Option<usize>,
    pub global_bucket: BucketConfig,
    pub command_buckets: Vec<(String, BucketConfig)>,
    /// Multiplier on backoff and jitter delays
    pub time_scale: f64,
}

impl ShardSettings {
    pub const DEFAULT_EMIT_INTERVAL: Duration = Duration::from_millis(300);
    pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(180);
    pub const DEFAULT_MALFORMED_THRESHOLD: u32 = 10;
    pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            intents: Intents::default(),
            properties: IdentifyProperties::library(),
            compress: false,
            large_threshold: 50,
            presence: None,
            ignore_events: HashSet::new(),
            emit_interval: Self::DEFAULT_EMIT_INTERVAL,
            handshake_timeout: Self::DEFAULT_HANDSHAKE_TIMEOUT,
            malformed_threshold: Self::DEFAULT_MALFORMED_THRESHOLD,
            queue_capacity: Some(Self::DEFAULT_QUEUE_CAPACITY),
            global_bucket: BucketConfig::global(),
            command_buckets: vec![("presence_update".to_string(), BucketConfig::presence())],
            time_scale: 1.0,
        }
    }

    pub fn with_intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    pub fn with_presence(mut self, presence: UpdatePresencePayload) -> Self {
        self.presence = Some(presence);
        self
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_ignore_events<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_events = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_emit_interval(mut self, interval: Duration) -> Self {
        self.emit_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_global_bucket(mut self, bucket: BucketConfig) -> Self {
        self.global_bucket = bucket;
        self
    }

    pub fn with_command_bucket(mut self, name: impl Into<String>, bucket: BucketConfig) -> Self {
        let name = name.into();
        self.command_buckets.retain(|(existing, _)| *existing != name);
        self.command_buckets.push((name, bucket));
        self
    }

    /// Scale backoff and jitter; negative or non-finite values are ignored
    pub fn with_time_scale(mut self, scale: f64) -> Self {
        if scale.is_finite() && scale >= 0.0 {
            self.time_scale = scale;
        }
        self
    }

    pub(crate) fn scaled(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.time_scale)
    }

    pub(crate) fn rate_limiter(&self) -> RateLimiter {
        self.command_buckets
            .iter()
            .fold(RateLimiter::new(self.global_bucket), |limiter, (name, bucket)| {
                limiter.with_bucket(name.clone(), *bucket)
            })
    }

    pub(crate) fn is_ignored(&self, event_name: &str) -> bool {
        self.ignore_events.contains(event_name)
    }
}
