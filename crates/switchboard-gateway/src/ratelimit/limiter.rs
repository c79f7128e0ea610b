use super::bucket::{Bucket, BucketConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;
use tokio::time::Instant;

struct Buckets {
    global: Bucket,
    named: HashMap<String, Bucket>,
}

/// Global bucket plus per-command buckets, checked and recorded under one lock
pub struct RateLimiter {
    buckets: Mutex<Buckets>,
}

impl RateLimiter {
    pub fn new(global: BucketConfig) -> Self {
        Self {
            buckets: Mutex::new(Buckets {
                global: Bucket::new(global),
                named: HashMap::new(),
            }),
        }
    }

    /// Register a bucket for commands called `name`
    #[must_use]
    pub fn with_bucket(self, name: impl Into<String>, config: BucketConfig) -> Self {
        self.buckets.lock().named.insert(name.into(), Bucket::new(config));
        self
    }

    /// Ask to send one `name` command now
    pub fn request(&self, name: &str) -> bool {
        self.request_at(name, Instant::now())
    }

    pub fn request_at(&self, name: &str, now: Instant) -> bool {
        self.admit_at(name, now, || Ok::<_, Infallible>(())).is_ok()
    }

    /// Admit the command if neither the global nor its named bucket is blocked
    ///
    /// `commit` runs under the limiter lock once both buckets have room. The command is recorded
    /// in both buckets only when `commit` succeeds; a rejected command is recorded nowhere.
    pub fn admit<T, E>(
        &self,
        name: &str,
        commit: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, Rejection<E>> {
        self.admit_at(name, Instant::now(), commit)
    }

    pub fn admit_at<T, E>(
        &self,
        name: &str,
        now: Instant,
        commit: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, Rejection<E>> {
        let mut buckets = self.buckets.lock();
        let Buckets { global, named } = &mut *buckets;

        if global.is_blocked_at(now) {
            tracing::debug!(command = name, "Global command bucket is full");
            return Err(Rejection::Limited {
                retry_after: global.retry_after_at(now),
            });
        }

        let mut bucket = named.get_mut(name);
        if let Some(b) = bucket.as_ref().filter(|b| b.is_blocked_at(now)) {
            tracing::debug!(command = name, "Command bucket is full");
            return Err(Rejection::Limited {
                retry_after: b.retry_after_at(now),
            });
        }

        let value = commit().map_err(Rejection::Refused)?;
        global.insert_at(now);
        if let Some(bucket) = bucket.as_mut() {
            bucket.insert_at(now);
        }
        Ok(value)
    }
}

/// Why [`RateLimiter::admit`] turned a command away
#[derive(Debug, PartialEq, Eq)]
pub enum Rejection<E> {
    /// A bucket is full; it opens again after `retry_after`
    Limited { retry_after: Duration },
    /// The buckets had room but the commit step failed
    Refused(E),
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(BucketConfig::global()).with_bucket("presence_update", BucketConfig::presence())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_exactly_capacity() {
        let limiter = RateLimiter::new(BucketConfig::new(120, Duration::from_secs(60)))
            .with_bucket("presence_update", BucketConfig::new(5, Duration::from_secs(60)));
        let now = Instant::now();

        let accepted = (0..20)
            .filter(|i| limiter.request_at("presence_update", now + Duration::from_millis(*i)))
            .count();
        assert_eq!(accepted, 5);
    }

    #[test]
    fn test_global_bucket_covers_every_command() {
        let limiter = RateLimiter::new(BucketConfig::new(3, Duration::from_secs(60)));
        let now = Instant::now();

        assert!(limiter.request_at("request_guild_members", now));
        assert!(limiter.request_at("voice_state_update", now));
        assert!(limiter.request_at("anything", now));
        assert!(!limiter.request_at("request_guild_members", now));

        assert!(limiter.request_at("anything", now + Duration::from_secs(61)));
    }

    #[test]
    fn test_named_rejection_does_not_consume_global() {
        let limiter = RateLimiter::new(BucketConfig::new(2, Duration::from_secs(60)))
            .with_bucket("presence_update", BucketConfig::new(1, Duration::from_secs(60)));
        let now = Instant::now();

        assert!(limiter.request_at("presence_update", now));
        assert!(!limiter.request_at("presence_update", now));
        assert!(!limiter.request_at("presence_update", now));
        // One global slot is still free
        assert!(limiter.request_at("voice_state_update", now));
        assert!(!limiter.request_at("voice_state_update", now));
    }

    #[test]
    fn test_default_limits() {
        let limiter = RateLimiter::default();
        let now = Instant::now();
        let presence = (0..10).filter(|_| limiter.request_at("presence_update", now)).count();
        assert_eq!(presence, 5);
    }

    #[test]
    fn test_refused_commit_records_nothing() {
        let limiter = RateLimiter::new(BucketConfig::new(1, Duration::from_secs(60)));
        let now = Instant::now();

        let refused = limiter.admit_at("voice_state_update", now, || Err::<(), _>("queue full"));
        assert_eq!(refused, Err(Rejection::Refused("queue full")));

        assert_eq!(limiter.admit_at("voice_state_update", now, || Ok::<_, ()>(7)), Ok(7));
        let limited = limiter.admit_at("voice_state_update", now + Duration::from_secs(20), || {
            Ok::<_, ()>(8)
        });
        match limited {
            Err(Rejection::Limited { retry_after }) => {
                assert!(retry_after > Duration::from_secs(39) && retry_after <= Duration::from_secs(41));
            }
            other => panic!("expected a rate limit, got {other:?}"),
        }
    }
}
