//! Command rate limiting
//!
//! Fixed-window admission control for outgoing commands: one global bucket every command draws
//! from, plus optional buckets per command name.

mod bucket;
mod limiter;

pub use bucket::{Bucket, BucketConfig};
pub use limiter::{RateLimiter, Rejection};
