//! Shard connections
//!
//! A [`Shard`] drives one transport through identify, resume, heartbeating and reconnects.

pub(crate) mod heartbeat;
mod link;
mod loops;
mod session;
mod settings;
mod shard;
mod status;

pub(crate) use link::Link;
pub use session::Session;
pub use settings::ShardSettings;
pub use shard::{Shard, ShardContext};
pub use status::ShardStatus;
