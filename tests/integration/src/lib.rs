//! Integration test utilities for the gateway client
//!
//! Shards and shard managers wired to in-memory transports, so a test can play the server.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
