//! # switchboard-core
//!
//! Value objects used across the gateway client: entity identifiers and gateway intents.
//! This crate has no dependency on the network or runtime layers.

pub mod value_objects;

pub use value_objects::{Intents, Snowflake, SnowflakeParseError};
