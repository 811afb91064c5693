//! Broker-backed job channels.
//!
//! The channel contract and the in-memory implementation live in
//! `jobrelay-channel`. This module provides infrastructure-backed
//! implementations.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsChannel, RedisStreamsConfig};
