//! Connection implementations.
//!
//! This module provides concrete implementations of the domain-level
//! `Connection` trait. Networked brokers are hidden behind feature flags
//! and exposed only through constructor functions.
//!
//! Domain code must not depend on connection-specific types.

mod memory;
mod redis;

pub use memory::MemoryBroker;

#[cfg(feature = "transport_redis")]
pub use self::redis::RedisConnection;

pub use self::redis::create_redis_connection;
