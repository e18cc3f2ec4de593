//! Infrastructure layer - external adapters.
//!
//! - Clock abstraction (system time vs manual)
//! - In-process sharded counter store
//! - Redis counter store (feature `redis-storage`)

pub mod clock;
pub mod memory_store;

#[cfg(feature = "redis-storage")]
pub mod redis_store;

#[cfg(test)]
pub(crate) mod mocks;
