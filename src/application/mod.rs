//! Application layer - orchestration of domain logic.
//!
//! - Admission controller (policy lookup, store call, failure mode)
//! - Store circuit breaker
//! - Generation gate in front of the image generator
//! - Metrics
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement: the clock, the counter store and the image
//! generator.

pub mod circuit_breaker;
pub mod controller;
pub mod gate;
pub mod metrics;
pub mod ports;
