//! Domain layer - quota windows, policies and decisions.
//!
//! This layer contains the core concepts and invariants of admission control:
//! - Client identity derivation and counter keys
//! - Sliding and fixed quota windows
//! - Named policies combining several windows
//! - Decisions and the client-facing rejection payload
//!
//! Nothing here performs I/O or reads the clock; every function takes `now`.

pub mod decision;
pub mod identity;
pub mod policy;
pub mod time;
pub mod window;
