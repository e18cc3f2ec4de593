//! Test doubles for infrastructure adapters.

pub mod layer;
pub mod store;

pub use layer::MockCaptureLayer;
pub use store::FailingStore;
