//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::application::gate::{GeneratedImage, GenerationRequest, GeneratorError};
use crate::domain::identity::ScopeKey;
use crate::domain::time::Timestamp;
use crate::domain::window::{QuotaWindow, WindowVerdict};
use std::fmt::{self, Debug};
use std::future::Future;
use std::time::Duration;

/// Port for obtaining current time.
///
/// This abstraction allows the application layer to work with time
/// without depending on system clock implementation details.
/// Infrastructure provides concrete implementations (SystemClock, ManualClock).
pub trait Clock: Send + Sync + Debug {
    /// Get the current wall-clock time.
    fn now(&self) -> Timestamp;
}

/// One window to check for one counter key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRequest {
    pub key: ScopeKey,
    pub window: QuotaWindow,
}

/// Result of an atomic multi-window check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOutcome {
    /// Whether every window admitted and the event was recorded in all of them.
    pub admitted: bool,
    /// One verdict per requested window, in request order.
    pub verdicts: Vec<WindowVerdict>,
}

/// Failure of the counter store. Every variant is handled by the
/// controller's failure mode; none reaches the caller as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store could not be reached or rejected the command
    Unavailable(String),
    /// The store did not answer within the configured timeout
    Timeout(Duration),
    /// A counter's lock was poisoned by a panic in another check
    Poisoned(String),
    /// The store circuit breaker is open and the store was not contacted
    CircuitOpen,
    /// The store answered with something that could not be decoded
    Protocol(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(reason) => write!(f, "counter store unavailable: {reason}"),
            StoreError::Timeout(after) => {
                write!(f, "counter store timed out after {}ms", after.as_millis())
            }
            StoreError::Poisoned(key) => write!(f, "counter lock poisoned for {key}"),
            StoreError::CircuitOpen => write!(f, "counter store circuit is open"),
            StoreError::Protocol(reason) => write!(f, "unexpected counter store reply: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Port for shared quota counters.
///
/// Implementations must treat one call as a single atomic step: either every
/// window admits and the event is recorded in all of them, or nothing is
/// recorded. Concurrent calls touching the same key must be linearizable.
/// Calls on disjoint keys should not serialize on each other.
///
/// Keys within one call are distinct. Infrastructure provides
/// `ShardedCounterStore` (in-process) and `RedisCounterStore` (shared).
pub trait CounterStore: Send + Sync + Debug {
    /// Check every window at `now` and record the event if all admit.
    fn check_and_record(
        &self,
        requests: &[WindowRequest],
        now: Timestamp,
    ) -> impl Future<Output = Result<StoreOutcome, StoreError>> + Send;
}

/// Port for the external image-generation provider.
///
/// Only called once a request has been admitted.
pub trait ImageGenerator: Send + Sync {
    /// Generate `request.variants()` images for the uploaded photo.
    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> impl Future<Output = Result<Vec<GeneratedImage>, GeneratorError>> + Send;
}
