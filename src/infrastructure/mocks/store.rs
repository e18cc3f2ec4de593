//! Counter store that fails or stalls on demand.

use crate::application::ports::{CounterStore, StoreError, StoreOutcome, WindowRequest};
use crate::domain::time::Timestamp;
use crate::infrastructure::memory_store::ShardedCounterStore;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Wraps a [`ShardedCounterStore`], failing the first `failures` calls with
/// a scripted error and optionally sleeping before every answer.
#[derive(Debug)]
pub struct FailingStore {
    inner: ShardedCounterStore,
    failures_left: AtomicU32,
    error: StoreError,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FailingStore {
    /// Fail every call with `error`.
    pub fn always(error: StoreError) -> Self {
        Self::failing_times(u32::MAX, error)
    }

    /// Fail the next `failures` calls with `error`, then behave normally.
    pub fn failing_times(failures: u32, error: StoreError) -> Self {
        Self {
            inner: ShardedCounterStore::new(),
            failures_left: AtomicU32::new(failures),
            error,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer correctly, but only after `delay`.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::failing_times(0, StoreError::CircuitOpen)
        }
    }

    /// Number of times the store was called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

impl CounterStore for FailingStore {
    async fn check_and_record(
        &self,
        requests: &[WindowRequest],
        now: Timestamp,
    ) -> Result<StoreOutcome, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.take_failure() {
            return Err(self.error.clone());
        }
        self.inner.check_and_record(requests, now).await
    }
}
