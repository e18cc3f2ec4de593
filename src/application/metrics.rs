//! Observability metrics for admission control.
//!
//! Counters are plain atomics shared behind an `Arc`, so a handle can be
//! cloned into a metrics exporter and read at any time.

use crate::domain::window::Scope;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics tracking admission statistics.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Requests admitted by the quota
    admitted: AtomicU64,
    /// Requests denied by the minute window
    denied_minute: AtomicU64,
    /// Requests denied by the day window
    denied_day: AtomicU64,
    /// Counter store failures, including timeouts and open-circuit skips
    store_faults: AtomicU64,
    /// Requests admitted by the failure mode while the store was down
    fallback_admitted: AtomicU64,
    /// Requests denied by the failure mode while the store was down
    fallback_denied: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    pub(crate) fn record_admitted(&self) {
        self.inner.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_denied(&self, scope: Scope) {
        self.counter_for(scope).fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_fault(&self) {
        self.inner.store_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fallback(&self, admitted: bool) {
        let counter = if admitted {
            &self.inner.fallback_admitted
        } else {
            &self.inner.fallback_denied
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn counter_for(&self, scope: Scope) -> &AtomicU64 {
        match scope {
            Scope::Minute => &self.inner.denied_minute,
            Scope::Day => &self.inner.denied_day,
        }
    }

    /// Requests admitted by the quota.
    pub fn admitted(&self) -> u64 {
        self.inner.admitted.load(Ordering::Relaxed)
    }

    /// Requests denied by any window.
    pub fn denied(&self) -> u64 {
        self.denied_by(Scope::Minute)
            .saturating_add(self.denied_by(Scope::Day))
    }

    /// Requests denied with `scope` as the reported window.
    pub fn denied_by(&self, scope: Scope) -> u64 {
        self.counter_for(scope).load(Ordering::Relaxed)
    }

    /// Counter store failures.
    pub fn store_faults(&self) -> u64 {
        self.inner.store_faults.load(Ordering::Relaxed)
    }

    /// Requests the failure mode let through.
    pub fn fallback_admitted(&self) -> u64 {
        self.inner.fallback_admitted.load(Ordering::Relaxed)
    }

    /// Requests the failure mode turned away.
    pub fn fallback_denied(&self) -> u64 {
        self.inner.fallback_denied.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            admitted: self.admitted(),
            denied_minute: self.denied_by(Scope::Minute),
            denied_day: self.denied_by(Scope::Day),
            store_faults: self.store_faults(),
            fallback_admitted: self.fallback_admitted(),
            fallback_denied: self.fallback_denied(),
        }
    }

    /// Reset all metrics to zero.
    pub fn reset(&self) {
        for counter in [
            &self.inner.admitted,
            &self.inner.denied_minute,
            &self.inner.denied_day,
            &self.inner.store_faults,
            &self.inner.fallback_admitted,
            &self.inner.fallback_denied,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub admitted: u64,
    pub denied_minute: u64,
    pub denied_day: u64,
    pub store_faults: u64,
    pub fallback_admitted: u64,
    pub fallback_denied: u64,
}

impl MetricsSnapshot {
    /// Requests denied by the quota, across scopes.
    pub fn denied(&self) -> u64 {
        self.denied_minute.saturating_add(self.denied_day)
    }

    /// Requests decided, by the quota or by the failure mode.
    pub fn total(&self) -> u64 {
        self.admitted
            .saturating_add(self.denied())
            .saturating_add(self.fallback_admitted)
            .saturating_add(self.fallback_denied)
    }

    /// Share of quota-decided requests that were denied (0.0 to 1.0).
    ///
    /// Fallback decisions are excluded. Returns 0.0 if nothing was decided.
    pub fn denial_rate(&self) -> f64 {
        let decided = self.admitted.saturating_add(self.denied());
        if decided == 0 {
            0.0
        } else {
            self.denied() as f64 / decided as f64
        }
    }
}
