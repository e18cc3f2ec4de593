//! In-process counter store.
//!
//! Counters live in a sharded `DashMap`, one `Arc<Mutex<_>>` slot per
//! [`ScopeKey`]. A check holds a shard lock only long enough to clone the
//! slot handle; the read-modify-write itself runs under the per-key mutexes,
//! taken in request order. Different clients, and the minute and day counters
//! of one client, never share a mutex.
//!
//! Expired slots are swept every `sweep_interval` checks and on demand via
//! [`ShardedCounterStore::purge_expired`]. Inside a tokio runtime the
//! periodic sweep runs on the blocking pool, so the check that triggers it
//! does not pay for a pass over every shard; outside one it runs inline. At
//! most one periodic sweep is in flight. A swept slot is marked retired
//! before it leaves the map, and a check that locks a retired slot starts
//! over with a fresh one, so no increment is ever lost to a concurrent sweep.

use crate::application::ports::{CounterStore, StoreError, StoreOutcome, WindowRequest};
use crate::domain::identity::ScopeKey;
use crate::domain::time::Timestamp;
use crate::domain::window::{QuotaWindow, WindowState, WindowVerdict};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

/// Default number of checks between expiry sweeps.
///
/// A sweep visits every counter and write-locks each shard in turn.
pub const DEFAULT_SWEEP_INTERVAL: u64 = 1024;

/// A check that keeps hitting retired slots gives up after this many rounds.
const MAX_ATTEMPTS: usize = 8;

#[derive(Debug)]
struct Slot {
    window: QuotaWindow,
    state: WindowState,
    retired: bool,
}

impl Slot {
    fn new(window: &QuotaWindow) -> Self {
        Self {
            window: window.clone(),
            state: WindowState::new(window),
            retired: false,
        }
    }

    /// Reset the state if the key is now used with a different window.
    fn align(&mut self, window: &QuotaWindow) {
        if self.window != *window {
            self.window = window.clone();
            self.state = WindowState::new(window);
        }
    }
}

type SlotHandle = Arc<Mutex<Slot>>;
type SlotMap = DashMap<ScopeKey, SlotHandle, ahash::RandomState>;

/// Thread-safe sharded counter store backed by DashMap.
///
/// Suitable for a single process. Use `RedisCounterStore` when several
/// instances must share one quota.
#[derive(Debug)]
pub struct ShardedCounterStore {
    slots: Arc<SlotMap>,
    checks: AtomicU64,
    sweep_interval: u64,
    sweeping: Arc<AtomicBool>,
}

impl ShardedCounterStore {
    /// Create an empty store with the default sweep interval.
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    /// Create an empty store that sweeps expired counters every
    /// `sweep_interval` checks. Zero disables automatic sweeping.
    pub fn with_sweep_interval(sweep_interval: u64) -> Self {
        Self {
            slots: Arc::new(DashMap::with_hasher(ahash::RandomState::new())),
            checks: AtomicU64::new(0),
            sweep_interval,
            sweeping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of live counters.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no counter is tracked.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every counter.
    pub fn clear(&self) {
        self.slots.retain(|_, slot| {
            if let Ok(mut guard) = slot.lock() {
                guard.retired = true;
            }
            false
        });
    }

    /// Copy of the counter state for `key`, if tracked.
    pub fn state(&self, key: &ScopeKey) -> Option<WindowState> {
        let slot = self.slots.get(key).map(|entry| Arc::clone(entry.value()))?;
        let guard = slot.lock().ok()?;
        Some(guard.state.clone())
    }

    /// Remove counters holding no event relevant at `now`.
    ///
    /// Slots currently locked by a check are skipped. Returns the number of
    /// counters removed.
    pub fn purge_expired(&self, now: Timestamp) -> usize {
        purge_slots(&self.slots, now)
    }

    fn slot(&self, request: &WindowRequest) -> SlotHandle {
        if let Some(existing) = self.slots.get(&request.key) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .slots
            .entry(request.key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Slot::new(&request.window))));
        Arc::clone(entry.value())
    }

    /// Forget a poisoned slot so the next check on that key starts fresh.
    fn evict_poisoned(&self, key: &ScopeKey, slot: &SlotHandle) {
        self.slots
            .remove_if(key, |_, current| Arc::ptr_eq(current, slot));
    }

    fn lock_all<'a>(
        &self,
        requests: &[WindowRequest],
        slots: &'a [SlotHandle],
    ) -> Result<Vec<MutexGuard<'a, Slot>>, StoreError> {
        let mut guards = Vec::with_capacity(slots.len());
        for (request, slot) in requests.iter().zip(slots) {
            match slot.lock() {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    drop(guards);
                    self.evict_poisoned(&request.key, slot);
                    return Err(StoreError::Poisoned(request.key.to_string()));
                }
            }
        }
        Ok(guards)
    }

    fn admit(
        &self,
        requests: &[WindowRequest],
        now: Timestamp,
    ) -> Result<StoreOutcome, StoreError> {
        for _ in 0..MAX_ATTEMPTS {
            let slots: Vec<SlotHandle> = requests.iter().map(|r| self.slot(r)).collect();
            let mut guards = self.lock_all(requests, &slots)?;

            if guards.iter().any(|guard| guard.retired) {
                continue;
            }

            let verdicts: Vec<WindowVerdict> = guards
                .iter_mut()
                .zip(requests)
                .map(|(guard, request)| {
                    guard.align(&request.window);
                    guard.state.evaluate(&request.window, now)
                })
                .collect();

            let admitted = verdicts.iter().all(|v| v.admitted);
            let verdicts = if admitted {
                for guard in guards.iter_mut() {
                    guard.state.record(now);
                }
                verdicts.into_iter().map(WindowVerdict::charged).collect()
            } else {
                verdicts
            };
            drop(guards);

            self.after_check(now);
            return Ok(StoreOutcome { admitted, verdicts });
        }

        Err(StoreError::Unavailable(
            "counter slots kept being retired during the check".to_string(),
        ))
    }

    fn after_check(&self, now: Timestamp) {
        if self.sweep_interval == 0 {
            return;
        }
        let checks = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if checks % self.sweep_interval != 0 || self.sweeping.swap(true, Ordering::AcqRel) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let slots = Arc::clone(&self.slots);
                let sweeping = Arc::clone(&self.sweeping);
                handle.spawn_blocking(move || {
                    purge_slots(&slots, now);
                    sweeping.store(false, Ordering::Release);
                });
            }
            Err(_) => {
                purge_slots(&self.slots, now);
                self.sweeping.store(false, Ordering::Release);
            }
        }
    }

    /// Whether a periodic sweep is still running.
    pub fn is_sweeping(&self) -> bool {
        self.sweeping.load(Ordering::Acquire)
    }
}

fn purge_slots(slots: &SlotMap, now: Timestamp) -> usize {
    let mut removed = 0;
    slots.retain(|_, slot| match slot.try_lock() {
        Ok(mut guard) => {
            if guard.state.is_expired(&guard.window, now) {
                guard.retired = true;
                removed += 1;
                false
            } else {
                true
            }
        }
        Err(TryLockError::WouldBlock) => true,
        Err(TryLockError::Poisoned(_)) => {
            removed += 1;
            false
        }
    });
    if removed > 0 {
        tracing::debug!(removed, remaining = slots.len(), "purged expired counters");
    }
    removed
}

impl Default for ShardedCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterStore for ShardedCounterStore {
    async fn check_and_record(
        &self,
        requests: &[WindowRequest],
        now: Timestamp,
    ) -> Result<StoreOutcome, StoreError> {
        self.admit(requests, now)
    }
}
