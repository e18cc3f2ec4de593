//! Clock adapters for time operations.
//!
//! `SystemClock` reads the wall clock for production use. `ManualClock` only
//! moves when told to, for deterministic tests and simulations.

use crate::application::ports::Clock;
use crate::domain::time::{duration_millis, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// System clock implementation using `SystemTime::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        // A clock set before 1970 reads as the epoch.
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Timestamp::from_millis(duration_millis(since_epoch))
    }
}

/// Manually driven clock.
///
/// Clones share the same time, so a test can hand one clone to the
/// controller and advance another.
///
/// # Examples
///
/// ```
/// use designosaur_quota::{Clock, ManualClock, Timestamp};
/// use std::time::Duration;
///
/// let clock = ManualClock::new(Timestamp::from_secs(100));
/// let shared = clock.clone();
///
/// shared.advance(Duration::from_secs(10));
/// assert_eq!(clock.now(), Timestamp::from_secs(110));
///
/// clock.set(Timestamp::from_secs(5));
/// assert_eq!(shared.now(), Timestamp::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock reading `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(start.as_millis())),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        self.millis
            .fetch_add(duration_millis(duration), Ordering::SeqCst);
    }

    /// Set the clock to a specific time.
    pub fn set(&self, at: Timestamp) {
        self.millis.store(at.as_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock() {
        let clock = SystemClock::new();
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = clock.now();

        assert!(t2 > t1);
        // Sanity: later than 2020-01-01.
        assert!(t1 > Timestamp::from_secs(1_577_836_800));
    }

    #[test]
    fn test_manual_clock() {
        let start = Timestamp::from_secs(1_000);
        let clock = ManualClock::new(start);

        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_secs(10));
        assert_eq!(clock.now(), Timestamp::from_secs(1_010));

        clock.set(Timestamp::from_secs(5));
        assert_eq!(clock.now(), Timestamp::from_secs(5));
    }

    #[test]
    fn test_manual_clock_shared_across_threads() {
        let clock = ManualClock::new(Timestamp::EPOCH);
        let clone = clock.clone();

        std::thread::spawn(move || clone.advance(Duration::from_secs(5)))
            .join()
            .unwrap();

        assert_eq!(clock.now(), Timestamp::from_secs(5));
    }
}
