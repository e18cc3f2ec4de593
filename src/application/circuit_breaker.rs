//! Circuit breaker around the counter store.
//!
//! After repeated store failures the circuit opens and checks stop contacting
//! the store, applying the controller's failure mode straight away instead of
//! waiting out a timeout on every request. After the recovery timeout one
//! probe is let through; its outcome closes or re-opens the circuit.
//!
//! Time is read from the controller's clock and passed in, so recovery can be
//! tested without sleeping.

use crate::domain::time::Timestamp;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Store calls proceed normally
    Closed = 0,
    /// Store is considered down; calls are short-circuited
    Open = 1,
    /// One probe call is testing whether the store recovered
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Duration to wait before attempting recovery
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker protecting the counter store.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    last_failure_millis: AtomicU64,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default configuration.
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a new circuit breaker with custom configuration.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU64::new(0),
            last_failure_millis: AtomicU64::new(0),
            config,
        }
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// The configuration in use.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check whether the store may be called at `now`.
    pub fn allow_request(&self, now: Timestamp) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if self.last_failure().until(now) < self.config.recovery_timeout {
                    return false;
                }
                // Only one caller wins the transition and becomes the probe.
                let won = self
                    .state
                    .compare_exchange(
                        CircuitState::Open as u8,
                        CircuitState::HalfOpen as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok();
                if won {
                    self.last_failure_millis
                        .store(now.as_millis(), Ordering::Release);
                }
                won
            }
            CircuitState::HalfOpen => self.claim_stale_probe(now),
        }
    }

    /// A probe that never reported back (its caller was cancelled) is
    /// replaced once a full recovery timeout has passed since it started.
    fn claim_stale_probe(&self, now: Timestamp) -> bool {
        let started = self.last_failure_millis.load(Ordering::Acquire);
        if Timestamp::from_millis(started).until(now) < self.config.recovery_timeout {
            return false;
        }
        self.last_failure_millis
            .compare_exchange(started, now.as_millis(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record a successful store call.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        let _ = self.state.compare_exchange(
            CircuitState::HalfOpen as u8,
            CircuitState::Closed as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Record a failed store call at `now`.
    ///
    /// Returns `true` if this failure opened the circuit.
    pub fn record_failure(&self, now: Timestamp) -> bool {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        self.last_failure_millis
            .store(now.as_millis(), Ordering::Release);

        match self.state() {
            CircuitState::HalfOpen => {
                self.state
                    .store(CircuitState::Open as u8, Ordering::Release);
                true
            }
            CircuitState::Closed if failures >= u64::from(self.config.failure_threshold) => self
                .state
                .compare_exchange(
                    CircuitState::Closed as u8,
                    CircuitState::Open as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok(),
            CircuitState::Closed | CircuitState::Open => false,
        }
    }

    /// When the circuit will next let a probe through, if it is open.
    pub fn retry_at(&self) -> Option<Timestamp> {
        match self.state() {
            CircuitState::Open => Some(self.last_failure() + self.config.recovery_timeout),
            CircuitState::Closed | CircuitState::HalfOpen => None,
        }
    }

    fn last_failure(&self) -> Timestamp {
        Timestamp::from_millis(self.last_failure_millis.load(Ordering::Acquire))
    }

    /// Get the number of consecutive failures.
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn at(secs: u64) -> Timestamp {
        Timestamp::from_secs(secs)
    }

    fn breaker(threshold: u32, recovery_secs: u64) -> CircuitBreaker {
        CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_secs(recovery_secs),
        })
    }

    #[test]
    fn test_initial_state() {
        let cb = CircuitBreaker::new();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
        assert!(cb.allow_request(at(0)));
        assert_eq!(cb.retry_at(), None);
    }

    #[test]
    fn test_failure_threshold() {
        let cb = breaker(3, 10);

        assert!(!cb.record_failure(at(1)));
        assert!(!cb.record_failure(at(1)));
        assert_eq!(cb.state(), CircuitState::Closed);

        assert!(cb.record_failure(at(1)));
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.consecutive_failures(), 3);
        assert!(!cb.allow_request(at(2)));
        assert_eq!(cb.retry_at(), Some(at(11)));
    }

    #[test]
    fn test_half_open_admits_single_probe() {
        let cb = breaker(1, 10);
        cb.record_failure(at(100));

        assert!(!cb.allow_request(at(109)));
        assert!(cb.allow_request(at(110)));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // Second caller while the probe is in flight is short-circuited.
        assert!(!cb.allow_request(at(110)));
        assert!(!cb.allow_request(at(119)));
    }

    #[test]
    fn test_abandoned_probe_is_replaced() {
        let cb = breaker(1, 10);
        cb.record_failure(at(0));
        assert!(cb.allow_request(at(10)));

        // The probe never reports back.
        assert!(!cb.allow_request(at(15)));
        assert!(cb.allow_request(at(20)));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_probe_success_closes_circuit() {
        let cb = breaker(2, 10);
        cb.record_failure(at(0));
        cb.record_failure(at(0));
        assert!(cb.allow_request(at(10)));

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
        assert!(cb.allow_request(at(10)));
    }

    #[test]
    fn test_probe_failure_reopens_circuit() {
        let cb = breaker(2, 10);
        cb.record_failure(at(0));
        cb.record_failure(at(0));
        assert!(cb.allow_request(at(10)));

        assert!(cb.record_failure(at(10)));
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request(at(15)));
        assert!(cb.allow_request(at(20)));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new();
        cb.record_failure(at(0));
        cb.record_failure(at(0));
        assert_eq!(cb.consecutive_failures(), 2);

        cb.record_success();
        assert_eq!(cb.consecutive_failures(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_reset() {
        let cb = breaker(1, 60);
        cb.record_failure(at(0));
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request(at(1)));
    }

    #[test]
    fn test_concurrent_failures_open_once() {
        let cb = Arc::new(breaker(5, 30));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let cb = Arc::clone(&cb);
                thread::spawn(move || cb.record_failure(at(1)))
            })
            .collect();

        let openings = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|opened| *opened)
            .count();

        assert_eq!(openings, 1);
        assert_eq!(cb.consecutive_failures(), 10);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_concurrent_probe_race_has_one_winner() {
        let cb = Arc::new(breaker(1, 10));
        cb.record_failure(at(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let cb = Arc::clone(&cb);
                thread::spawn(move || cb.allow_request(at(10)))
            })
            .collect();

        let probes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(probes, 1);
    }
}
