//! Quota windows and the counter state behind them.
//!
//! Two window algorithms are supported:
//!
//! - **Sliding**: an event counts while it lies inside the trailing window
//!   `(now - duration, now]`, so an event stops counting exactly `duration`
//!   after it happened. Events are kept as an ordered list of timestamps,
//!   bounded by the window limit.
//! - **Fixed**: time is cut into epoch-aligned buckets of `duration`; only
//!   events in the bucket containing `now` count. Buckets never roll back,
//!   so a clock stepping back keeps the newest bucket's count. A client can
//!   be admitted `limit` times at the very end of one bucket and `limit`
//!   times again at the start of the next. That burst across the boundary is accepted
//!   behaviour of fixed windows.

use crate::domain::policy::PolicyError;
use crate::domain::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// One minute.
pub const MINUTE: Duration = Duration::from_secs(60);

/// One day.
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Which window a counter or a denial refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Short-term burst window.
    Minute,
    /// Long-term daily window.
    Day,
}

impl Scope {
    /// Lowercase name used in keys and client-facing payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Minute => "minute",
            Scope::Day => "day",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Window algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    /// Trailing window over individual event timestamps.
    Sliding,
    /// Epoch-aligned buckets with a single counter each.
    Fixed,
}

impl WindowKind {
    /// Lowercase name, also understood by the Redis script.
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKind::Sliding => "sliding",
            WindowKind::Fixed => "fixed",
        }
    }
}

/// A single rate-limiting window: at most `limit` events per `duration`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaWindow {
    scope: Scope,
    kind: WindowKind,
    limit: u32,
    duration: Duration,
}

impl QuotaWindow {
    /// Create a window.
    ///
    /// # Errors
    /// Returns `PolicyError::ZeroLimit` if `limit` is zero, or
    /// `PolicyError::ZeroDuration` if `duration` is shorter than a millisecond.
    pub fn new(
        scope: Scope,
        kind: WindowKind,
        limit: u32,
        duration: Duration,
    ) -> Result<Self, PolicyError> {
        if limit == 0 {
            return Err(PolicyError::ZeroLimit(scope));
        }
        if duration.as_millis() == 0 {
            return Err(PolicyError::ZeroDuration(scope));
        }
        Ok(Self {
            scope,
            kind,
            limit,
            duration,
        })
    }

    /// Build a window whose limit and duration are known to be non-zero.
    pub(crate) const fn new_unchecked(
        scope: Scope,
        kind: WindowKind,
        limit: u32,
        duration: Duration,
    ) -> Self {
        Self {
            scope,
            kind,
            limit,
            duration,
        }
    }

    /// Sliding window of `limit` events per minute.
    pub fn per_minute(limit: u32) -> Result<Self, PolicyError> {
        Self::new(Scope::Minute, WindowKind::Sliding, limit, MINUTE)
    }

    /// Fixed, epoch-aligned window of `limit` events per day.
    pub fn per_day(limit: u32) -> Result<Self, PolicyError> {
        Self::new(Scope::Day, WindowKind::Fixed, limit, DAY)
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn kind(&self) -> WindowKind {
        self.kind
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Start of the fixed bucket containing `now`.
    pub fn bucket_start(&self, now: Timestamp) -> Timestamp {
        now.align_down(self.duration)
    }
}

/// Result of evaluating one window at one instant.
///
/// `count` is the number of events the window holds once the check is
/// complete: it includes the current request only if the whole request was
/// admitted and recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowVerdict {
    pub scope: Scope,
    pub limit: u32,
    pub count: u32,
    pub reset_at: Timestamp,
    /// Whether this window alone had room for the request.
    pub admitted: bool,
}

impl WindowVerdict {
    /// Events still permitted in this window.
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }

    /// The verdict after the request has been recorded against this window.
    pub(crate) fn charged(self) -> Self {
        Self {
            count: self.count.saturating_add(1),
            ..self
        }
    }
}

/// Mutable counter state of one window for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowState {
    /// Timestamps of recorded events, oldest first.
    Sliding(VecDeque<Timestamp>),
    /// Count of events in the bucket starting at `bucket_start`.
    Fixed { bucket_start: Timestamp, count: u32 },
}

impl WindowState {
    /// Empty state for a window.
    pub fn new(window: &QuotaWindow) -> Self {
        match window.kind {
            WindowKind::Sliding => WindowState::Sliding(VecDeque::new()),
            WindowKind::Fixed => WindowState::Fixed {
                bucket_start: Timestamp::EPOCH,
                count: 0,
            },
        }
    }

    /// Evaluate whether one more event fits at `now`, without recording it.
    ///
    /// Drops events that have left the window and rolls fixed buckets over,
    /// so the state stays bounded by the window limit.
    pub fn evaluate(&mut self, window: &QuotaWindow, now: Timestamp) -> WindowVerdict {
        match self {
            WindowState::Sliding(events) => {
                while events
                    .front()
                    .is_some_and(|&oldest| oldest.until(now) >= window.duration)
                {
                    events.pop_front();
                }
                let count = u32::try_from(events.len()).unwrap_or(u32::MAX);
                let oldest = events.front().copied().unwrap_or(now);
                WindowVerdict {
                    scope: window.scope,
                    limit: window.limit,
                    count,
                    reset_at: oldest + window.duration,
                    admitted: count < window.limit,
                }
            }
            WindowState::Fixed {
                bucket_start,
                count,
            } => {
                // Buckets only roll forward. A clock stepping back keeps
                // counting against the newest bucket seen.
                let current = window.bucket_start(now);
                if current > *bucket_start {
                    *bucket_start = current;
                    *count = 0;
                }
                WindowVerdict {
                    scope: window.scope,
                    limit: window.limit,
                    count: *count,
                    reset_at: *bucket_start + window.duration,
                    admitted: *count < window.limit,
                }
            }
        }
    }

    /// Record an event at `now`. Call only after [`evaluate`](Self::evaluate)
    /// at the same instant admitted it.
    pub fn record(&mut self, now: Timestamp) {
        match self {
            WindowState::Sliding(events) => events.push_back(now),
            WindowState::Fixed { count, .. } => *count = count.saturating_add(1),
        }
    }

    /// Whether the state no longer holds any event relevant at `now`.
    pub fn is_expired(&self, window: &QuotaWindow, now: Timestamp) -> bool {
        match self {
            WindowState::Sliding(events) => events
                .back()
                .map_or(true, |&newest| newest.until(now) >= window.duration),
            WindowState::Fixed {
                bucket_start,
                count,
            } => *count == 0 || now >= *bucket_start + window.duration,
        }
    }
}
