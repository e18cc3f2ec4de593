//! Admission decisions and the client-facing rejection payload.

use crate::domain::time::Timestamp;
use crate::domain::window::{Scope, WindowVerdict};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Message shown when the per-minute burst window is exhausted.
pub const MINUTE_MESSAGE: &str = "Too many dinos 🦖💨 Please try again in a minute.";

/// Message shown when the daily window is exhausted.
pub const DAY_MESSAGE: &str = "Daily dino limit reached 🦕 Come back tomorrow!";

/// Message shown when the counter store is down and the controller fails closed.
pub const UNAVAILABLE_MESSAGE: &str =
    "Dino generation is taking a short break. Please try again shortly.";

/// Quota status of one window after a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowStatus {
    pub scope: Scope,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: Timestamp,
}

impl From<WindowVerdict> for WindowStatus {
    fn from(verdict: WindowVerdict) -> Self {
        Self {
            scope: verdict.scope,
            limit: verdict.limit,
            remaining: verdict.remaining(),
            reset_at: verdict.reset_at,
        }
    }
}

/// Outcome of an admission check.
///
/// `limit`, `remaining` and `reset_at` describe the window that matters
/// most for this request: the violated window on denial, or the window with
/// the least headroom on admission. Every window is listed in `windows`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub admitted: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: Timestamp,
    /// First exhausted window in policy order, if the quota denied the request.
    pub violated_scope: Option<Scope>,
    /// True when the counter store failed and the failure mode decided.
    pub degraded: bool,
    pub windows: Vec<WindowStatus>,
}

impl Decision {
    /// Build a decision from per-window verdicts returned by a store.
    ///
    /// `verdicts` must be non-empty and in policy order.
    pub(crate) fn from_verdicts(verdicts: &[WindowVerdict], admitted: bool) -> Self {
        let violated = if admitted {
            None
        } else {
            verdicts.iter().find(|v| !v.admitted)
        };

        let headline = violated
            .or_else(|| verdicts.iter().min_by_key(|v| v.remaining()))
            .copied()
            .map(WindowStatus::from);

        let windows: Vec<WindowStatus> = verdicts.iter().copied().map(WindowStatus::from).collect();

        match headline {
            Some(status) => Self {
                admitted,
                limit: status.limit,
                remaining: if admitted { status.remaining } else { 0 },
                reset_at: status.reset_at,
                violated_scope: violated.map(|v| v.scope),
                degraded: false,
                windows,
            },
            None => Self {
                admitted,
                limit: 0,
                remaining: 0,
                reset_at: Timestamp::EPOCH,
                violated_scope: None,
                degraded: false,
                windows,
            },
        }
    }

    /// Decision produced by the failure mode when the store could not answer.
    ///
    /// Nothing is known about the counters, so the headline reports the
    /// tightest window's limit and asks the client to retry after `retry_after`.
    pub(crate) fn degraded(
        admitted: bool,
        limit: u32,
        now: Timestamp,
        retry_after: Duration,
    ) -> Self {
        Self {
            admitted,
            limit,
            remaining: 0,
            reset_at: now + retry_after,
            violated_scope: None,
            degraded: true,
            windows: Vec::new(),
        }
    }

    /// Status of one window, if the store reported it.
    pub fn window(&self, scope: Scope) -> Option<&WindowStatus> {
        self.windows.iter().find(|w| w.scope == scope)
    }

    /// Time the client should wait before retrying, measured from `now`.
    pub fn retry_after(&self, now: Timestamp) -> Duration {
        now.until(self.reset_at)
    }

    /// Client-facing rejection body, or `None` if the request was admitted.
    pub fn rejection(&self) -> Option<Rejection> {
        if self.admitted {
            return None;
        }
        let error = match self.violated_scope {
            Some(Scope::Minute) => MINUTE_MESSAGE,
            Some(Scope::Day) => DAY_MESSAGE,
            None => UNAVAILABLE_MESSAGE,
        };
        Some(Rejection {
            error: error.to_string(),
            scope: self.violated_scope,
            limit: self.limit,
            remaining: self.remaining,
            reset: self.reset_at.as_secs_ceil(),
        })
    }
}

/// JSON body returned to the client when a request is refused.
///
/// The UI relies on exactly these fields to tell "slow down" apart from
/// "daily cap reached" and to avoid retrying immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Human-readable message, distinct per scope.
    pub error: String,
    /// Exhausted window, or `null` when the limiter itself was unavailable.
    pub scope: Option<Scope>,
    pub limit: u32,
    pub remaining: u32,
    /// Unix time in seconds when the window frees up.
    pub reset: u64,
}

impl Rejection {
    /// HTTP status for this rejection: 429 for quota denials, 503 when the
    /// limiter failed closed.
    pub fn status_code(&self) -> u16 {
        match self.scope {
            Some(_) => 429,
            None => 503,
        }
    }

    /// Seconds until `reset`, for a `Retry-After` header. Never zero.
    pub fn retry_after_secs(&self, now: Timestamp) -> u64 {
        self.reset.saturating_sub(now.as_millis() / 1000).max(1)
    }

    /// Serialise to the JSON payload.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
