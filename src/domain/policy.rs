//! Named admission policies.
//!
//! A policy is an ordered list of windows that must all admit a request.
//! Order matters: when several windows are exhausted at once, the first one
//! in the list is reported as the reason for the denial.

use crate::domain::window::{QuotaWindow, Scope, WindowKind, DAY, MINUTE};
use std::fmt;
use std::sync::Arc;

/// Name of the policy guarding image generation.
pub const GENERATE_POLICY: &str = "generate";

/// Requests per minute allowed by the default policy.
pub const DEFAULT_PER_MINUTE: u32 = 3;

/// Requests per day allowed by the default policy.
pub const DEFAULT_PER_DAY: u32 = 20;

/// Error returned when a window or policy definition is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Window limit must be greater than zero
    ZeroLimit(Scope),
    /// Window duration must be at least one millisecond
    ZeroDuration(Scope),
    /// Policy name must not be blank
    EmptyName,
    /// Policy must contain at least one window
    NoWindows,
    /// Each scope may appear only once per policy
    DuplicateScope(Scope),
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::ZeroLimit(scope) => {
                write!(f, "{scope} window limit must be greater than 0")
            }
            PolicyError::ZeroDuration(scope) => {
                write!(f, "{scope} window duration must be at least 1ms")
            }
            PolicyError::EmptyName => write!(f, "policy name must not be blank"),
            PolicyError::NoWindows => write!(f, "policy must define at least one window"),
            PolicyError::DuplicateScope(scope) => {
                write!(f, "{scope} window defined more than once")
            }
        }
    }
}

impl std::error::Error for PolicyError {}

/// A named set of windows evaluated together for every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaPolicy {
    name: Arc<str>,
    windows: Vec<QuotaWindow>,
}

impl QuotaPolicy {
    /// Create a policy. Windows are evaluated in the given order.
    ///
    /// # Errors
    /// Returns `PolicyError` if the name is blank, no windows are given, or a
    /// scope is repeated.
    pub fn new(name: &str, windows: Vec<QuotaWindow>) -> Result<Self, PolicyError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PolicyError::EmptyName);
        }
        if windows.is_empty() {
            return Err(PolicyError::NoWindows);
        }
        for (i, window) in windows.iter().enumerate() {
            if windows[..i].iter().any(|w| w.scope() == window.scope()) {
                return Err(PolicyError::DuplicateScope(window.scope()));
            }
        }
        Ok(Self {
            name: Arc::from(name),
            windows,
        })
    }

    /// The `generate` policy with custom limits: a sliding per-minute window
    /// checked before a fixed per-day window.
    pub fn per_minute_and_day(per_minute: u32, per_day: u32) -> Result<Self, PolicyError> {
        Self::new(
            GENERATE_POLICY,
            vec![
                QuotaWindow::per_minute(per_minute)?,
                QuotaWindow::per_day(per_day)?,
            ],
        )
    }

    /// The default `generate` policy: 3 requests per minute, 20 per day.
    pub fn generate() -> Self {
        Self {
            name: Arc::from(GENERATE_POLICY),
            windows: vec![
                QuotaWindow::new_unchecked(
                    Scope::Minute,
                    WindowKind::Sliding,
                    DEFAULT_PER_MINUTE,
                    MINUTE,
                ),
                QuotaWindow::new_unchecked(Scope::Day, WindowKind::Fixed, DEFAULT_PER_DAY, DAY),
            ],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle to the name, for building counter keys without copying.
    pub fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Windows in evaluation order.
    pub fn windows(&self) -> &[QuotaWindow] {
        &self.windows
    }

    /// The window for `scope`, if the policy has one.
    pub fn window(&self, scope: Scope) -> Option<&QuotaWindow> {
        self.windows.iter().find(|w| w.scope() == scope)
    }
}
