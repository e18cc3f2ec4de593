//! Admission controller.
//!
//! Every check reads the clock once, asks the counter store to check and
//! record all windows of the named policy in one atomic step, and turns the
//! verdicts into a [`Decision`]. Store faults never reach the caller: they
//! are resolved by the configured [`FailureMode`] and reported through
//! logging and [`Metrics`].

use crate::application::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, CounterStore, StoreError, StoreOutcome, WindowRequest};
use crate::domain::decision::Decision;
use crate::domain::identity::{ClientIdentity, ScopeKey};
use crate::domain::policy::{PolicyError, QuotaPolicy, DEFAULT_PER_DAY, DEFAULT_PER_MINUTE};
use crate::domain::time::Timestamp;
use crate::infrastructure::clock::SystemClock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default upper bound on a single counter store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// Retry hint for degraded decisions when the circuit gives no better one.
const DEGRADED_RETRY_AFTER: Duration = Duration::from_secs(5);

/// What to do when the counter store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Deny the request. Protects the downstream API at the cost of
    /// availability.
    #[default]
    FailClosed,
    /// Admit the request without recording it.
    FailOpen,
}

impl FailureMode {
    fn admits(self) -> bool {
        matches!(self, FailureMode::FailOpen)
    }
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureMode::FailClosed => f.write_str("fail_closed"),
            FailureMode::FailOpen => f.write_str("fail_open"),
        }
    }
}

/// Declarative configuration of the `generate` policy and fault handling.
///
/// Missing fields take their defaults, so an empty document yields
/// 3 per minute, 20 per day, fail-closed and a 250ms store timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub per_minute: u32,
    pub per_day: u32,
    pub failure_mode: FailureMode,
    pub store_timeout_ms: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            per_minute: DEFAULT_PER_MINUTE,
            per_day: DEFAULT_PER_DAY,
            failure_mode: FailureMode::default(),
            store_timeout_ms: 250,
        }
    }
}

impl QuotaConfig {
    /// The `generate` policy described by this configuration.
    pub fn policy(&self) -> Result<QuotaPolicy, PolicyError> {
        QuotaPolicy::per_minute_and_day(self.per_minute, self.per_day)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Error returned by [`AdmissionController::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// No policy with this name was registered
    UnknownPolicy(String),
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionError::UnknownPolicy(name) => write!(f, "unknown quota policy `{name}`"),
        }
    }
}

impl std::error::Error for AdmissionError {}

/// Error returned when building an [`AdmissionController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// A policy or configured limit is invalid
    Policy(PolicyError),
    /// Two policies share a name
    DuplicatePolicy(String),
    /// Store timeout must be greater than zero
    ZeroStoreTimeout,
    /// Circuit breaker threshold must be greater than zero
    ZeroFailureThreshold,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::Policy(e) => write!(f, "invalid policy: {e}"),
            BuildError::DuplicatePolicy(name) => {
                write!(f, "policy `{name}` registered more than once")
            }
            BuildError::ZeroStoreTimeout => write!(f, "store timeout must be greater than 0"),
            BuildError::ZeroFailureThreshold => {
                write!(f, "circuit breaker failure threshold must be greater than 0")
            }
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BuildError::Policy(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PolicyError> for BuildError {
    fn from(e: PolicyError) -> Self {
        BuildError::Policy(e)
    }
}

/// Builder for configuring an [`AdmissionController`].
pub struct AdmissionControllerBuilder<S> {
    store: S,
    policies: Vec<QuotaPolicy>,
    config: Option<QuotaConfig>,
    failure_mode: FailureMode,
    store_timeout: Duration,
    clock: Option<Arc<dyn Clock>>,
    breaker: CircuitBreakerConfig,
    metrics: Option<Metrics>,
}

impl<S: CounterStore> AdmissionControllerBuilder<S> {
    /// Register a policy. Without any policy, the default `generate` policy
    /// is used.
    pub fn with_policy(mut self, policy: QuotaPolicy) -> Self {
        self.policies.push(policy);
        self
    }

    /// Apply a declarative configuration: its `generate` policy, failure
    /// mode and store timeout.
    pub fn with_config(mut self, config: QuotaConfig) -> Self {
        self.failure_mode = config.failure_mode;
        self.store_timeout = config.store_timeout();
        self.config = Some(config);
        self
    }

    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Upper bound on a single store call. Default: 250ms.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Set a custom clock. Default: [`SystemClock`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    /// Report into an existing metrics handle instead of a fresh one.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the controller.
    ///
    /// # Errors
    /// Returns `BuildError` if a policy is invalid or duplicated, or a
    /// timeout or threshold is zero.
    pub fn build(self) -> Result<AdmissionController<S>, BuildError> {
        if self.store_timeout.is_zero() {
            return Err(BuildError::ZeroStoreTimeout);
        }
        if self.breaker.failure_threshold == 0 {
            return Err(BuildError::ZeroFailureThreshold);
        }

        let mut policies = self.policies;
        if let Some(config) = &self.config {
            policies.push(config.policy()?);
        }
        if policies.is_empty() {
            policies.push(QuotaPolicy::generate());
        }

        let mut by_name: HashMap<Arc<str>, QuotaPolicy, ahash::RandomState> =
            HashMap::with_capacity_and_hasher(policies.len(), ahash::RandomState::new());
        for policy in policies {
            let name = policy.shared_name();
            if by_name.contains_key(&name) {
                return Err(BuildError::DuplicatePolicy(name.to_string()));
            }
            by_name.insert(name, policy);
        }

        Ok(AdmissionController {
            inner: Arc::new(Inner {
                store: self.store,
                policies: by_name,
                failure_mode: self.failure_mode,
                store_timeout: self.store_timeout,
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
                breaker: CircuitBreaker::with_config(self.breaker),
                metrics: self.metrics.unwrap_or_default(),
            }),
        })
    }
}

struct Inner<S> {
    store: S,
    policies: HashMap<Arc<str>, QuotaPolicy, ahash::RandomState>,
    failure_mode: FailureMode,
    store_timeout: Duration,
    clock: Arc<dyn Clock>,
    breaker: CircuitBreaker,
    metrics: Metrics,
}

/// Per-client admission controller.
///
/// Cheap to clone; clones share the store, circuit breaker and metrics.
/// Checks use `tokio::time::timeout`, so they must run inside a Tokio
/// runtime with the time driver enabled.
///
/// # Examples
///
/// ```
/// use designosaur_quota::{
///     AdmissionController, ClientIdentity, ShardedCounterStore, GENERATE_POLICY,
/// };
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let controller = AdmissionController::builder(ShardedCounterStore::new()).build()?;
/// let client = ClientIdentity::new("203.0.113.7");
///
/// let decision = controller.check(&client, GENERATE_POLICY).await?;
/// assert!(decision.admitted);
/// assert_eq!(decision.remaining, 2);
/// # Ok(())
/// # }
/// ```
pub struct AdmissionController<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for AdmissionController<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for AdmissionController<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionController")
            .field("store", &self.inner.store)
            .field("policies", &self.inner.policies.keys().collect::<Vec<_>>())
            .field("failure_mode", &self.inner.failure_mode)
            .field("store_timeout", &self.inner.store_timeout)
            .field("circuit", &self.inner.breaker.state())
            .finish()
    }
}

impl<S: CounterStore> AdmissionController<S> {
    /// Start building a controller over `store`.
    pub fn builder(store: S) -> AdmissionControllerBuilder<S> {
        AdmissionControllerBuilder {
            store,
            policies: Vec::new(),
            config: None,
            failure_mode: FailureMode::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            clock: None,
            breaker: CircuitBreakerConfig::default(),
            metrics: None,
        }
    }

    /// Check whether `identity` may make one more request under `policy`,
    /// recording it against every window if so.
    ///
    /// # Errors
    /// Returns `AdmissionError::UnknownPolicy` if no policy has this name.
    /// Store faults are not errors; they produce a degraded decision.
    pub async fn check(
        &self,
        identity: &ClientIdentity,
        policy: &str,
    ) -> Result<Decision, AdmissionError> {
        let policy = self
            .inner
            .policies
            .get(policy)
            .ok_or_else(|| AdmissionError::UnknownPolicy(policy.to_string()))?;
        let now = self.inner.clock.now();

        let name = policy.shared_name();
        let requests: Vec<WindowRequest> = policy
            .windows()
            .iter()
            .map(|window| WindowRequest {
                key: ScopeKey::new(identity.clone(), Arc::clone(&name), window.scope()),
                window: window.clone(),
            })
            .collect();

        let decision = match self.call_store(&requests, now).await {
            Ok(outcome) => self.decide(identity, policy, outcome),
            Err(error) => self.fall_back(identity, policy, now, error),
        };
        Ok(decision)
    }

    async fn call_store(
        &self,
        requests: &[WindowRequest],
        now: Timestamp,
    ) -> Result<StoreOutcome, StoreError> {
        let breaker = &self.inner.breaker;
        if !breaker.allow_request(now) {
            return Err(StoreError::CircuitOpen);
        }

        let timeout = self.inner.store_timeout;
        let result = match tokio::time::timeout(
            timeout,
            self.inner.store.check_and_record(requests, now),
        )
        .await
        {
            Ok(result) => result.and_then(|outcome| validate(requests, outcome)),
            Err(_) => Err(StoreError::Timeout(timeout)),
        };

        match &result {
            Ok(_) => breaker.record_success(),
            Err(error) => {
                if breaker.record_failure(now) {
                    tracing::error!(
                        error = %error,
                        failures = breaker.consecutive_failures(),
                        recovery_secs = breaker.config().recovery_timeout.as_secs(),
                        "counter store circuit opened"
                    );
                }
            }
        }
        result
    }

    fn decide(
        &self,
        identity: &ClientIdentity,
        policy: &QuotaPolicy,
        outcome: StoreOutcome,
    ) -> Decision {
        let decision = Decision::from_verdicts(&outcome.verdicts, outcome.admitted);
        match decision.violated_scope {
            None => {
                self.inner.metrics.record_admitted();
                tracing::debug!(
                    identity = %identity,
                    policy = policy.name(),
                    remaining = decision.remaining,
                    "request admitted"
                );
            }
            Some(scope) => {
                self.inner.metrics.record_denied(scope);
                tracing::info!(
                    identity = %identity,
                    policy = policy.name(),
                    scope = %scope,
                    limit = decision.limit,
                    reset_at = %decision.reset_at,
                    "quota exceeded"
                );
            }
        }
        decision
    }

    fn fall_back(
        &self,
        identity: &ClientIdentity,
        policy: &QuotaPolicy,
        now: Timestamp,
        error: StoreError,
    ) -> Decision {
        let mode = self.inner.failure_mode;
        let admitted = mode.admits();
        self.inner.metrics.record_store_fault();
        self.inner.metrics.record_fallback(admitted);

        tracing::warn!(
            identity = %identity,
            policy = policy.name(),
            error = %error,
            failure_mode = %mode,
            admitted,
            "counter store fault, applying failure mode"
        );

        let retry_after = self
            .inner
            .breaker
            .retry_at()
            .map(|at| now.until(at))
            .filter(|wait| !wait.is_zero())
            .unwrap_or(DEGRADED_RETRY_AFTER);
        let limit = policy.windows().first().map_or(0, |w| w.limit());
        Decision::degraded(admitted, limit, now, retry_after)
    }

    /// Look up a registered policy.
    pub fn policy(&self, name: &str) -> Option<&QuotaPolicy> {
        self.inner.policies.get(name)
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.inner.failure_mode
    }

    /// Admission metrics shared by all clones.
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Current state of the store circuit breaker.
    pub fn circuit_state(&self) -> CircuitState {
        self.inner.breaker.state()
    }

    /// The underlying counter store.
    pub fn store(&self) -> &S {
        &self.inner.store
    }
}

/// Reject replies that do not line up with the request.
fn validate(requests: &[WindowRequest], outcome: StoreOutcome) -> Result<StoreOutcome, StoreError> {
    if outcome.verdicts.len() != requests.len() {
        return Err(StoreError::Protocol(format!(
            "expected {} verdicts, got {}",
            requests.len(),
            outcome.verdicts.len()
        )));
    }
    let all_windows_admit = outcome.verdicts.iter().all(|v| v.admitted);
    if outcome.admitted != all_windows_admit {
        return Err(StoreError::Protocol(
            "overall verdict disagrees with window verdicts".to_string(),
        ));
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::window::{QuotaWindow, Scope};
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::memory_store::ShardedCounterStore;
    use crate::infrastructure::mocks::{FailingStore, MockCaptureLayer};
    use tracing::Level;
    use tracing_subscriber::layer::SubscriberExt;

    const POLICY: &str = crate::domain::policy::GENERATE_POLICY;

    fn clock() -> ManualClock {
        ManualClock::new(Timestamp::from_secs(1_700_000_000))
    }

    fn controller<S: CounterStore>(store: S, clock: &ManualClock) -> AdmissionController<S> {
        AdmissionController::builder(store)
            .with_clock(Arc::new(clock.clone()))
            .build()
            .unwrap()
    }

    fn unavailable() -> StoreError {
        StoreError::Unavailable("connection refused".to_string())
    }

    #[tokio::test]
    async fn test_default_policy_is_generate() {
        let clock = clock();
        let controller = controller(ShardedCounterStore::new(), &clock);
        let policy = controller.policy(POLICY).unwrap();
        assert_eq!(policy, &QuotaPolicy::generate());
        assert_eq!(controller.failure_mode(), FailureMode::FailClosed);
    }

    #[tokio::test]
    async fn test_unknown_policy_is_an_error() {
        let clock = clock();
        let controller = controller(ShardedCounterStore::new(), &clock);
        let err = controller
            .check(&ClientIdentity::new("1.2.3.4"), "upscale")
            .await
            .unwrap_err();
        assert_eq!(err, AdmissionError::UnknownPolicy("upscale".to_string()));
        assert_eq!(controller.store().len(), 0);
    }

    #[tokio::test]
    async fn test_admits_then_denies_on_minute_window() {
        let clock = clock();
        let controller = controller(ShardedCounterStore::new(), &clock);
        let client = ClientIdentity::new("1.2.3.4");

        for expected in [2, 1, 0] {
            let decision = controller.check(&client, POLICY).await.unwrap();
            assert!(decision.admitted);
            assert_eq!(decision.remaining, expected);
            clock.advance(Duration::from_secs(10));
        }

        let denied = controller.check(&client, POLICY).await.unwrap();
        assert!(!denied.admitted);
        assert_eq!(denied.violated_scope, Some(Scope::Minute));
        assert!(!denied.degraded);

        let metrics = controller.metrics().snapshot();
        assert_eq!(metrics.admitted, 3);
        assert_eq!(metrics.denied_minute, 1);
        assert_eq!(metrics.store_faults, 0);
    }

    #[tokio::test]
    async fn test_fail_closed_denies_and_logs() {
        let capture = MockCaptureLayer::new();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let clock = clock();
        let controller = controller(FailingStore::always(unavailable()), &clock);
        let decision = controller
            .check(&ClientIdentity::new("1.2.3.4"), POLICY)
            .await
            .unwrap();

        assert!(!decision.admitted);
        assert!(decision.degraded);
        assert_eq!(decision.violated_scope, None);
        assert_eq!(decision.rejection().unwrap().status_code(), 503);

        let warnings = capture.at_level(Level::WARN);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field("identity"), Some("1.2.3.4"));
        assert_eq!(warnings[0].field("failure_mode"), Some("fail_closed"));

        let metrics = controller.metrics().snapshot();
        assert_eq!(metrics.store_faults, 1);
        assert_eq!(metrics.fallback_denied, 1);
    }

    #[tokio::test]
    async fn test_fail_open_admits_without_recording() {
        let clock = clock();
        let controller = AdmissionController::builder(FailingStore::failing_times(1, unavailable()))
            .with_clock(Arc::new(clock.clone()))
            .with_failure_mode(FailureMode::FailOpen)
            .build()
            .unwrap();
        let client = ClientIdentity::new("1.2.3.4");

        let degraded = controller.check(&client, POLICY).await.unwrap();
        assert!(degraded.admitted);
        assert!(degraded.degraded);
        assert_eq!(controller.metrics().fallback_admitted(), 1);

        // The fallback admission was not charged.
        let next = controller.check(&client, POLICY).await.unwrap();
        assert!(next.admitted);
        assert_eq!(next.remaining, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_times_out() {
        let clock = clock();
        let controller = AdmissionController::builder(FailingStore::slow(Duration::from_secs(2)))
            .with_clock(Arc::new(clock.clone()))
            .with_store_timeout(Duration::from_millis(100))
            .build()
            .unwrap();

        let decision = controller
            .check(&ClientIdentity::new("1.2.3.4"), POLICY)
            .await
            .unwrap();
        assert!(!decision.admitted);
        assert!(decision.degraded);
        assert_eq!(controller.metrics().store_faults(), 1);
    }

    #[tokio::test]
    async fn test_circuit_opens_and_skips_store() {
        let capture = MockCaptureLayer::new();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let clock = clock();
        let controller = AdmissionController::builder(FailingStore::failing_times(2, unavailable()))
            .with_clock(Arc::new(clock.clone()))
            .with_circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::from_secs(30),
            })
            .build()
            .unwrap();
        let client = ClientIdentity::new("1.2.3.4");

        controller.check(&client, POLICY).await.unwrap();
        controller.check(&client, POLICY).await.unwrap();
        assert_eq!(controller.circuit_state(), CircuitState::Open);
        assert_eq!(capture.at_level(Level::ERROR).len(), 1);

        // Open circuit: the store is not contacted and the client is told
        // to come back when the circuit will probe again.
        clock.advance(Duration::from_secs(10));
        let skipped = controller.check(&client, POLICY).await.unwrap();
        assert!(!skipped.admitted);
        assert_eq!(controller.store().calls(), 2);
        assert_eq!(skipped.retry_after(clock.now()), Duration::from_secs(20));

        // After the recovery timeout the probe succeeds and closes the circuit.
        clock.advance(Duration::from_secs(20));
        let probe = controller.check(&client, POLICY).await.unwrap();
        assert!(probe.admitted);
        assert!(!probe.degraded);
        assert_eq!(controller.circuit_state(), CircuitState::Closed);
        assert_eq!(controller.metrics().store_faults(), 3);
    }

    #[tokio::test]
    async fn test_config_drives_policy_and_failure_mode() {
        let config: QuotaConfig =
            serde_json::from_str(r#"{"per_minute": 1, "failure_mode": "fail_open"}"#).unwrap();
        assert_eq!(config.per_day, DEFAULT_PER_DAY);
        assert_eq!(config.store_timeout(), DEFAULT_STORE_TIMEOUT);

        let clock = clock();
        let controller = AdmissionController::builder(ShardedCounterStore::new())
            .with_clock(Arc::new(clock.clone()))
            .with_config(config)
            .build()
            .unwrap();
        assert_eq!(controller.failure_mode(), FailureMode::FailOpen);

        let client = ClientIdentity::new("1.2.3.4");
        assert!(controller.check(&client, POLICY).await.unwrap().admitted);
        assert!(!controller.check(&client, POLICY).await.unwrap().admitted);
    }

    #[tokio::test]
    async fn test_multiple_policies_keep_separate_counters() {
        let clock = clock();
        let upscale =
            QuotaPolicy::new("upscale", vec![QuotaWindow::per_minute(1).unwrap()]).unwrap();
        let controller = AdmissionController::builder(ShardedCounterStore::new())
            .with_clock(Arc::new(clock.clone()))
            .with_policy(QuotaPolicy::generate())
            .with_policy(upscale)
            .build()
            .unwrap();
        let client = ClientIdentity::new("1.2.3.4");

        assert!(controller.check(&client, "upscale").await.unwrap().admitted);
        assert!(!controller.check(&client, "upscale").await.unwrap().admitted);
        assert!(controller.check(&client, POLICY).await.unwrap().admitted);
    }

    #[test]
    fn test_build_errors() {
        let duplicate = AdmissionController::builder(ShardedCounterStore::new())
            .with_policy(QuotaPolicy::generate())
            .with_config(QuotaConfig::default())
            .build();
        assert!(matches!(duplicate, Err(BuildError::DuplicatePolicy(name)) if name == "generate"));

        let zero_limit = AdmissionController::builder(ShardedCounterStore::new())
            .with_config(QuotaConfig {
                per_day: 0,
                ..QuotaConfig::default()
            })
            .build();
        assert!(matches!(
            zero_limit,
            Err(BuildError::Policy(PolicyError::ZeroLimit(Scope::Day)))
        ));

        let zero_timeout = AdmissionController::builder(ShardedCounterStore::new())
            .with_store_timeout(Duration::ZERO)
            .build();
        assert!(matches!(zero_timeout, Err(BuildError::ZeroStoreTimeout)));

        let zero_threshold = AdmissionController::builder(ShardedCounterStore::new())
            .with_circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 0,
                recovery_timeout: Duration::from_secs(1),
            })
            .build();
        assert!(matches!(zero_threshold, Err(BuildError::ZeroFailureThreshold)));
    }

    #[test]
    fn test_validate_rejects_mismatched_outcome() {
        let policy = QuotaPolicy::generate();
        let requests: Vec<WindowRequest> = policy
            .windows()
            .iter()
            .map(|w| WindowRequest {
                key: ScopeKey::new(ClientIdentity::new("a"), policy.shared_name(), w.scope()),
                window: w.clone(),
            })
            .collect();
        let outcome = StoreOutcome {
            admitted: true,
            verdicts: Vec::new(),
        };
        assert!(matches!(
            validate(&requests, outcome),
            Err(StoreError::Protocol(_))
        ));
    }
}
