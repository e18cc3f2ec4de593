//! # designosaur-quota
//!
//! Per-client admission control for a paid image-generation API.
//!
//! Every client (identified by network address) gets two quotas that must
//! both admit a request:
//!
//! - **3 requests per minute** on a sliding window, against bursts;
//! - **20 requests per day** on a fixed, epoch-aligned window, against
//!   sustained use.
//!
//! A check is atomic across both windows: a request refused by one window
//! is charged to neither. Refusals come with the violated window, its limit
//! and the time it frees up, ready to be sent to the client as a 429 body.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use designosaur_quota::{
//!     AdmissionController, ClientIdentity, ShardedCounterStore, GENERATE_POLICY,
//! };
//!
//! # async fn handle(forwarded_for: Option<&str>, peer: Option<std::net::IpAddr>)
//! # -> Result<(), Box<dyn std::error::Error>> {
//! let controller = AdmissionController::builder(ShardedCounterStore::new()).build()?;
//!
//! let client = ClientIdentity::derive(forwarded_for, peer);
//! let decision = controller.check(&client, GENERATE_POLICY).await?;
//!
//! if let Some(rejection) = decision.rejection() {
//!     // Respond with rejection.status_code() and rejection.to_json()?
//!     return Ok(());
//! }
//! // Admitted: call the image generator.
//! # Ok(())
//! # }
//! ```
//!
//! ## Windows
//!
//! - **Sliding**: an event counts until it is a full window length old.
//!   Exact, with memory bounded by the limit per client.
//! - **Fixed**: one counter per epoch-aligned bucket. All instances agree on
//!   bucket boundaries. A client may get up to twice the limit in a short
//!   span straddling a boundary.
//!
//! ## Counter stores
//!
//! - [`ShardedCounterStore`]: in-process, lock per counter.
//! - `RedisCounterStore` (feature `redis-storage`): shared between
//!   instances, one Lua script per check.
//!
//! ## Store faults
//!
//! Store errors, timeouts and an open circuit never surface as errors. The
//! configured [`FailureMode`] decides: fail closed (default, HTTP 503) or
//! fail open. Each fault is logged at WARN and counted in [`Metrics`].
//!
//! ## Configuration
//!
//! ```rust
//! use designosaur_quota::{AdmissionController, FailureMode, QuotaConfig, ShardedCounterStore};
//!
//! let json = r#"{ "per_day": 50, "failure_mode": "fail_open" }"#;
//! let config: QuotaConfig = serde_json::from_str(json)?;
//! let controller = AdmissionController::builder(ShardedCounterStore::new())
//!     .with_config(config)
//!     .build()?;
//! assert_eq!(controller.failure_mode(), FailureMode::FailOpen);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **Domain**: time, identities, windows, policies, decisions
//! - **Application**: controller, circuit breaker, generation gate, ports
//! - **Infrastructure**: clocks and counter stores

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    decision::{Decision, Rejection, WindowStatus},
    identity::{ClientIdentity, ScopeKey},
    policy::{PolicyError, QuotaPolicy, DEFAULT_PER_DAY, DEFAULT_PER_MINUTE, GENERATE_POLICY},
    time::Timestamp,
    window::{QuotaWindow, Scope, WindowKind, WindowState, WindowVerdict, DAY, MINUTE},
};

pub use application::{
    circuit_breaker::{CircuitBreakerConfig, CircuitState},
    controller::{
        AdmissionController, AdmissionControllerBuilder, AdmissionError, BuildError, FailureMode,
        QuotaConfig, DEFAULT_STORE_TIMEOUT,
    },
    gate::{
        GateError, GateOutcome, GeneratedImage, GenerationGate, GenerationRequest, GeneratorError,
        DEFAULT_VARIANTS,
    },
    metrics::{Metrics, MetricsSnapshot},
    ports::{Clock, CounterStore, ImageGenerator, StoreError, StoreOutcome, WindowRequest},
};

pub use infrastructure::{
    clock::{ManualClock, SystemClock},
    memory_store::{ShardedCounterStore, DEFAULT_SWEEP_INTERVAL},
};

#[cfg(feature = "redis-storage")]
pub use infrastructure::redis_store::{RedisCounterStore, RedisStoreConfig};
