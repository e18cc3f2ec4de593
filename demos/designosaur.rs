//! Simulated upload handler for the dinosaur portrait generator.
//!
//! Run with `cargo run --example designosaur`. Set `RUST_LOG=debug` to see
//! every admission decision.

use designosaur_quota::{
    AdmissionController, ClientIdentity, Clock, CounterStore, FailureMode, GateOutcome,
    GeneratedImage, GenerationGate, GenerationRequest, GeneratorError, ImageGenerator, ManualClock,
    QuotaConfig, ShardedCounterStore, StoreError, StoreOutcome, Timestamp, WindowRequest,
};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Stands in for the hosted image model.
struct SketchGenerator;

impl ImageGenerator for SketchGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<GeneratedImage>, GeneratorError> {
        Ok((0..request.variants())
            .map(|variant| GeneratedImage {
                bytes: format!("dino #{variant} for {} bytes", request.image().len()).into_bytes(),
                mime_type: "image/png".to_string(),
            })
            .collect())
    }
}

/// A counter store whose backend is down.
#[derive(Debug)]
struct OfflineStore;

impl CounterStore for OfflineStore {
    async fn check_and_record(
        &self,
        _requests: &[WindowRequest],
        _now: Timestamp,
    ) -> Result<StoreOutcome, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

/// What the HTTP layer would send back.
fn respond(outcome: &GateOutcome, now: Timestamp) -> String {
    match outcome {
        GateOutcome::Generated { images, decision } => format!(
            "200 OK: {} variants, {} of {} left until {}",
            images.len(),
            decision.remaining,
            decision.limit,
            decision.reset_at.as_secs_ceil()
        ),
        GateOutcome::Rejected(rejection) | GateOutcome::Unavailable(rejection) => format!(
            "{} Retry-After: {}s {}",
            rejection.status_code(),
            rejection.retry_after_secs(now),
            rejection.to_json().unwrap_or_default()
        ),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let clock = ManualClock::new(Timestamp::from_secs(1_700_010_000));
    let controller = AdmissionController::builder(ShardedCounterStore::new())
        .with_clock(Arc::new(clock.clone()))
        .with_config(QuotaConfig::default())
        .build()?;
    let gate = GenerationGate::new(controller, SketchGenerator);

    let proxy = Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
    let photo = GenerationRequest::new(vec![0xFF; 2_048], "a friendly dinosaur portrait")?;

    println!("-- one client clicking five times in a row");
    let client = ClientIdentity::derive(Some("203.0.113.5, 10.0.0.1"), proxy);
    for _ in 0..5 {
        let outcome = gate.generate(&client, &photo).await?;
        println!("{}", respond(&outcome, clock.now()));
        clock.advance(Duration::from_secs(5));
    }

    println!("-- a minute later");
    clock.advance(Duration::from_secs(60));
    let outcome = gate.generate(&client, &photo).await?;
    println!("{}", respond(&outcome, clock.now()));

    println!("-- upload without a photo");
    if let Err(e) = GenerationRequest::new(Vec::new(), "a friendly dinosaur portrait") {
        println!("400 Bad Request: {e}");
    }

    println!("-- counter store offline, failing closed");
    let offline = AdmissionController::builder(OfflineStore)
        .with_clock(Arc::new(clock.clone()))
        .with_failure_mode(FailureMode::FailClosed)
        .build()?;
    let offline_gate = GenerationGate::new(offline, SketchGenerator);
    let outcome = offline_gate.generate(&client, &photo).await?;
    println!("{}", respond(&outcome, clock.now()));

    let metrics = gate.controller().metrics().snapshot();
    println!(
        "-- metrics: {} admitted, {} denied ({:.0}% denial rate)",
        metrics.admitted,
        metrics.denied(),
        metrics.denial_rate() * 100.0
    );
    Ok(())
}
