//! Generation gate wired the way a request handler uses it.

use designosaur_quota::{
    AdmissionController, ClientIdentity, GateOutcome, GeneratedImage, GenerationGate,
    GenerationRequest, GeneratorError, ImageGenerator, ManualClock, Scope, ShardedCounterStore,
    Timestamp,
};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct EchoGenerator {
    calls: AtomicUsize,
}

impl ImageGenerator for EchoGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<GeneratedImage>, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((0..request.variants())
            .map(|_| GeneratedImage {
                bytes: request.image().to_vec(),
                mime_type: "image/png".to_string(),
            })
            .collect())
    }
}

fn gate(clock: &ManualClock) -> GenerationGate<ShardedCounterStore, EchoGenerator> {
    let controller = AdmissionController::builder(ShardedCounterStore::new())
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    GenerationGate::new(controller, EchoGenerator::default())
}

#[tokio::test]
async fn test_forwarded_clients_are_limited_separately_from_proxy() {
    let clock = ManualClock::new(Timestamp::from_secs(1_700_010_000));
    let gate = gate(&clock);
    let proxy = Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
    let request = GenerationRequest::new(vec![1, 2, 3], "dinosaur portrait").unwrap();

    let alice = ClientIdentity::derive(Some("203.0.113.5, 10.0.0.1"), proxy);
    let bob = ClientIdentity::derive(Some("203.0.113.6"), proxy);

    for _ in 0..3 {
        let outcome = gate.generate(&alice, &request).await.unwrap();
        assert!(matches!(outcome, GateOutcome::Generated { ref images, .. } if images.len() == 3));
    }
    let refused = gate.generate(&alice, &request).await.unwrap();
    let GateOutcome::Rejected(rejection) = refused else {
        panic!("expected a rejection, got {refused:?}");
    };
    assert_eq!(rejection.scope, Some(Scope::Minute));

    let json: serde_json::Value = serde_json::from_str(&rejection.to_json().unwrap()).unwrap();
    assert_eq!(json["remaining"], 0);
    assert_eq!(json["limit"], 3);

    assert!(matches!(
        gate.generate(&bob, &request).await.unwrap(),
        GateOutcome::Generated { .. }
    ));
    assert_eq!(gate.generator().calls.load(Ordering::SeqCst), 4);

    clock.advance(Duration::from_secs(61));
    assert!(matches!(
        gate.generate(&alice, &request).await.unwrap(),
        GateOutcome::Generated { .. }
    ));
}

#[tokio::test]
async fn test_missing_upload_consumes_no_quota() {
    let clock = ManualClock::new(Timestamp::from_secs(1_700_010_000));
    let gate = gate(&clock);

    assert_eq!(
        GenerationRequest::new(Vec::new(), "dinosaur portrait"),
        Err(GeneratorError::MissingImage)
    );
    assert_eq!(gate.controller().metrics().snapshot().total(), 0);
}
