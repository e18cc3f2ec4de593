//! Quota gate in front of the image generator.
//!
//! One admitted check covers a whole generation request, however many
//! variants it asks for. The generator is never called for a request that
//! was not admitted.

use crate::application::controller::{AdmissionController, AdmissionError};
use crate::application::ports::{CounterStore, ImageGenerator};
use crate::domain::decision::{Decision, Rejection};
use crate::domain::identity::ClientIdentity;
use crate::domain::policy::GENERATE_POLICY;
use std::fmt;

/// Variants produced per request unless the caller asks otherwise.
pub const DEFAULT_VARIANTS: u8 = 3;

/// Input for one generation call.
#[derive(Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    image: Vec<u8>,
    style_reference: Option<Vec<u8>>,
    directive: String,
    variants: u8,
}

impl GenerationRequest {
    /// Create a request for the uploaded photo.
    ///
    /// # Errors
    /// Returns `GeneratorError::MissingImage` if `image` is empty.
    pub fn new(image: Vec<u8>, directive: impl Into<String>) -> Result<Self, GeneratorError> {
        if image.is_empty() {
            return Err(GeneratorError::MissingImage);
        }
        Ok(Self {
            image,
            style_reference: None,
            directive: directive.into(),
            variants: DEFAULT_VARIANTS,
        })
    }

    /// Attach a reference image whose style the output should follow.
    pub fn with_style_reference(mut self, reference: Vec<u8>) -> Self {
        self.style_reference = Some(reference).filter(|r| !r.is_empty());
        self
    }

    /// Number of variants to generate, at least one.
    pub fn with_variants(mut self, variants: u8) -> Self {
        self.variants = variants.max(1);
        self
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn style_reference(&self) -> Option<&[u8]> {
        self.style_reference.as_deref()
    }

    pub fn directive(&self) -> &str {
        &self.directive
    }

    pub fn variants(&self) -> u8 {
        self.variants
    }
}

impl fmt::Debug for GenerationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationRequest")
            .field("image_bytes", &self.image.len())
            .field(
                "style_reference_bytes",
                &self.style_reference.as_ref().map(Vec::len),
            )
            .field("directive", &self.directive)
            .field("variants", &self.variants)
            .finish()
    }
}

/// One image returned by the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Failure reported by an [`ImageGenerator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    /// No photo was uploaded
    MissingImage,
    /// The provider refused or failed the request
    Provider(String),
    /// The provider answered without any image
    EmptyResponse,
}

impl fmt::Display for GeneratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneratorError::MissingImage => write!(f, "no image uploaded"),
            GeneratorError::Provider(reason) => write!(f, "image provider failed: {reason}"),
            GeneratorError::EmptyResponse => write!(f, "image provider returned no images"),
        }
    }
}

impl std::error::Error for GeneratorError {}

/// Result of a gated generation request.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Admitted and generated.
    Generated {
        images: Vec<GeneratedImage>,
        decision: Decision,
    },
    /// Refused by the quota; send `rejection` with HTTP 429.
    Rejected(Rejection),
    /// Refused because the limiter could not reach its store; HTTP 503.
    Unavailable(Rejection),
}

/// Error returned by [`GenerationGate::generate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// The request named a policy the controller does not know
    Admission(AdmissionError),
    /// The request was admitted but generation failed
    Generator(GeneratorError),
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateError::Admission(e) => write!(f, "admission failed: {e}"),
            GateError::Generator(e) => write!(f, "generation failed: {e}"),
        }
    }
}

impl std::error::Error for GateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GateError::Admission(e) => Some(e),
            GateError::Generator(e) => Some(e),
        }
    }
}

impl From<AdmissionError> for GateError {
    fn from(e: AdmissionError) -> Self {
        GateError::Admission(e)
    }
}

impl From<GeneratorError> for GateError {
    fn from(e: GeneratorError) -> Self {
        GateError::Generator(e)
    }
}

/// Runs the admission check and calls the generator only when admitted.
#[derive(Debug)]
pub struct GenerationGate<S, G> {
    controller: AdmissionController<S>,
    generator: G,
    policy: String,
}

impl<S, G> GenerationGate<S, G>
where
    S: CounterStore,
    G: ImageGenerator,
{
    /// Gate `generator` behind the `generate` policy.
    pub fn new(controller: AdmissionController<S>, generator: G) -> Self {
        Self::with_policy(controller, generator, GENERATE_POLICY)
    }

    /// Gate `generator` behind a named policy.
    pub fn with_policy(
        controller: AdmissionController<S>,
        generator: G,
        policy: impl Into<String>,
    ) -> Self {
        Self {
            controller,
            generator,
            policy: policy.into(),
        }
    }

    /// Check the quota for `identity` and generate if admitted.
    ///
    /// # Errors
    /// Returns `GateError::Generator` if the admitted generation fails, and
    /// `GateError::Admission` if the gate's policy is not registered. Quota
    /// denials are outcomes, not errors.
    pub async fn generate(
        &self,
        identity: &ClientIdentity,
        request: &GenerationRequest,
    ) -> Result<GateOutcome, GateError> {
        let decision = self.controller.check(identity, &self.policy).await?;
        if let Some(rejection) = decision.rejection() {
            return Ok(match rejection.scope {
                Some(_) => GateOutcome::Rejected(rejection),
                None => GateOutcome::Unavailable(rejection),
            });
        }

        let images = self.generator.generate(request).await.map_err(|e| {
            tracing::warn!(identity = %identity, error = %e, "image generation failed");
            e
        })?;
        if images.is_empty() {
            return Err(GeneratorError::EmptyResponse.into());
        }
        tracing::debug!(
            identity = %identity,
            variants = images.len(),
            remaining = decision.remaining,
            "images generated"
        );
        Ok(GateOutcome::Generated { images, decision })
    }

    pub fn controller(&self) -> &AdmissionController<S> {
        &self.controller
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }
}
