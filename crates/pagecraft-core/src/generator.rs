//! Image generator capability contract.
//!
//! Each provider adapter implements [`ImageGenerator`]; the engine only
//! ever talks to the trait object resolved through the registry.

use crate::error::ProviderError;
use async_trait::async_trait;

/// A single provider call: one prompt in, one image out.
///
/// Reference images have already been compressed by the engine before
/// they land here.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    /// The image prompt.
    pub prompt: String,
    /// Aspect ratio ("3:4", "16:9", ...), provider default when absent.
    pub aspect_ratio: Option<String>,
    /// Pixel size ("1024x1024", ...), provider default when absent.
    pub size: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Model override, provider default when absent.
    pub model: Option<String>,
    /// Reference images biasing the style of the output.
    pub reference_images: Vec<Vec<u8>>,
}

impl ImageRequest {
    /// Creates a request with defaults for everything but the prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            aspect_ratio: None,
            size: None,
            temperature: 1.0,
            model: None,
            reference_images: Vec::new(),
        }
    }

    /// Sets the aspect ratio.
    pub fn with_aspect_ratio(mut self, aspect_ratio: impl Into<String>) -> Self {
        self.aspect_ratio = Some(aspect_ratio.into());
        self
    }

    /// Attaches reference images.
    pub fn with_reference_images(mut self, images: Vec<Vec<u8>>) -> Self {
        self.reference_images = images;
        self
    }
}

/// Capability contract implemented by each provider adapter.
///
/// Implementations classify their failures through [`ProviderError`]
/// variants so the retry policy can tell rate limits and transient
/// faults from permanent ones.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Checks that required credentials/endpoint are present.
    ///
    /// Called once before any page starts; a failure aborts the whole
    /// task without emitting events.
    fn validate_config(&self) -> Result<(), ProviderError>;

    /// Generates one image. Returns the raw image bytes.
    async fn generate_image(&self, request: &ImageRequest) -> Result<Vec<u8>, ProviderError>;

    /// Aspect ratios the provider advertises. Advisory only, the engine
    /// does not enforce them.
    fn supported_aspect_ratios(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Image sizes the provider advertises. Advisory only.
    fn supported_sizes(&self) -> Vec<String> {
        Vec::new()
    }
}
