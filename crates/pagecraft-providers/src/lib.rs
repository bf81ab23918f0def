//! Concrete image provider adapters and the default registry wiring.
//!
//! Three adapter families cover the providers in the wild: a native
//! multimodal model ([`GeminiGenerator`]), hosted image generation
//! endpoints ([`ImageApiGenerator`]) and chat completion endpoints
//! repurposed for images ([`ChatCompletionGenerator`]).

pub mod chat;
pub mod compressor;
pub mod gemini;
mod http;
pub mod image_api;

pub use chat::ChatCompletionGenerator;
pub use compressor::JpegReferenceCompressor;
pub use gemini::GeminiGenerator;
pub use image_api::ImageApiGenerator;

use pagecraft_core::{EndpointType, ImageGenerator, ProviderRegistry};
use std::sync::Arc;

/// Builds a registry with every built-in provider registered.
///
/// Keys: `gemini` / `google_genai` for the multimodal model,
/// `image_api` for hosted image endpoints, and `openai` /
/// `openai_compatible` which dispatch on the configured endpoint type.
pub fn default_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register("gemini", |config| {
        Ok(Arc::new(GeminiGenerator::new(config)) as Arc<dyn ImageGenerator>)
    });
    registry.register("google_genai", |config| {
        Ok(Arc::new(GeminiGenerator::new(config)) as Arc<dyn ImageGenerator>)
    });
    registry.register("image_api", |config| {
        Ok(Arc::new(ImageApiGenerator::new(config)) as Arc<dyn ImageGenerator>)
    });
    registry.register("openai", openai_compatible);
    registry.register("openai_compatible", openai_compatible);
    registry
}

fn openai_compatible(
    config: &pagecraft_core::ProviderConfig,
) -> pagecraft_core::Result<Arc<dyn ImageGenerator>> {
    Ok(match config.endpoint_type {
        EndpointType::Images => Arc::new(ImageApiGenerator::new(config)),
        EndpointType::Chat => Arc::new(ChatCompletionGenerator::new(config)),
    })
}
