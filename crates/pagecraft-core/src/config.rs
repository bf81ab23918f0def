//! Provider configuration.
//!
//! A `ProviderConfig` is supplied once per task (the transport layer may
//! build it from request headers) and threaded as an explicit argument
//! through the orchestration call chain. It is never mutated during a
//! run and there is no ambient/global lookup.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Which endpoint family an OpenAI-compatible provider exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointType {
    /// `/v1/images/generations` — a real image generation endpoint.
    #[default]
    Images,
    /// `/v1/chat/completions` repurposed for images. Best-effort only.
    Chat,
}

/// Configuration for resolving and calling one image provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Registry key of the provider ("gemini", "image_api", "openai", ...).
    pub provider: String,
    /// API credential for the provider.
    pub api_key: String,
    /// Endpoint base URL; providers fall back to their default.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Model override; providers fall back to their default.
    #[serde(default)]
    pub model: Option<String>,
    /// Default aspect ratio when a page has no override.
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    /// Pixel size for providers that take "1024x1024"-style sizes.
    #[serde(default)]
    pub size: Option<String>,
    /// Endpoint family for OpenAI-compatible providers.
    #[serde(default)]
    pub endpoint_type: EndpointType,
    /// Resolution tier ("1K", "2K", "4K") for providers that take one.
    #[serde(default)]
    pub image_size: Option<String>,
    /// Advertised size capability override.
    #[serde(default)]
    pub supported_sizes: Vec<String>,
}

impl ProviderConfig {
    /// Creates a minimal configuration for the given provider key.
    pub fn new(provider: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            api_key: api_key.into(),
            base_url: None,
            model: None,
            aspect_ratio: None,
            size: None,
            endpoint_type: EndpointType::default(),
            image_size: None,
            supported_sizes: Vec::new(),
        }
    }

    /// Overrides the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Overrides the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the endpoint family.
    pub fn with_endpoint_type(mut self, endpoint_type: EndpointType) -> Self {
        self.endpoint_type = endpoint_type;
        self
    }

    /// Loads configuration from `PAGECRAFT_*` environment variables.
    ///
    /// `PAGECRAFT_PROVIDER` and `PAGECRAFT_API_KEY` are required;
    /// `PAGECRAFT_BASE_URL`, `PAGECRAFT_MODEL`, `PAGECRAFT_ENDPOINT_TYPE`
    /// ("images" | "chat"), `PAGECRAFT_ASPECT_RATIO` and
    /// `PAGECRAFT_IMAGE_SIZE` are optional. An explicit configuration
    /// built by the transport layer always takes precedence over this.
    pub fn from_env() -> Result<Self> {
        let provider = env::var("PAGECRAFT_PROVIDER")
            .map_err(|_| EngineError::config("PAGECRAFT_PROVIDER is not set"))?;
        let api_key = env::var("PAGECRAFT_API_KEY")
            .map_err(|_| EngineError::config("PAGECRAFT_API_KEY is not set"))?;

        let endpoint_type = match env::var("PAGECRAFT_ENDPOINT_TYPE").ok().as_deref() {
            None | Some("images") => EndpointType::Images,
            Some("chat") => EndpointType::Chat,
            Some(other) => {
                return Err(EngineError::config(format!(
                    "unsupported endpoint type: {other}"
                )));
            }
        };

        Ok(Self {
            provider,
            api_key,
            base_url: env::var("PAGECRAFT_BASE_URL").ok(),
            model: env::var("PAGECRAFT_MODEL").ok(),
            aspect_ratio: env::var("PAGECRAFT_ASPECT_RATIO").ok(),
            size: env::var("PAGECRAFT_SIZE").ok(),
            endpoint_type,
            image_size: env::var("PAGECRAFT_IMAGE_SIZE").ok(),
            supported_sizes: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_type_defaults_to_images() {
        let config = ProviderConfig::new("image_api", "key");
        assert_eq!(config.endpoint_type, EndpointType::Images);
    }

    #[test]
    fn deserializes_with_optional_fields_missing() {
        let config: ProviderConfig =
            serde_json::from_str(r#"{"provider": "gemini", "api_key": "k"}"#).unwrap();
        assert_eq!(config.provider, "gemini");
        assert!(config.base_url.is_none());
        assert_eq!(config.endpoint_type, EndpointType::Images);
    }

    #[test]
    fn deserializes_chat_endpoint_type() {
        let config: ProviderConfig = serde_json::from_str(
            r#"{"provider": "openai", "api_key": "k", "endpoint_type": "chat"}"#,
        )
        .unwrap();
        assert_eq!(config.endpoint_type, EndpointType::Chat);
    }
}
