//! Adapter for OpenAI-style `/v1/images/generations` endpoints.
//!
//! Handles both response shapes in the wild: inline `b64_json` payloads
//! (optionally wrapped in a data URI) and a hosted `url` that needs a
//! follow-up download. Reference images ride along as data URIs in the
//! request's `image` array.

use crate::http::{client_with_timeout, map_http_error, map_request_error, parse_retry_after};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use pagecraft_core::{ImageGenerator, ImageRequest, ProviderConfig, ProviderError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_MODEL: &str = "dall-e-3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Generator backed by a hosted image generation API.
#[derive(Clone)]
pub struct ImageApiGenerator {
    client: Client,
    download_client: Client,
    api_key: String,
    base_url: Option<String>,
    model: String,
    image_size: Option<String>,
    supported_sizes: Vec<String>,
}

impl ImageApiGenerator {
    /// Creates a generator from the task configuration.
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: client_with_timeout(REQUEST_TIMEOUT),
            download_client: client_with_timeout(DOWNLOAD_TIMEOUT),
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            image_size: config.image_size.clone(),
            supported_sizes: config.supported_sizes.clone(),
        }
    }

    fn build_payload(&self, request: &ImageRequest) -> ImagesPayload {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.model.clone());
        // DALL-E models take a quality knob; other backends reject it.
        let quality = model.starts_with("dall-e").then(|| "standard".to_string());

        let image: Vec<String> = request
            .reference_images
            .iter()
            .map(|bytes| format!("data:image/png;base64,{}", BASE64_STANDARD.encode(bytes)))
            .collect();
        let prompt = if image.is_empty() {
            request.prompt.clone()
        } else {
            reference_prompt(&request.prompt, image.len())
        };

        ImagesPayload {
            model,
            prompt,
            n: 1,
            response_format: "b64_json",
            quality,
            size: request.size.clone(),
            aspect_ratio: request.aspect_ratio.clone(),
            image_size: self.image_size.clone(),
            image,
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .download_client
            .get(url)
            .send()
            .await
            .map_err(map_request_error)?;
        if !response.status().is_success() {
            return Err(ProviderError::transient(format!(
                "image download failed with HTTP {}",
                response.status().as_u16()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ProviderError::transient(format!("image download failed: {err}")))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageGenerator for ImageApiGenerator {
    fn validate_config(&self) -> Result<(), ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::fatal("API key is not configured"));
        }
        if self.base_url.as_deref().unwrap_or("").trim().is_empty() {
            return Err(ProviderError::fatal("base URL is not configured"));
        }
        Ok(())
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<Vec<u8>, ProviderError> {
        self.validate_config()?;
        let base_url = self.base_url.as_deref().unwrap_or("");
        let url = format!("{}/v1/images/generations", base_url.trim_end_matches('/'));
        let payload = self.build_payload(request);

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(map_request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(map_http_error(status, body_text, retry_after));
        }

        let parsed: ImagesResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::malformed(format!("unparsable response: {err}")))?;
        let Some(item) = parsed.data.into_iter().next() else {
            return Err(ProviderError::malformed("response carried no image data"));
        };

        if let Some(encoded) = item.b64_json {
            return decode_b64_payload(&encoded);
        }
        if let Some(url) = item.url {
            return self.download(&url).await;
        }
        Err(ProviderError::malformed(
            "response item had neither b64_json nor url",
        ))
    }

    fn supported_sizes(&self) -> Vec<String> {
        if !self.supported_sizes.is_empty() {
            return self.supported_sizes.clone();
        }
        ["1024x1024", "1792x1024", "1024x1792", "2048x2048", "4096x4096"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn supported_aspect_ratios(&self) -> Vec<&'static str> {
        vec![
            "1:1", "2:3", "3:2", "3:4", "4:3", "4:5", "5:4", "9:16", "16:9", "21:9",
        ]
    }
}

/// Wraps the page prompt with instructions to match the style of the
/// attached reference images.
fn reference_prompt(prompt: &str, count: usize) -> String {
    format!(
        "Follow the style of the {count} attached reference image(s): color, \
         lighting, composition and mood.\n\nNew image content: {prompt}\n\n\
         Keep a similar palette and atmosphere, similar lighting treatment and \
         a consistent texture."
    )
}

/// Decodes a `b64_json` value, tolerating a data URI prefix some
/// backends prepend.
fn decode_b64_payload(encoded: &str) -> Result<Vec<u8>, ProviderError> {
    let raw = match encoded.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .unwrap_or(encoded),
        None => encoded,
    };
    BASE64_STANDARD
        .decode(raw.trim())
        .map_err(|err| ProviderError::malformed(format!("invalid base64 image data: {err}")))
}

#[derive(Serialize)]
struct ImagesPayload {
    model: String,
    prompt: String,
    n: u32,
    response_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_size: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    image: Vec<String>,
}

#[derive(Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageItem>,
}

#[derive(Deserialize)]
struct ImageItem {
    b64_json: Option<String>,
    url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> ImageApiGenerator {
        let config = ProviderConfig::new("image_api", "test-key")
            .with_base_url("https://images.example.com");
        ImageApiGenerator::new(&config)
    }

    #[test]
    fn validate_requires_key_and_base_url() {
        assert!(generator().validate_config().is_ok());
        let missing_url = ImageApiGenerator::new(&ProviderConfig::new("image_api", "key"));
        assert!(missing_url.validate_config().is_err());
        let missing_key = ImageApiGenerator::new(
            &ProviderConfig::new("image_api", "").with_base_url("https://x"),
        );
        assert!(missing_key.validate_config().is_err());
    }

    #[test]
    fn plain_payload_keeps_original_prompt() {
        let request = ImageRequest::new("a lighthouse").with_aspect_ratio("3:4");
        let json = serde_json::to_value(generator().build_payload(&request)).unwrap();
        assert_eq!(json["prompt"], "a lighthouse");
        assert_eq!(json["response_format"], "b64_json");
        assert_eq!(json["aspect_ratio"], "3:4");
        assert_eq!(json["n"], 1);
        assert!(json.get("image").is_none());
        assert!(json.get("size").is_none());
    }

    #[test]
    fn references_become_data_uris_with_enhanced_prompt() {
        let request = ImageRequest::new("a lighthouse")
            .with_reference_images(vec![vec![9, 9], vec![8, 8]]);
        let json = serde_json::to_value(generator().build_payload(&request)).unwrap();
        let images = json["image"].as_array().unwrap();
        assert_eq!(images.len(), 2);
        assert!(
            images[0]
                .as_str()
                .unwrap()
                .starts_with("data:image/png;base64,")
        );
        let prompt = json["prompt"].as_str().unwrap();
        assert!(prompt.contains("2 attached reference image"));
        assert!(prompt.contains("a lighthouse"));
    }

    #[test]
    fn quality_only_for_dalle_models() {
        let dalle = generator().build_payload(&ImageRequest::new("x"));
        assert_eq!(dalle.quality.as_deref(), Some("standard"));

        let config = ProviderConfig::new("image_api", "k")
            .with_base_url("https://x")
            .with_model("nano-banana-2");
        let other = ImageApiGenerator::new(&config).build_payload(&ImageRequest::new("x"));
        assert!(other.quality.is_none());
    }

    #[test]
    fn b64_payload_decodes_with_and_without_data_uri() {
        let plain = BASE64_STANDARD.encode(b"img");
        assert_eq!(decode_b64_payload(&plain).unwrap(), b"img");
        let with_prefix = format!("data:image/png;base64,{plain}");
        assert_eq!(decode_b64_payload(&with_prefix).unwrap(), b"img");
        assert!(decode_b64_payload("%%%").is_err());
    }
}
