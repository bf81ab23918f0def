//! Adapter for backends that serve images through `/v1/chat/completions`.
//!
//! Some vendors have no dedicated image endpoint and return a data URI
//! in the assistant message instead. This is best effort: the response
//! is sniffed for an embedded `data:image/...;base64,` payload.

use crate::http::{client_with_timeout, map_http_error, map_request_error, parse_retry_after};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use pagecraft_core::{ImageGenerator, ImageRequest, ProviderConfig, ProviderError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_MODEL: &str = "dall-e-3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Generator that extracts images from chat completion responses.
#[derive(Clone)]
pub struct ChatCompletionGenerator {
    client: Client,
    api_key: String,
    base_url: Option<String>,
    model: String,
}

impl ChatCompletionGenerator {
    /// Creates a generator from the task configuration.
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: client_with_timeout(REQUEST_TIMEOUT),
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }

    fn build_payload(&self, request: &ImageRequest) -> ChatPayload {
        ChatPayload {
            model: request
                .model
                .clone()
                .unwrap_or_else(|| self.model.clone()),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            max_tokens: 4096,
            temperature: request.temperature,
            response_format: ResponseFormat { kind: "image" },
            size: request.size.clone(),
        }
    }
}

#[async_trait]
impl ImageGenerator for ChatCompletionGenerator {
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
        let url = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));
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

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::malformed(format!("unparsable response: {err}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .ok_or_else(|| ProviderError::malformed("response carried no message content"))?;

        image_from_content(&content)
    }
}

/// Pulls a base64 image out of assistant message content carrying a
/// `data:image/...;base64,` URI.
fn image_from_content(content: &str) -> Result<Vec<u8>, ProviderError> {
    let start = content.find("data:image").ok_or_else(|| {
        ProviderError::malformed("no image data URI in chat response content")
    })?;
    let uri = &content[start..];
    let encoded = uri
        .split_once(',')
        .map(|(_, rest)| rest)
        .ok_or_else(|| ProviderError::malformed("truncated image data URI"))?;
    // The URI may be embedded in markdown; stop at the first delimiter.
    let encoded = encoded
        .split(|c: char| c.is_whitespace() || c == ')' || c == '"' || c == '\'')
        .next()
        .unwrap_or(encoded);
    BASE64_STANDARD
        .decode(encoded)
        .map_err(|err| ProviderError::malformed(format!("invalid base64 image data: {err}")))
}

#[derive(Serialize)]
struct ChatPayload {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<String>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ResponseMessage>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> ChatCompletionGenerator {
        let config = ProviderConfig::new("openai_compatible", "test-key")
            .with_base_url("https://chat.example.com");
        ChatCompletionGenerator::new(&config)
    }

    #[test]
    fn payload_targets_chat_schema() {
        let request = ImageRequest::new("draw a boat");
        let json = serde_json::to_value(generator().build_payload(&request)).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "draw a boat");
        assert_eq!(json["max_tokens"], 4096);
        assert_eq!(json["response_format"]["type"], "image");
        assert_eq!(json["model"], "dall-e-3");
    }

    #[test]
    fn bare_data_uri_content_decodes() {
        let encoded = BASE64_STANDARD.encode(b"picture");
        let content = format!("data:image/png;base64,{encoded}");
        assert_eq!(image_from_content(&content).unwrap(), b"picture");
    }

    #[test]
    fn data_uri_embedded_in_markdown_decodes() {
        let encoded = BASE64_STANDARD.encode(b"picture");
        let content = format!("Here you go:\n![image](data:image/jpeg;base64,{encoded}) enjoy");
        assert_eq!(image_from_content(&content).unwrap(), b"picture");
    }

    #[test]
    fn plain_text_content_is_malformed() {
        let err = image_from_content("I cannot draw that").unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
        let err = image_from_content("data:image/png;base64").unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }
}
