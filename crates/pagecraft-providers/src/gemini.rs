//! Gemini adapter: a multimodal model that accepts reference images
//! inline and streams the generated image back in response chunks.

use crate::http::{client_with_timeout, map_http_error, map_request_error, parse_retry_after};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use futures::StreamExt;
use pagecraft_core::{ImageGenerator, ImageRequest, ProviderConfig, ProviderError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_MODEL: &str = "gemini-3-pro-image-preview";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_ASPECT_RATIO: &str = "3:4";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Generator backed by the Gemini streaming REST API.
#[derive(Clone)]
pub struct GeminiGenerator {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    aspect_ratio: Option<String>,
}

impl GeminiGenerator {
    /// Creates a generator from the task configuration.
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: client_with_timeout(REQUEST_TIMEOUT),
            api_key: config.api_key.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            aspect_ratio: config.aspect_ratio.clone(),
        }
    }

    fn build_request(&self, request: &ImageRequest) -> GenerateContentRequest {
        let mut parts = Vec::new();
        for reference in &request.reference_images {
            parts.push(Part::InlineData {
                inline_data: InlineDataPayload {
                    mime_type: "image/png".to_string(),
                    data: BASE64_STANDARD.encode(reference),
                },
            });
        }
        let text = if request.reference_images.is_empty() {
            request.prompt.clone()
        } else {
            style_prompt(&request.prompt)
        };
        parts.push(Part::Text { text });

        let aspect_ratio = request
            .aspect_ratio
            .clone()
            .or_else(|| self.aspect_ratio.clone())
            .unwrap_or_else(|| DEFAULT_ASPECT_RATIO.to_string());

        GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                top_p: 0.95,
                max_output_tokens: 32768,
                response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
                image_config: ImageConfig {
                    aspect_ratio,
                    output_mime_type: "image/png".to_string(),
                },
            },
            safety_settings: default_safety_settings(),
        }
    }
}

#[async_trait]
impl ImageGenerator for GeminiGenerator {
    fn validate_config(&self) -> Result<(), ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::fatal("Gemini API key is not configured"));
        }
        Ok(())
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<Vec<u8>, ProviderError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let url = format!(
            "{}/{model}:streamGenerateContent?alt=sse&key={key}",
            self.base_url.trim_end_matches('/'),
            key = self.api_key,
        );
        let body = self.build_request(request);

        let response = self
            .client
            .post(url)
            .json(&body)
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

        // The image arrives as inline data somewhere in the SSE chunk
        // sequence; later chunks supersede earlier ones.
        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut image_data: Option<Vec<u8>> = None;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|err| ProviderError::transient(format!("stream interrupted: {err}")))?;
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|&byte| byte == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if let Some(bytes) = image_from_sse_line(&line)? {
                    image_data = Some(bytes);
                }
            }
        }
        if let Some(bytes) = image_from_sse_line(&buffer)? {
            image_data = Some(bytes);
        }

        image_data
            .ok_or_else(|| ProviderError::malformed("stream ended without image data"))
    }

    fn supported_aspect_ratios(&self) -> Vec<&'static str> {
        vec!["1:1", "3:4", "4:3", "16:9", "9:16"]
    }
}

/// Wraps the page prompt with instructions to follow the visual style
/// of the attached reference image.
fn style_prompt(prompt: &str) -> String {
    format!(
        "Use the attached image as a style reference for its palette, layout, \
         typography and decorative elements, and generate a new image in the \
         same visual style.\n\nNew image content:\n{prompt}\n\nKeep the design \
         language and color scheme consistent with the reference; only the \
         content follows the new requirements."
    )
}

fn default_safety_settings() -> Vec<SafetySetting> {
    [
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_HARASSMENT",
    ]
    .into_iter()
    .map(|category| SafetySetting {
        category: category.to_string(),
        threshold: "OFF".to_string(),
    })
    .collect()
}

/// Extracts inline image bytes from one SSE line, if it carries any.
/// Non-data lines and keep-alive noise yield `None`.
fn image_from_sse_line(line: &[u8]) -> Result<Option<Vec<u8>>, ProviderError> {
    let Ok(text) = std::str::from_utf8(line) else {
        return Ok(None);
    };
    let Some(payload) = text.trim().strip_prefix("data:") else {
        return Ok(None);
    };
    let payload = payload.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return Ok(None);
    }
    let Ok(chunk) = serde_json::from_str::<StreamChunk>(payload) else {
        return Ok(None);
    };
    match image_from_chunk(&chunk) {
        Some(encoded) => BASE64_STANDARD
            .decode(encoded)
            .map(Some)
            .map_err(|err| ProviderError::malformed(format!("invalid inline image data: {err}"))),
        None => Ok(None),
    }
}

fn image_from_chunk(chunk: &StreamChunk) -> Option<&str> {
    chunk
        .candidates
        .as_ref()?
        .first()?
        .content
        .as_ref()?
        .parts
        .iter()
        .find_map(|part| part.inline_data.as_ref())
        .map(|inline| inline.data.as_str())
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
    #[serde(rename = "safetySettings")]
    safety_settings: Vec<SafetySetting>,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineDataPayload,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineDataPayload {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f64,
    max_output_tokens: u32,
    response_modalities: Vec<String>,
    image_config: ImageConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
    output_mime_type: String,
}

#[derive(Serialize)]
struct SafetySetting {
    category: String,
    threshold: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(rename = "inlineData")]
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
struct InlineData {
    data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> GeminiGenerator {
        GeminiGenerator::new(&ProviderConfig::new("gemini", "test-key"))
    }

    #[test]
    fn validate_rejects_empty_key() {
        let unconfigured = GeminiGenerator::new(&ProviderConfig::new("gemini", "  "));
        assert!(unconfigured.validate_config().is_err());
        assert!(generator().validate_config().is_ok());
    }

    #[test]
    fn plain_request_serializes_camel_case() {
        let request = ImageRequest::new("a red fox").with_aspect_ratio("16:9");
        let json = serde_json::to_value(generator().build_request(&request)).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "a red fox");
        let config = &json["generationConfig"];
        assert_eq!(config["topP"], 0.95);
        assert_eq!(config["maxOutputTokens"], 32768);
        assert_eq!(config["responseModalities"][1], "IMAGE");
        assert_eq!(config["imageConfig"]["aspectRatio"], "16:9");
        assert_eq!(config["imageConfig"]["outputMimeType"], "image/png");
        assert_eq!(json["safetySettings"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn reference_images_precede_a_style_prompt() {
        let request = ImageRequest::new("page two")
            .with_reference_images(vec![vec![1, 2, 3]]);
        let json = serde_json::to_value(generator().build_request(&request)).unwrap();
        let parts = json["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[0]["inlineData"]["data"],
            BASE64_STANDARD.encode([1, 2, 3])
        );
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/png");
        let text = parts[1]["text"].as_str().unwrap();
        assert!(text.contains("style reference"));
        assert!(text.contains("page two"));
    }

    #[test]
    fn aspect_ratio_falls_back_to_default() {
        let request = ImageRequest::new("x");
        let json = serde_json::to_value(generator().build_request(&request)).unwrap();
        assert_eq!(json["generationConfig"]["imageConfig"]["aspectRatio"], "3:4");
    }

    #[test]
    fn sse_line_with_inline_data_decodes() {
        let encoded = BASE64_STANDARD.encode(b"png-bytes");
        let line = format!(
            r#"data: {{"candidates": [{{"content": {{"parts": [{{"text": "here"}}, {{"inlineData": {{"mimeType": "image/png", "data": "{encoded}"}}}}]}}}}]}}"#
        );
        let bytes = image_from_sse_line(line.as_bytes()).unwrap().unwrap();
        assert_eq!(bytes, b"png-bytes");
    }

    #[test]
    fn non_image_sse_lines_are_skipped() {
        assert!(image_from_sse_line(b"").unwrap().is_none());
        assert!(image_from_sse_line(b": keep-alive").unwrap().is_none());
        assert!(image_from_sse_line(b"data: [DONE]").unwrap().is_none());
        assert!(
            image_from_sse_line(br#"data: {"candidates": [{"content": {"parts": [{"text": "no image"}]}}]}"#)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn corrupt_inline_data_is_malformed() {
        let line = br#"data: {"candidates": [{"content": {"parts": [{"inlineData": {"data": "!!not-base64!!"}}]}}]}"#;
        let err = image_from_sse_line(line).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }
}
