//! Shared HTTP plumbing for the provider adapters.

use pagecraft_core::ProviderError;
use reqwest::header::HeaderValue;
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Builds a client with the given request timeout.
pub(crate) fn client_with_timeout(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// Error envelope most providers wrap failures in.
#[derive(serde::Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Classifies a non-2xx response into a [`ProviderError`].
///
/// 429 is rate limiting (carrying any `Retry-After` hint), 5xx is
/// transient, everything else is permanent.
pub(crate) fn map_http_error(
    status: StatusCode,
    body: String,
    retry_after: Option<Duration>,
) -> ProviderError {
    let message = serde_json::from_str::<ErrorWrapper>(&body)
        .map(|wrapper| {
            let label = wrapper
                .error
                .status
                .or(wrapper.error.kind)
                .unwrap_or_default();
            let msg = wrapper.error.message.unwrap_or_else(|| body.clone());
            if label.is_empty() {
                msg
            } else {
                format!("{label}: {msg}")
            }
        })
        .unwrap_or_else(|_| body.clone());
    let message = format!("HTTP {}: {message}", status.as_u16());

    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
            message,
            retry_after,
        },
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => ProviderError::transient(message),
        _ => ProviderError::fatal(message),
    }
}

/// Classifies a transport-level failure (the request never produced a
/// status line).
pub(crate) fn map_request_error(err: reqwest::Error) -> ProviderError {
    if err.is_connect() || err.is_timeout() {
        ProviderError::transient(format!("request failed: {err}"))
    } else {
        ProviderError::fatal(format!("request failed: {err}"))
    }
}

/// Parses an integral `Retry-After` header value.
pub(crate) fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    let value = header?.to_str().ok()?;
    // HTTP-date form is not parsed; providers we target send seconds.
    value.parse::<u64>().ok().map(Duration::from_secs)
}
