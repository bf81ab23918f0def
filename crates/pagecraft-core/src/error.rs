//! Error types for the pagecraft engine.

use std::time::Duration;
use thiserror::Error;

/// Classification of a provider failure, used by the retry policy to
/// decide whether another attempt is worthwhile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The provider rejected the call due to rate limiting. Retryable.
    RateLimited,
    /// A transient failure (network hiccup, 5xx, malformed response). Retryable.
    Transient,
    /// A permanent failure. Retrying will not help.
    Fatal,
}

/// An error produced by a single provider call.
///
/// Variants carry the classification hint derived from the provider's
/// HTTP status or raw error text; `kind()` collapses them into the
/// three-way taxonomy the retry policy understands.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// The provider returned 429 or an equivalent quota error.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        /// Provider-supplied `Retry-After` delay, when present.
        retry_after: Option<Duration>,
    },

    /// Connection failures, timeouts, 5xx responses.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// The call succeeded at the HTTP level but the response did not
    /// carry an image payload in the expected shape.
    #[error("malformed provider response: {0}")]
    Malformed(String),

    /// Missing credentials, 4xx rejections, unusable configuration.
    #[error("provider failure: {0}")]
    Fatal(String),
}

impl ProviderError {
    /// Creates a RateLimited error without a Retry-After hint.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Creates a Transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Creates a Malformed error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Creates a Fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Collapses the variant into the retry classification.
    ///
    /// Malformed responses classify as Transient: the bounded retry
    /// budget applies before the page is demoted to a failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Transient(_) | Self::Malformed(_) => ErrorKind::Transient,
            Self::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Returns the provider-supplied backoff hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether the retry policy may attempt this call again.
    pub fn is_retryable(&self) -> bool {
        self.kind() != ErrorKind::Fatal
    }
}

/// Task-level errors that abort an operation before any page event is
/// emitted. Per-page failures never surface here; they become
/// `PageFailed` events instead.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid or incomplete configuration (missing credentials,
    /// empty page list, unusable endpoint).
    #[error("configuration error: {0}")]
    Config(String),

    /// The requested provider key is not registered.
    #[error("unsupported provider '{provider}', known providers: {known:?}")]
    UnsupportedProvider {
        provider: String,
        known: Vec<String>,
    },

    /// No progress record exists for the task id.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// The task exists but has no page with the given index.
    #[error("task '{task_id}' has no page {page}")]
    UnknownPage { task_id: String, page: u32 },

    /// Image persistence failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Creates a Config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a Storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}

/// A type alias for `Result<T, EngineError>`.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_classification() {
        assert_eq!(
            ProviderError::rate_limited("quota").kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(
            ProviderError::transient("connection reset").kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            ProviderError::malformed("no image payload").kind(),
            ErrorKind::Transient
        );
        assert_eq!(ProviderError::fatal("bad key").kind(), ErrorKind::Fatal);
    }

    #[test]
    fn retry_after_only_on_rate_limit() {
        let err = ProviderError::RateLimited {
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(ProviderError::transient("x").retry_after(), None);
    }

    #[test]
    fn unsupported_provider_lists_known_keys() {
        let err = EngineError::UnsupportedProvider {
            provider: "nope".into(),
            known: vec!["gemini".into(), "image_api".into()],
        };
        let message = err.to_string();
        assert!(message.contains("nope"));
        assert!(message.contains("gemini"));
        assert!(message.contains("image_api"));
    }
}
