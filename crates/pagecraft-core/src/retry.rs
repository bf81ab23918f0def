//! Retry policy: exponential backoff with jitter around any fallible
//! provider call.
//!
//! Call sites invoke the policy explicitly with an operation closure and
//! an error-classification function; there is no implicit decorator-style
//! wrapping.

use crate::error::{ErrorKind, ProviderError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Failure of a retried operation.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// The retry budget was spent; wraps the last cause.
    #[error("giving up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ProviderError },

    /// A fatal classification propagated without retry.
    #[error(transparent)]
    Aborted(ProviderError),
}

impl RetryError {
    /// The underlying provider error.
    pub fn cause(&self) -> &ProviderError {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Aborted(err) => err,
        }
    }
}

/// Backoff parameters for one call site.
///
/// Delay before retrying attempt `n` (0-based) is
/// `min(base_secs^n, max_delay) + uniform(0, jitter_secs)` seconds.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Exponential base, in seconds.
    pub base_secs: f64,
    /// Upper bound of the uniform jitter added to every delay.
    pub jitter_secs: f64,
    /// Cap applied to the exponential term before jitter.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy with one second of jitter and a one minute cap.
    pub fn new(max_attempts: u32, base_secs: f64) -> Self {
        Self {
            max_attempts,
            base_secs,
            jitter_secs: 1.0,
            max_delay: Duration::from_secs(60),
        }
    }

    /// Tighter profile for text/metadata calls: 3 attempts, base 2.
    pub fn text() -> Self {
        Self::new(3, 2.0)
    }

    /// Looser profile for image generation calls: 5 attempts, base 3.
    pub fn image() -> Self {
        Self::new(5, 3.0)
    }

    /// Overrides the jitter bound. Tests set this to zero.
    pub fn with_jitter(mut self, jitter_secs: f64) -> Self {
        self.jitter_secs = jitter_secs;
        self
    }

    /// Overrides the delay cap.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Computes the backoff before retrying the given 0-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = Duration::from_secs_f64(self.base_secs.powi(attempt as i32))
            .min(self.max_delay)
            .as_secs_f64();
        let jitter = if self.jitter_secs > 0.0 {
            rand::thread_rng().gen_range(0.0..self.jitter_secs)
        } else {
            0.0
        };
        Duration::from_secs_f64(backoff + jitter)
    }

    /// Runs `op`, retrying RateLimited/Transient classifications up to
    /// `max_attempts` with exponential backoff. Fatal classifications
    /// propagate immediately. A provider-supplied `Retry-After` hint
    /// overrides the computed delay when present.
    pub async fn run<T, F, Fut, C>(&self, mut op: F, classify: C) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
        C: Fn(&ProviderError) -> ErrorKind,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if classify(&err) == ErrorKind::Fatal {
                        return Err(RetryError::Aborted(err));
                    }
                    if attempt >= self.max_attempts {
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    let delay = err.retry_after().unwrap_or_else(|| self.delay_for(attempt - 1));
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_secs = delay.as_secs_f64(),
                        error = %err,
                        "provider call failed, backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
