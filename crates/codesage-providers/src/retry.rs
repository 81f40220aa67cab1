//! Retry with fixed or exponential backoff for outbound service calls.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use codesage_config::{EmbeddingSettings, LlmSettings};
use tracing::warn;

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Classifies whether an error is worth another attempt.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for anyhow::Error {
    fn is_transient(&self) -> bool {
        true
    }
}

/// How many times to retry and how long to wait between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            exponential: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, exponential: bool) -> Self {
        Self {
            max_retries,
            base_delay,
            exponential,
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, false)
    }

    pub fn from_llm(settings: &LlmSettings) -> Self {
        Self::new(
            settings.max_retries,
            Duration::from_millis(settings.retry_delay_ms),
            settings.exponential_backoff,
        )
    }

    pub fn from_embeddings(settings: &EmbeddingSettings) -> Self {
        Self::new(
            settings.max_retries,
            Duration::from_millis(settings.retry_delay_ms),
            true,
        )
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = if self.exponential {
            self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
        } else {
            self.base_delay
        };
        delay.min(MAX_BACKOFF)
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// policy is exhausted. The last error is returned on failure.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() || attempt >= policy.max_retries => return Err(e),
            Err(e) => {
                let delay = policy.delay_for(attempt);
                attempt += 1;
                warn!(
                    "{} failed ({}), retrying in {:?} (attempt {}/{})",
                    operation, e, delay, attempt, policy.max_retries
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
