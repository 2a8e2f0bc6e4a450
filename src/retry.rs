//! Retry utilities with exponential backoff, shared by the HTTP clients.

use std::time::Duration;

/// Classifies an error for the retry loop.
///
/// Implemented by the error types of the cook, LLM and chat clients so a
/// single retry loop can serve all of them.
pub trait Retryable {
    /// Whether another attempt could succeed (transport errors, 5xx,
    /// timeouts and rate limits; never other 4xx).
    fn is_retryable(&self) -> bool;

    /// Server-provided wait hint (a `Retry-After` header), if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try)
    pub max_retries: u32,
    /// Initial delay before first retry (doubles with each attempt)
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom max retries
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        std::cmp::min(delay, self.max_delay)
    }
}

/// Execute an async operation with retry logic.
///
/// A server wait hint takes precedence over the computed backoff delay.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, label: &str, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_retryable() || attempt == config.max_retries {
                    return Err(e);
                }

                let delay = e
                    .retry_after()
                    .unwrap_or_else(|| config.delay_for_attempt(attempt));
                log::warn!(
                    "{} request failed (attempt {}/{}), retrying in {:?}: {}",
                    label,
                    attempt + 1,
                    config.max_retries + 1,
                    delay,
                    e
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
