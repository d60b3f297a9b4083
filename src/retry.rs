//! Retry with exponential backoff and jitter
//!
//! Only transient failures are retried: rate limiting, 502/503/504,
//! timeouts and reset or refused connections. Everything else propagates on
//! the first attempt. The executor wraps a single provider; pairing it with
//! failover is the router's job.

use crate::config::RetrySection;
use crate::llm::provider::LlmError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1000);

const RETRYABLE_MARKERS: [&str; 11] = [
    "429",
    "rate limit",
    "502",
    "503",
    "504",
    "timeout",
    "timed out",
    "econnreset",
    "connection reset",
    "econnrefused",
    "connection refused",
];

/// Backoff schedule and retry budget
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl From<&RetrySection> for RetryPolicy {
    fn from(section: &RetrySection) -> Self {
        Self {
            max_retries: section.max_retries,
            base_delay: Duration::from_millis(section.base_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms),
            max_jitter: Duration::from_millis(section.jitter_ms),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// `base * 2^attempt`, capped at `max_delay`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let exponential = base_ms.saturating_mul(factor);
        Duration::from_millis(exponential.min(self.max_delay.as_millis() as u64))
    }

    /// Capped backoff plus uniform jitter in `[0, max_jitter]`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter_ms = rand::thread_rng().gen_range(0..=self.max_jitter.as_millis() as u64);
        self.backoff(attempt) + Duration::from_millis(jitter_ms)
    }

    /// Run `operation` until it succeeds, fails fatally, or the budget runs out
    ///
    /// `on_retry` is called before each sleep with the attempt number that
    /// failed, its error and the delay about to be taken.
    pub async fn execute<T, F, Fut, R>(
        &self,
        label: &str,
        mut operation: F,
        mut on_retry: R,
    ) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
        R: FnMut(u32, &LlmError, Duration),
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(label, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        label,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retryable failure, backing off"
                    );
                    on_retry(attempt, &e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Whether an error is transient and worth another attempt
pub fn is_retryable(error: &LlmError) -> bool {
    if matches!(
        error,
        LlmError::RateLimitExceeded(_) | LlmError::Timeout(_)
    ) {
        return true;
    }
    is_retryable_message(&error.to_string())
}

/// Message-based classification, for errors that only carry text
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_MARKERS.iter().any(|marker| lower.contains(marker))
}
