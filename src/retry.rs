//! Retry Combinator
//!
//! Re-runs a fallible async operation with linearly growing backoff. Used by
//! pipeline steps and by `enhanced_prompt`.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Result;

/// Default number of attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Configuration for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOptions {
    /// Total attempts, including the first; values below 1 count as 1
    pub max_retries: u32,
    /// Base delay; the wait after attempt `n` is `delay * n`
    pub delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryOptions {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Wait after the given 1-based failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.delay.saturating_mul(attempt)
    }

    fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

// == Retry ==
/// Runs `op` until it succeeds or the attempts run out, returning the last
/// error. Cancellation and supersession errors are returned immediately.
pub async fn retry<T, F, Fut>(options: RetryOptions, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = options.attempts();
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => {
                debug!(attempt, error = %err, "Not retrying operation");
                return Err(err);
            }
            Err(err) if attempt >= attempts => {
                warn!(attempts, error = %err, "Retries exhausted");
                return Err(err);
            }
            Err(err) => {
                let wait = options.backoff(attempt);
                debug!(attempt, ?wait, error = %err, "Attempt failed, retrying");
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}
