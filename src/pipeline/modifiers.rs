//! Step Modifiers
//!
//! Wrappers that attach retry, timeout, debounce, throttle, caching and
//! error recovery to a compiled step. Each call allocates its own state.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::error::ChainError;
use crate::pipeline::step::{Recovery, StepFn};
use crate::retry::{retry, RetryOptions};

/// Deterministic cache key for a step input.
///
/// Object keys serialize in sorted order, so equal values give equal keys.
pub fn cache_key(input: &Value) -> String {
    input.to_string()
}

// == Retry ==
pub fn retrying(inner: StepFn, options: RetryOptions) -> StepFn {
    Arc::new(move |input| {
        let inner = inner.clone();
        Box::pin(async move { retry(options, || inner(input.clone())).await })
    })
}

// == Timeout ==
/// Races the step against a timer.
pub fn timed(inner: StepFn, limit: Duration) -> StepFn {
    Arc::new(move |input| {
        let run = inner(input);
        Box::pin(async move {
            match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(?limit, "Step timed out");
                    Err(ChainError::Timeout(limit))
                }
            }
        })
    })
}

// == Debounce ==
/// Runs the step only after `quiet` has passed without another call.
///
/// A call made while an earlier one is still waiting supersedes it: the
/// earlier call fails with [`ChainError::Superseded`] right away.
pub fn debounced(inner: StepFn, quiet: Duration) -> StepFn {
    let pending: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));
    Arc::new(move |input| {
        let token = CancellationToken::new();
        let previous = pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        let inner = inner.clone();
        Box::pin(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Debounced call superseded");
                    Err(ChainError::Superseded)
                }
                _ = tokio::time::sleep(quiet) => inner(input).await,
            }
        })
    })
}

// == Throttle ==
/// Keeps consecutive runs at least `spacing` apart, delaying (never
/// dropping) calls that arrive too early.
pub fn throttled(inner: StepFn, spacing: Duration) -> StepFn {
    let last_run: Arc<tokio::sync::Mutex<Option<Instant>>> =
        Arc::new(tokio::sync::Mutex::new(None));
    Arc::new(move |input| {
        let inner = inner.clone();
        let last_run = last_run.clone();
        Box::pin(async move {
            {
                let mut last = last_run.lock().await;
                if let Some(previous) = *last {
                    let elapsed = previous.elapsed();
                    if elapsed < spacing {
                        let wait = spacing - elapsed;
                        debug!(?wait, "Throttling step");
                        tokio::time::sleep(wait).await;
                    }
                }
                *last = Some(Instant::now());
            }
            inner(input).await
        })
    })
}

// == Cache ==
/// Serves repeated inputs from `cache`, storing fresh outputs.
pub fn cached(inner: StepFn, cache: Arc<Cache<Value>>) -> StepFn {
    Arc::new(move |input| {
        let inner = inner.clone();
        let cache = cache.clone();
        Box::pin(async move {
            let key = cache_key(&input);
            if let Some(hit) = cache.get(&key).await {
                debug!(namespace = cache.namespace(), "Step served from cache");
                return Ok(hit);
            }
            let output = inner(input).await?;
            cache.set(key, output.clone()).await;
            Ok(output)
        })
    })
}

// == Catch Error ==
/// Hands a failure of the step, with the input that caused it, to
/// `recovery`. Cancellation passes through untouched.
pub fn recovering(inner: StepFn, recovery: Recovery) -> StepFn {
    Arc::new(move |input: Value| {
        let inner = inner.clone();
        let recovery = recovery.clone();
        Box::pin(async move {
            match inner(input.clone()).await {
                Err(err) if !err.is_cancelled() => {
                    debug!(error = %err, "Recovering failed step");
                    (recovery.0)(err, input).await
                }
                other => other,
            }
        })
    })
}
