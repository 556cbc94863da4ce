//! Prompt wrappers around a [`Generator`].

use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::Cache;
use crate::error::{ChainError, Result};
use crate::generation::{Completion, Generator, PromptInput, StreamChunk};
use crate::pipeline::StepFn;
use crate::progress::ProgressTracker;
use crate::retry::{retry, RetryOptions};
use crate::tokens::TokenCounter;

fn wrap_failure(context: &str, err: ChainError) -> ChainError {
    match err {
        ChainError::Cancelled => ChainError::Cancelled,
        other => ChainError::Generation(format!("{}: {}", context, other)),
    }
}

// == Prompt ==
/// Runs one non-streaming call, raced against `signal`.
///
/// Cancellation surfaces as [`ChainError::Cancelled`]; anything else as
/// [`ChainError::Generation`].
pub async fn prompt(
    generator: &dyn Generator,
    input: &PromptInput,
    signal: &CancellationToken,
) -> Result<Completion> {
    let text = input.render();
    guarded(signal, generator.invoke(&text, signal)).await
}

/// Races one generator call against `signal`, wrapping non-cancel failures.
pub(super) async fn guarded<F>(signal: &CancellationToken, call: F) -> Result<Completion>
where
    F: Future<Output = Result<Completion>>,
{
    if signal.is_cancelled() {
        return Err(ChainError::Cancelled);
    }
    let outcome = tokio::select! {
        biased;
        _ = signal.cancelled() => Err(ChainError::Cancelled),
        result = call => result,
    };
    outcome.map_err(|err| wrap_failure("Failed to execute prompt", err))
}

// == Stream Prompt ==
/// Starts a streaming call and yields only the new text of each chunk.
///
/// A chunk that extends the previous one is cut down to its suffix; any other
/// chunk is passed through whole. The stream ends after the first error.
pub async fn stream_prompt(
    generator: &dyn Generator,
    input: &PromptInput,
    signal: CancellationToken,
) -> Result<BoxStream<'static, Result<StreamChunk>>> {
    if signal.is_cancelled() {
        return Err(ChainError::Cancelled);
    }
    let chunks = generator
        .invoke_streaming(&input.render(), &signal)
        .await
        .map_err(|err| wrap_failure("Stream failed", err))?;

    let deltas = stream::unfold(
        (chunks, String::new(), signal, false),
        |(mut chunks, previous, signal, done)| async move {
            if done {
                return None;
            }
            let next = tokio::select! {
                biased;
                _ = signal.cancelled() => Some(Err(ChainError::Cancelled)),
                next = chunks.next() => next,
            };
            match next {
                None => None,
                Some(Err(err)) => Some((
                    Err(wrap_failure("Stream failed", err)),
                    (chunks, previous, signal, true),
                )),
                Some(Ok(chunk)) => {
                    let delta = chunk
                        .strip_prefix(previous.as_str())
                        .unwrap_or(chunk.as_str())
                        .to_string();
                    let item = StreamChunk {
                        content: delta,
                        is_partial: true,
                    };
                    Some((Ok(item), (chunks, chunk, signal, false)))
                }
            }
        },
    );

    Ok(deltas.boxed())
}

// == Enhanced Prompt ==
/// Optional extras for [`enhanced_prompt`].
#[derive(Clone, Default)]
pub struct PromptOptions {
    /// Looked up before and filled after the call when `cache_key` is set
    pub cache: Option<Arc<Cache<Completion>>>,
    pub cache_key: Option<String>,
    /// Checked before the call; input and output are tracked after it
    pub token_counter: Option<Arc<TokenCounter>>,
    /// Updated with the tokens used so far (0 without a counter) after the call
    pub progress: Option<Arc<ProgressTracker>>,
    /// Retries the call when set
    pub retry: Option<RetryOptions>,
    pub signal: CancellationToken,
}

/// [`prompt`] with caching, token budgeting, retry and progress reporting.
pub async fn enhanced_prompt(
    generator: &dyn Generator,
    input: &PromptInput,
    options: &PromptOptions,
) -> Result<Completion> {
    let cache = options.cache.as_ref().zip(options.cache_key.as_ref());

    if let Some((cache, key)) = cache {
        if let Some(hit) = cache.get(key).await {
            debug!(key = %key, "Prompt served from cache");
            return Ok(hit);
        }
    }

    let text = input.render();
    if let Some(counter) = &options.token_counter {
        if counter.would_exceed_limit(&text) {
            return Err(ChainError::TokenLimitExceeded {
                requested: counter.estimate(&text),
                remaining: counter.remaining(),
            });
        }
    }

    let signal = &options.signal;
    let completion = match options.retry {
        Some(retry_options) => retry(retry_options, move || prompt(generator, input, signal)).await?,
        None => prompt(generator, input, signal).await?,
    };

    if let Some(counter) = &options.token_counter {
        counter.track(&text);
        counter.track(&completion.content);
    }

    if let Some(tracker) = &options.progress {
        let used = options.token_counter.as_ref().map_or(0, |c| c.used() as u64);
        tracker.update(used);
    }

    if let Some((cache, key)) = cache {
        cache.set(key.clone(), completion.clone()).await;
    }

    Ok(completion)
}

// == Pipeline Step ==
/// A pipeline step sending its input (string or messages) to `generator`
/// and returning the completion text.
pub fn prompt_step(generator: Arc<dyn Generator>, signal: CancellationToken) -> StepFn {
    Arc::new(move |input| {
        let generator = generator.clone();
        let signal = signal.clone();
        Box::pin(async move {
            let input = PromptInput::from_value(&input)?;
            let completion = prompt(generator.as_ref(), &input, &signal).await?;
            Ok(Value::String(completion.content))
        })
    })
}
