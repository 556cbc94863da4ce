//! Chainkit - composable async pipelines with a result cache
//!
//! Provides a TTL cache with pluggable eviction and best-effort persistence,
//! and a pipeline builder whose steps can be retried, timed out, debounced,
//! throttled and cached.

pub mod cache;
pub mod config;
pub mod error;
pub mod generation;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod template;
pub mod tokens;

pub use cache::{Cache, CacheOptions, CacheStats, EvictionPolicy, FileStorage, MemoryStorage};
pub use config::Config;
pub use error::{ChainError, Result};
pub use generation::{Generator, JsonOutput, Message, PromptInput};
pub use pipeline::{Condition, Pipeline, PipelineBuilder};
pub use progress::{Progress, ProgressTracker};
pub use retry::{retry, RetryOptions};
pub use template::{MessageTemplate, SchemaTemplate, Template};
pub use tokens::{estimate_tokens, TokenCounter};
