//! Pipeline Module
//!
//! Composable asynchronous step chains over `serde_json::Value`, with
//! per-step retry, timeout, debounce, throttle, caching and error recovery.

mod builder;
mod modifiers;
mod step;

pub use builder::{Condition, ErrorHandler, Finalizer, Pipeline, PipelineBuilder};
pub use modifiers::cache_key;
pub use step::{step_fn, Modifier, Recovery, StepFn, StepFuture, StepKind};
