//! Pipeline Step Module
//!
//! Steps are kept as a tagged tree: a plain async function, or a modifier
//! wrapping another step. Trees are compiled into callables at build time,
//! so each built pipeline gets its own modifier state.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::cache::{Cache, CacheOptions};
use crate::error::{ChainError, Result};
use crate::pipeline::modifiers;
use crate::retry::RetryOptions;

/// Future returned by every compiled step.
pub type StepFuture = BoxFuture<'static, Result<Value>>;

/// A compiled asynchronous step `input -> output`.
pub type StepFn = Arc<dyn Fn(Value) -> StepFuture + Send + Sync>;

/// Boxes an async closure into a [`StepFn`].
pub fn step_fn<F, Fut>(f: F) -> StepFn
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |input| Box::pin(f(input)))
}

/// Per-step error recovery: receives the error and the step's input.
#[derive(Clone)]
pub struct Recovery(pub(crate) Arc<dyn Fn(ChainError, Value) -> StepFuture + Send + Sync>);

impl Recovery {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(ChainError, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Recovery(Arc::new(move |err, input| Box::pin(handler(err, input))))
    }
}

impl fmt::Debug for Recovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Recovery")
    }
}

// == Modifier ==
/// Behaviour attached to a single step.
#[derive(Debug, Clone)]
pub enum Modifier {
    Retry(RetryOptions),
    Timeout(Duration),
    Debounce(Duration),
    Throttle(Duration),
    /// Fresh in-memory cache per built pipeline
    Cache(CacheOptions),
    /// Caller-owned cache shared by every pipeline built from the builder
    SharedCache(Arc<Cache<Value>>),
    /// Replaces a failure of the step with the handler's result
    CatchError(Recovery),
}

impl Modifier {
    pub fn kind(&self) -> StepKind {
        match self {
            Modifier::Retry(_) => StepKind::Retry,
            Modifier::Timeout(_) => StepKind::Timeout,
            Modifier::Debounce(_) => StepKind::Debounce,
            Modifier::Throttle(_) => StepKind::Throttle,
            Modifier::Cache(_) | Modifier::SharedCache(_) => StepKind::Cache,
            Modifier::CatchError(_) => StepKind::CatchError,
        }
    }
}

/// Outermost tag of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Plain,
    Retry,
    Timeout,
    Debounce,
    Throttle,
    Cache,
    CatchError,
}

// == Step ==
#[derive(Clone)]
pub(crate) enum Step {
    Plain(StepFn),
    Wrapped { modifier: Modifier, inner: Box<Step> },
}

impl Step {
    pub fn wrap(self, modifier: Modifier) -> Self {
        Step::Wrapped {
            modifier,
            inner: Box::new(self),
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            Step::Plain(_) => StepKind::Plain,
            Step::Wrapped { modifier, .. } => modifier.kind(),
        }
    }

    /// Tags from the outermost modifier down to the plain step.
    pub fn layers(&self) -> Vec<StepKind> {
        let mut layers = Vec::new();
        let mut current = self;
        loop {
            layers.push(current.kind());
            match current {
                Step::Plain(_) => return layers,
                Step::Wrapped { inner, .. } => current = inner,
            }
        }
    }

    // == Compile ==
    /// Turns the tree into a callable with freshly allocated modifier state.
    pub fn compile(&self) -> Result<StepFn> {
        match self {
            Step::Plain(f) => Ok(f.clone()),
            Step::Wrapped { modifier, inner } => {
                let inner = inner.compile()?;
                let compiled = match modifier {
                    Modifier::Retry(options) => modifiers::retrying(inner, *options),
                    Modifier::Timeout(limit) => modifiers::timed(inner, *limit),
                    Modifier::Debounce(quiet) => modifiers::debounced(inner, *quiet),
                    Modifier::Throttle(spacing) => modifiers::throttled(inner, *spacing),
                    Modifier::Cache(options) => {
                        modifiers::cached(inner, Arc::new(Cache::new(options.clone())?))
                    }
                    Modifier::SharedCache(cache) => modifiers::cached(inner, cache.clone()),
                    Modifier::CatchError(recovery) => modifiers::recovering(inner, recovery.clone()),
                };
                Ok(compiled)
            }
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.layers()).finish()
    }
}
