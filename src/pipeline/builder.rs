//! Pipeline Builder Module
//!
//! Fluent builder assembling an ordered list of async steps into a single
//! immutable [`Pipeline`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{try_join_all, BoxFuture};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{Cache, CacheOptions};
use crate::error::{ChainError, Result};
use crate::pipeline::step::{step_fn, Modifier, Recovery, Step, StepFn, StepFuture, StepKind};
use crate::retry::RetryOptions;

/// Pipeline-wide error handler. Its result becomes the run's result.
pub type ErrorHandler = Arc<dyn Fn(ChainError) -> StepFuture + Send + Sync>;

/// Pipeline-wide cleanup action run after every invocation.
pub type Finalizer = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

type Predicate = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<bool>> + Send + Sync>;

// == Condition ==
/// Branch selector: a fixed flag or a predicate over the current input.
#[derive(Clone)]
pub enum Condition {
    Fixed(bool),
    Predicate(Predicate),
}

impl Condition {
    /// Synchronous predicate.
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Condition::Predicate(Arc::new(move |input| {
            let outcome = predicate(&input);
            Box::pin(async move { Ok(outcome) })
        }))
    }

    /// Asynchronous, fallible predicate.
    pub fn when_async<F, Fut>(predicate: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        Condition::Predicate(Arc::new(move |input| Box::pin(predicate(input))))
    }

    async fn evaluate(&self, input: &Value) -> Result<bool> {
        match self {
            Condition::Fixed(flag) => Ok(*flag),
            Condition::Predicate(predicate) => predicate(input.clone()).await,
        }
    }
}

impl From<bool> for Condition {
    fn from(flag: bool) -> Self {
        Condition::Fixed(flag)
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Fixed(flag) => f.debug_tuple("Fixed").field(flag).finish(),
            Condition::Predicate(_) => f.write_str("Predicate"),
        }
    }
}

/// JSON type name used in mismatch errors.
fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn expect_array(operation: &'static str, input: Value) -> Result<Vec<Value>> {
    match input {
        Value::Array(items) => Ok(items),
        other => Err(ChainError::TypeMismatch {
            operation,
            found: type_name(&other),
        }),
    }
}

// == Pipeline Builder ==
/// Mutable, append-only step list with pipeline-wide error handling.
///
/// Modifier methods (`retry`, `timeout`, `debounce`, `throttle`, `cache`,
/// `catch_error`) wrap the most recently appended step in place;
/// [`wrap`](Self::wrap) targets any step by index. Misuse is reported by [`build`](Self::build).
#[derive(Default, Clone)]
pub struct PipelineBuilder {
    steps: Vec<Step>,
    error_handler: Option<ErrorHandler>,
    finalizer: Option<Finalizer>,
    misuse: Option<ChainError>,
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("steps", &self.steps)
            .field("error_handler", &self.error_handler.is_some())
            .field("finalizer", &self.finalizer.is_some())
            .finish()
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, step: StepFn) -> Self {
        self.steps.push(Step::Plain(step));
        self
    }

    fn record_misuse(&mut self, message: String) {
        self.misuse.get_or_insert(ChainError::Validation(message));
    }

    // == Pipe ==
    /// Appends an async function unmodified.
    pub fn pipe<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.push(step_fn(f))
    }

    // == Branch ==
    /// Appends a step delegating to `if_true` or `if_false`.
    pub fn branch<T, TFut, E, EFut>(
        self,
        condition: impl Into<Condition>,
        if_true: T,
        if_false: E,
    ) -> Self
    where
        T: Fn(Value) -> TFut + Send + Sync + 'static,
        TFut: Future<Output = Result<Value>> + Send + 'static,
        E: Fn(Value) -> EFut + Send + Sync + 'static,
        EFut: Future<Output = Result<Value>> + Send + 'static,
    {
        let condition = Arc::new(condition.into());
        let if_true = step_fn(if_true);
        let if_false = step_fn(if_false);
        self.push(Arc::new(move |input| {
            let condition = condition.clone();
            let if_true = if_true.clone();
            let if_false = if_false.clone();
            Box::pin(async move {
                if condition.evaluate(&input).await? {
                    if_true(input).await
                } else {
                    if_false(input).await
                }
            })
        }))
    }

    // == Map ==
    /// Appends a step applying `f` to every array element concurrently.
    /// Output order follows input order.
    pub fn map<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.push(Arc::new(move |input| {
            let f = f.clone();
            Box::pin(async move {
                let items = expect_array("map", input)?;
                let mapped = try_join_all(items.into_iter().map(|item| f(item))).await?;
                Ok(Value::Array(mapped))
            })
        }))
    }

    // == Filter ==
    /// Appends a step keeping the array elements for which `predicate`
    /// holds. Predicates run concurrently; order is preserved.
    pub fn filter<F, Fut>(self, predicate: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        let predicate = Arc::new(predicate);
        self.push(Arc::new(move |input| {
            let predicate = predicate.clone();
            Box::pin(async move {
                let items = expect_array("filter", input)?;
                let keep =
                    try_join_all(items.iter().map(|item| predicate(item.clone()))).await?;
                let kept = items
                    .into_iter()
                    .zip(keep)
                    .filter_map(|(item, keep)| keep.then_some(item))
                    .collect();
                Ok(Value::Array(kept))
            })
        }))
    }

    // == Parallel ==
    /// Appends a step running every branch on the same input concurrently.
    /// Outputs are collected into an array in branch order; the first
    /// failure fails the step.
    pub fn parallel<I>(self, branches: I) -> Self
    where
        I: IntoIterator<Item = StepFn>,
    {
        let branches: Arc<[StepFn]> = branches.into_iter().collect();
        self.push(Arc::new(move |input| {
            let branches = branches.clone();
            Box::pin(async move {
                let outputs =
                    try_join_all(branches.iter().map(|branch| branch(input.clone()))).await?;
                Ok(Value::Array(outputs))
            })
        }))
    }

    // == Wrap ==
    /// Applies `modifier` around the step at `index`.
    pub fn wrap(mut self, index: usize, modifier: Modifier) -> Self {
        if index >= self.steps.len() {
            let message = format!(
                "Cannot apply {:?} to step {}: pipeline has {} steps",
                modifier.kind(),
                index,
                self.steps.len()
            );
            self.record_misuse(message);
            return self;
        }
        let step = self.steps[index].clone();
        self.steps[index] = step.wrap(modifier);
        self
    }

    fn wrap_last(mut self, modifier: Modifier) -> Self {
        match self.steps.len().checked_sub(1) {
            Some(last) => self.wrap(last, modifier),
            None => {
                let message = format!("{:?} needs a preceding step", modifier.kind());
                self.record_misuse(message);
                self
            }
        }
    }

    /// Retries the last step on failure (never on cancellation).
    pub fn retry(self, options: RetryOptions) -> Self {
        self.wrap_last(Modifier::Retry(options))
    }

    /// Fails the last step with `Timeout` if it runs longer than `limit`.
    pub fn timeout(self, limit: Duration) -> Self {
        self.wrap_last(Modifier::Timeout(limit))
    }

    /// Delays the last step until `quiet` passes without another call.
    pub fn debounce(self, quiet: Duration) -> Self {
        self.wrap_last(Modifier::Debounce(quiet))
    }

    /// Keeps runs of the last step at least `spacing` apart.
    pub fn throttle(self, spacing: Duration) -> Self {
        self.wrap_last(Modifier::Throttle(spacing))
    }

    /// Caches the last step's output keyed by its input. Every built
    /// pipeline gets its own in-memory cache.
    pub fn cache(self, options: CacheOptions) -> Self {
        self.wrap_last(Modifier::Cache(options))
    }

    /// Caches the last step's output in a caller-owned cache.
    pub fn cache_with(self, cache: Arc<Cache<Value>>) -> Self {
        self.wrap_last(Modifier::SharedCache(cache))
    }

    /// Recovers failures of the last step with `handler`, which receives
    /// the error and the step's input. Cancellation is never caught.
    pub fn catch_error<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(ChainError, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.wrap_last(Modifier::CatchError(Recovery::new(handler)))
    }

    // == Error Handling ==
    /// Replaces the pipeline-wide error handler. Without one, errors are
    /// returned unchanged.
    pub fn on_error<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ChainError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.error_handler = Some(Arc::new(move |err| Box::pin(handler(err))));
        self
    }

    /// Replaces the cleanup action run after every invocation.
    pub fn finally<F, Fut>(mut self, finalizer: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.finalizer = Some(Arc::new(move || Box::pin(finalizer())));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Modifier layers of every step, outermost first.
    pub fn layers(&self) -> Vec<Vec<StepKind>> {
        self.steps.iter().map(Step::layers).collect()
    }

    // == Build ==
    /// Compiles the current steps into an independent pipeline. Later
    /// changes to the builder do not affect it.
    pub fn build(&self) -> Result<Pipeline> {
        if let Some(err) = &self.misuse {
            return Err(err.clone());
        }
        let steps = self
            .steps
            .iter()
            .map(Step::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Pipeline {
            steps: steps.into(),
            error_handler: self.error_handler.clone(),
            finalizer: self.finalizer.clone(),
        })
    }
}

// == Finalize Guard ==
/// Holds the finalizer until a run completes; fires it in the background if
/// the run is dropped first.
struct FinalizeGuard(Option<Finalizer>);

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        let Some(finalizer) = self.0.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Pipeline run dropped, finalizing in background");
                handle.spawn(finalizer());
            }
            Err(_) => warn!("Pipeline run dropped outside a runtime, finalizer skipped"),
        }
    }
}

// == Pipeline ==
/// Immutable, cheaply clonable result of [`PipelineBuilder::build`].
#[derive(Clone)]
pub struct Pipeline {
    steps: Arc<[StepFn]>,
    error_handler: Option<ErrorHandler>,
    finalizer: Option<Finalizer>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("steps", &self.steps.len())
            .finish()
    }
}

impl Pipeline {
    // == Run ==
    /// Threads `input` through every step in order, awaiting each before the
    /// next. Failures go to the error handler; the finalizer runs once
    /// afterwards either way.
    ///
    /// A run dropped before it finishes (an outer timeout, say) still gets
    /// its finalizer, spawned onto the current runtime.
    pub async fn run(&self, input: Value) -> Result<Value> {
        let mut guard = FinalizeGuard(self.finalizer.clone());
        let result = match self.run_steps(input).await {
            Ok(output) => Ok(output),
            Err(err) => match &self.error_handler {
                Some(handler) => handler(err).await,
                None => Err(err),
            },
        };
        if let Some(finalizer) = guard.0.take() {
            finalizer().await;
        }
        result
    }

    async fn run_steps(&self, input: Value) -> Result<Value> {
        let mut value = input;
        for (index, step) in self.steps.iter().enumerate() {
            value = step(value).await.map_err(|err| {
                debug!(step = index, error = %err, "Pipeline step failed");
                err
            })?;
        }
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The whole pipeline as a single step, for nesting.
    pub fn into_step(self) -> StepFn {
        Arc::new(move |input| {
            let pipeline = self.clone();
            Box::pin(async move { pipeline.run(input).await })
        })
    }
}
