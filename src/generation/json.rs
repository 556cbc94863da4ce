//! JSON output adapter.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ChainError, Result};
use crate::generation::prompt::guarded;
use crate::generation::{Generator, PromptInput};
use crate::pipeline::StepFn;

/// Wraps a generator so prompts run in JSON mode and come back parsed.
#[derive(Clone)]
pub struct JsonOutput {
    generator: Arc<dyn Generator>,
    schema: Option<Value>,
}

impl JsonOutput {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            schema: None,
        }
    }

    /// Output schema forwarded with every call.
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn schema(&self) -> Option<&Value> {
        self.schema.as_ref()
    }

    /// Sends `input` and parses the answer as JSON.
    ///
    /// An answer that is not valid JSON fails with [`ChainError::Generation`].
    pub async fn prompt(&self, input: &PromptInput, signal: &CancellationToken) -> Result<Value> {
        let text = input.render();
        let completion = guarded(
            signal,
            self.generator.invoke_json(&text, self.schema.as_ref(), signal),
        )
        .await?;
        serde_json::from_str(&completion.content).map_err(|e| {
            debug!(error = %e, "Generator returned invalid JSON");
            ChainError::Generation(format!("Invalid JSON output: {}", e))
        })
    }

    /// A pipeline step sending its input to the generator and returning the
    /// parsed JSON answer.
    pub fn into_step(self, signal: CancellationToken) -> StepFn {
        let adapter = Arc::new(self);
        Arc::new(move |input| {
            let adapter = adapter.clone();
            let signal = signal.clone();
            Box::pin(async move {
                let input = PromptInput::from_value(&input)?;
                adapter.prompt(&input, &signal).await
            })
        })
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{ChunkStream, Completion};
    use crate::pipeline::PipelineBuilder;
    use async_trait::async_trait;
    use futures::stream::{self, StreamExt};
    use serde_json::json;
    use std::sync::Mutex;

    /// Answers with a fixed body and records the schema of JSON-mode calls.
    struct FixedGenerator {
        answer: String,
        schemas: Mutex<Vec<Option<Value>>>,
    }

    impl FixedGenerator {
        fn new(answer: &str) -> Self {
            Self {
                answer: answer.to_string(),
                schemas: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Generator for FixedGenerator {
        async fn invoke(&self, _prompt: &str, _signal: &CancellationToken) -> Result<Completion> {
            Ok(Completion::new(self.answer.clone()))
        }

        async fn invoke_streaming(
            &self,
            _prompt: &str,
            _signal: &CancellationToken,
        ) -> Result<ChunkStream> {
            Ok(stream::empty().boxed())
        }

        async fn invoke_json(
            &self,
            prompt: &str,
            schema: Option<&Value>,
            signal: &CancellationToken,
        ) -> Result<Completion> {
            self.schemas.lock().unwrap().push(schema.cloned());
            self.invoke(prompt, signal).await
        }
    }

    /// Relies on the default JSON-mode fallback.
    struct PlainGenerator;

    #[async_trait]
    impl Generator for PlainGenerator {
        async fn invoke(&self, _prompt: &str, _signal: &CancellationToken) -> Result<Completion> {
            Ok(Completion::new(r#"{"ok": true}"#))
        }

        async fn invoke_streaming(
            &self,
            _prompt: &str,
            _signal: &CancellationToken,
        ) -> Result<ChunkStream> {
            Ok(stream::empty().boxed())
        }
    }

    #[tokio::test]
    async fn test_parses_answer_and_forwards_schema() {
        let generator = Arc::new(FixedGenerator::new(r#"{"name": "Ada", "age": 36}"#));
        let schema = json!({"type": "object"});
        let adapter = JsonOutput::new(generator.clone()).with_schema(schema.clone());

        let value = adapter
            .prompt(&"who?".into(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(value, json!({"name": "Ada", "age": 36}));
        assert_eq!(*generator.schemas.lock().unwrap(), vec![Some(schema)]);
    }

    #[tokio::test]
    async fn test_invalid_json_is_a_generation_error() {
        let adapter = JsonOutput::new(Arc::new(FixedGenerator::new("not json")));
        let result = adapter.prompt(&"x".into(), &CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(ChainError::Generation(msg)) if msg.starts_with("Invalid JSON output")
        ));
    }

    #[tokio::test]
    async fn test_cancelled_signal_skips_call() {
        let signal = CancellationToken::new();
        signal.cancel();
        let adapter = JsonOutput::new(Arc::new(PlainGenerator));
        assert_eq!(
            adapter.prompt(&"x".into(), &signal).await,
            Err(ChainError::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_json_step_in_pipeline() {
        let step = JsonOutput::new(Arc::new(PlainGenerator)).into_step(CancellationToken::new());
        let pipeline = PipelineBuilder::new()
            .pipe(move |v| step(v))
            .build()
            .unwrap();

        assert_eq!(pipeline.run(json!("go")).await, Ok(json!({"ok": true})));
    }
}
