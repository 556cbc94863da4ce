//! Generation Module
//!
//! Interface to the external, slow and non-deterministic generation service,
//! plus the thin wrappers the rest of the crate calls it through.

mod json;
mod prompt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{ChainError, Result};

pub use json::JsonOutput;
pub use prompt::{enhanced_prompt, prompt, prompt_step, stream_prompt, PromptOptions};

/// Raw chunks produced by a streaming call. Each chunk may be either the
/// cumulative text so far or an incremental piece.
pub type ChunkStream = BoxStream<'static, Result<String>>;

// == Message ==
/// One chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Renders messages as `role: content` lines.
pub fn format_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

// == Prompt Input ==
/// Plain text or an ordered list of chat messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptInput {
    Text(String),
    Messages(Vec<Message>),
}

impl PromptInput {
    /// Text sent to the generator.
    pub fn render(&self) -> String {
        match self {
            PromptInput::Text(text) => text.clone(),
            PromptInput::Messages(messages) => format_messages(messages),
        }
    }

    /// Accepts a string, or an array of `[role, content]` pairs or
    /// `{role, content}` objects.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(text) => Ok(PromptInput::Text(text.clone())),
            Value::Array(items) => items
                .iter()
                .map(message_from_value)
                .collect::<Result<Vec<_>>>()
                .map(PromptInput::Messages),
            _ => Err(ChainError::validation(
                "Prompt input must be a string or a list of messages",
            )),
        }
    }
}

fn message_from_value(value: &Value) -> Result<Message> {
    let pair = match value {
        Value::Array(pair) if pair.len() == 2 => (pair[0].as_str(), pair[1].as_str()),
        Value::Object(obj) => (
            obj.get("role").and_then(Value::as_str),
            obj.get("content").and_then(Value::as_str),
        ),
        _ => (None, None),
    };
    match pair {
        (Some(role), Some(content)) => Ok(Message::new(role, content)),
        _ => Err(ChainError::validation(format!(
            "Invalid message: {}",
            value
        ))),
    }
}

impl From<&str> for PromptInput {
    fn from(text: &str) -> Self {
        PromptInput::Text(text.to_string())
    }
}

impl From<String> for PromptInput {
    fn from(text: String) -> Self {
        PromptInput::Text(text)
    }
}

impl From<Vec<Message>> for PromptInput {
    fn from(messages: Vec<Message>) -> Self {
        PromptInput::Messages(messages)
    }
}

// == Completion ==
/// Token accounting reported by the generator, when it has any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub tokens_so_far: Option<u64>,
    pub max_tokens: Option<u64>,
    pub tokens_left: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// Result of a non-streaming call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub metadata: GenerationMetadata,
}

impl Completion {
    /// Completion stamped now, without token accounting.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: GenerationMetadata {
                tokens_so_far: None,
                max_tokens: None,
                tokens_left: None,
                created_at: Utc::now(),
            },
        }
    }
}

/// Incremental piece of a streamed answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    pub content: String,
    pub is_partial: bool,
}

// == Generator ==
/// The host-provided generation service, injected wherever it is needed.
///
/// Implementations should return [`ChainError::Cancelled`] when `signal`
/// fires; callers also race every call against the signal.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn invoke(&self, prompt: &str, signal: &CancellationToken) -> Result<Completion>;

    async fn invoke_streaming(
        &self,
        prompt: &str,
        signal: &CancellationToken,
    ) -> Result<ChunkStream>;

    /// JSON-mode call, constrained by `schema` when given. Services without
    /// a JSON mode fall back to a plain [`invoke`](Self::invoke).
    async fn invoke_json(
        &self,
        prompt: &str,
        schema: Option<&Value>,
        signal: &CancellationToken,
    ) -> Result<Completion> {
        let _ = schema;
        self.invoke(prompt, signal).await
    }
}
