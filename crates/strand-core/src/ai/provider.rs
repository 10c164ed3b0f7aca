//! Provider adapter seam
//!
//! A `ProviderAdapter` turns a canonical prompt into a stream of response
//! chunks. The thread loop, retry, compaction and hooks are written once
//! against this trait; each vendor plugs in as its own adapter.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::ai::schema;
use crate::ai::types::{AiTool, ExecutionOutcome, Message, ModelPricing, UsageSnapshot};
use crate::constants;
use crate::error::ProviderError;

/// Reasoning budget requested from models that support it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkingConfig {
    pub budget_tokens: u32,
}

/// Per-request generation settings
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub tools: Vec<AiTool>,
    pub thinking: Option<ThinkingConfig>,
}

/// System prompt plus full history
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Prompt {
    pub system: Option<String>,
    pub messages: Vec<Message>,
}

/// One part of a streamed candidate
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkPart {
    Text(String),
    Thinking(String),
    /// Tool call request. Adapters without native call ids leave `id` empty.
    FunctionCall {
        id: Option<String>,
        name: String,
        arguments: Value,
    },
    /// Output of a provider-side code execution
    ExecutionResult {
        output: String,
        outcome: ExecutionOutcome,
    },
    /// Anything the canonical model has no slot for
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Candidate {
    pub parts: Vec<ChunkPart>,
}

/// One streamed response fragment
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Chunk {
    pub candidate: Option<Candidate>,
    /// Cumulative usage so far; replaces any earlier snapshot
    pub usage: Option<UsageSnapshot>,
}

impl Chunk {
    pub fn parts(parts: Vec<ChunkPart>) -> Self {
        Self {
            candidate: Some(Candidate { parts }),
            usage: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::parts(vec![ChunkPart::Text(text.into())])
    }

    pub fn usage(usage: UsageSnapshot) -> Self {
        Self {
            candidate: None,
            usage: Some(usage),
        }
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, ProviderError>> + Send>>;

/// Vendor-specific translation and transport
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider tag stored with persisted conversations
    fn name(&self) -> &str;

    /// Translate tool declarations to the vendor wire format
    fn translate_tools(&self, tools: &[AiTool]) -> Value {
        schema::translate_tools(tools)
    }

    /// Translate one canonical message to the vendor wire format
    fn convert_message(&self, message: &Message) -> Value {
        match serde_json::to_value(message) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(role = ?message.role, error = %e, "Failed to convert message");
                Value::Null
            }
        }
    }

    /// Start a streaming generation
    async fn stream(
        &self,
        prompt: &Prompt,
        config: &GenerationConfig,
    ) -> Result<ChunkStream, ProviderError>;

    /// Context window of `model` in tokens
    fn context_window(&self, _model: &str) -> u64 {
        constants::thread::DEFAULT_CONTEXT_WINDOW
    }

    fn pricing(&self, _model: &str) -> ModelPricing {
        ModelPricing::default()
    }

    fn supports_thinking(&self, _model: &str) -> bool {
        false
    }
}
