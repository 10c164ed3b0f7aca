//! Scripted provider and tool doubles for thread tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::ai::provider::{Chunk, ChunkStream, GenerationConfig, Prompt, ProviderAdapter};
use crate::ai::types::ToolSchema;
use crate::constants;
use crate::error::ProviderError;
use crate::tools::registry::{Tool, ToolContext, ToolResult};

enum Script {
    Chunks(Vec<Chunk>),
    Error(ProviderError),
}

/// Provider that replays queued responses in order and records every request
pub struct MockProvider {
    script: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<(Prompt, GenerationConfig)>>,
    context_window: AtomicU64,
    thinking: AtomicBool,
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            context_window: AtomicU64::new(constants::thread::DEFAULT_CONTEXT_WINDOW),
            thinking: AtomicBool::new(false),
        })
    }

    pub fn with_context_window(self: Arc<Self>, window: u64) -> Arc<Self> {
        self.context_window.store(window, Ordering::SeqCst);
        self
    }

    pub fn with_thinking(self: Arc<Self>) -> Arc<Self> {
        self.thinking.store(true, Ordering::SeqCst);
        self
    }

    /// Queue one streamed response
    pub fn push(&self, chunks: Vec<Chunk>) {
        self.script.lock().push_back(Script::Chunks(chunks));
    }

    pub fn push_text(&self, text: &str) {
        self.push(vec![Chunk::text(text)]);
    }

    /// Queue a failure returned from `stream` itself
    pub fn push_error(&self, error: ProviderError) {
        self.script.lock().push_back(Script::Error(error));
    }

    pub fn requests(&self) -> Vec<(Prompt, GenerationConfig)> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream(
        &self,
        prompt: &Prompt,
        config: &GenerationConfig,
    ) -> Result<ChunkStream, ProviderError> {
        self.requests.lock().push((prompt.clone(), config.clone()));
        match self.script.lock().pop_front() {
            Some(Script::Chunks(chunks)) => {
                Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
            }
            Some(Script::Error(e)) => Err(e),
            None => Err(ProviderError::transport("mock script exhausted")),
        }
    }

    fn context_window(&self, _model: &str) -> u64 {
        self.context_window.load(Ordering::SeqCst)
    }

    fn supports_thinking(&self, _model: &str) -> bool {
        self.thinking.load(Ordering::SeqCst)
    }
}

/// Tool that returns a fixed output and remembers its inputs
pub struct RecordingTool {
    name: String,
    output: String,
    calls: Mutex<Vec<Value>>,
}

impl RecordingTool {
    pub fn new(name: &str, output: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            output: output.to_string(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "records its input"
    }

    fn parameters_schema(&self) -> ToolSchema {
        ToolSchema::object()
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> ToolResult {
        self.calls.lock().push(params);
        ToolResult::success(self.output.clone())
    }
}
