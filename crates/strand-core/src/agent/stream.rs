//! Stream processing for the exchange loop.
//!
//! Folds the chunk stream of one provider call into a single response:
//! - Text and thinking are accumulated separately
//! - Tool calls keep their arrival order
//! - Built-in execution results are rendered into the text
//! - Usage snapshots replace each other (providers send running totals)

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::ai::provider::{Chunk, ChunkPart, ChunkStream};
use crate::ai::types::{generate_tool_call_id, render_execution_result, ToolCall, UsageSnapshot};
use crate::error::ProviderError;

/// Result of processing a complete provider stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledResponse {
    pub text: String,
    pub thinking: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<UsageSnapshot>,
}

/// Incremental folder over chunks
#[derive(Debug, Default)]
pub struct StreamAssembler {
    response: AssembledResponse,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: Chunk) {
        if let Some(candidate) = chunk.candidate {
            for part in candidate.parts {
                self.push_part(part);
            }
        }
        if let Some(usage) = chunk.usage {
            self.response.usage = Some(usage);
        }
    }

    fn push_part(&mut self, part: ChunkPart) {
        match part {
            ChunkPart::Text(text) => self.response.text.push_str(&text),
            ChunkPart::Thinking(text) => self.response.thinking.push_str(&text),
            ChunkPart::FunctionCall {
                id,
                name,
                arguments,
            } => {
                let id = id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(generate_tool_call_id);
                self.response.tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments,
                });
            }
            ChunkPart::ExecutionResult { output, outcome } => {
                self.response
                    .text
                    .push_str(&render_execution_result(&output, outcome));
            }
            ChunkPart::Unknown(kind) => {
                tracing::debug!(kind = %kind, "Dropping unrecognized response part");
            }
        }
    }

    pub fn finish(self) -> AssembledResponse {
        self.response
    }
}

/// Drain `stream` into one response.
///
/// The first stream error ends assembly with that error. Cancellation of
/// `cancel` while waiting on the stream yields `ProviderError::canceled()`.
pub async fn assemble_stream(
    mut stream: ChunkStream,
    cancel: &CancellationToken,
) -> Result<AssembledResponse, ProviderError> {
    let mut assembler = StreamAssembler::new();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::canceled()),
            next = stream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => assembler.push(chunk),
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }

    Ok(assembler.finish())
}
