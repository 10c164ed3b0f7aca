//! AI provider layer
//!
//! Canonical message types, the provider adapter seam, tool schema
//! translation, retry, and image attachments.

pub mod images;
pub mod provider;
pub mod retry;
pub mod schema;
pub mod types;

pub use provider::{
    Candidate, Chunk, ChunkPart, ChunkStream, GenerationConfig, Prompt, ProviderAdapter,
    ThinkingConfig,
};
