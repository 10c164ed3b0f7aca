//! Strand core library
//!
//! Conversation threads for an AI coding agent: the exchange loop, tool
//! dispatch with hook gating, streaming assembly, retry, context compaction
//! and SQLite persistence.

pub mod agent;
pub mod ai;
pub mod config;
pub mod constants;
pub mod error;
pub mod paths;
pub mod process;
pub mod storage;
pub mod tools;

pub use agent::{MessageHandler, Thread};
pub use config::{MessageOpt, StrandConfig, ThreadConfig};
pub use error::{ProviderError, ThreadError};
pub use storage::{Database, SqliteConversationStore, SqliteFeedbackStore};
pub use tools::{SessionState, Tool, ToolRegistry};
