//! Conversation threads
//!
//! ## Exchange loop
//! - `Thread` - Owns one conversation and drives turns against a provider
//! - `MessageHandler` - Receives streamed text, thinking and tool activity
//! - `StreamAssembler` - Folds response chunks into one assistant turn
//!
//! ## Tools and hooks
//! - Tool calls are dispatched sequentially, gated by `HookTrigger`
//! - `ShellHookTrigger` - User-configured hook commands from config
//!
//! ## Context
//! - Auto-compaction replaces history with a summary near the window limit
//! - Short summaries label persisted conversations
//! - Save/resume through a `ConversationStore`

mod compactor;
mod executor;
pub mod handler;
pub mod hooks;
mod persistence;
pub mod prompts;
pub mod stream;
#[cfg(test)]
pub(crate) mod testing;
pub mod thread;
pub mod user_hooks;

pub use handler::{MessageHandler, NoopHandler, StringCollector};
pub use hooks::{
    HookContext, HookResult, HookRunner, HookTrigger, InvokedBy, NoopHooks, PreToolDecision,
};
pub use stream::{assemble_stream, AssembledResponse, StreamAssembler};
pub use thread::{estimate_context_window, should_auto_compact, RetryClassifier, Thread};
pub use user_hooks::{
    HooksConfig, ShellHookTrigger, UserHook, UserHookExecutor, UserHookResult, UserHookType,
};
