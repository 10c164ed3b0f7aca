//! Persistence layer
//!
//! SQLite-based storage for:
//! - Conversation snapshots
//! - Pending user feedback

pub mod conversations;
mod database;
pub mod feedback;

pub use conversations::{ConversationRecord, ConversationStore, ConversationSummary, SqliteConversationStore};
pub use database::Database;
pub use feedback::{FeedbackMessage, FeedbackStore, SqliteFeedbackStore};
