//! Subcommand implementations

use std::path::Path;

use anyhow::{bail, Context as _, Result};
use strand_core::ai::types::{to_transcript, Message};
use strand_core::storage::{ConversationStore, Database, FeedbackStore};
use strand_core::{SqliteConversationStore, SqliteFeedbackStore};

pub struct Context {
    conversations: SqliteConversationStore,
    feedback: SqliteFeedbackStore,
}

impl Context {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::new(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Opened database");
        Ok(Self {
            conversations: SqliteConversationStore::new(db.clone()),
            feedback: SqliteFeedbackStore::new(db),
        })
    }

    pub async fn list(&self, limit: usize) -> Result<()> {
        let conversations = self.conversations.list(limit).await?;
        if conversations.is_empty() {
            println!("No conversations");
            return Ok(());
        }

        for conv in conversations {
            let messages = conv
                .message_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_string());
            println!(
                "{}  {}  {:>4} msgs  {:>8} tok  ${:.4}  {}",
                conv.id,
                conv.updated_at.format("%Y-%m-%d %H:%M"),
                messages,
                conv.usage.total_tokens(),
                conv.usage.total_cost(),
                conv.summary.as_deref().unwrap_or("(no summary)")
            );
        }
        Ok(())
    }

    pub async fn show(&self, id: &str) -> Result<()> {
        let Some(record) = self.conversations.load(id).await? else {
            bail!("Conversation not found: {}", id);
        };
        let messages: Vec<Message> = serde_json::from_str(&record.raw_messages)
            .with_context(|| format!("Corrupt message history for {}", id))?;

        if let Some(summary) = &record.summary {
            println!("# {}", summary);
        }
        println!(
            "provider: {}  created: {}  tokens: {}",
            record.provider,
            record.created_at.to_rfc3339(),
            record.usage.total_tokens()
        );
        for entry in to_transcript(&messages) {
            println!("\n[{}]\n{}", entry.role, entry.content);
        }
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        if !self.conversations.delete(id).await? {
            bail!("Conversation not found: {}", id);
        }
        tracing::info!(conversation_id = %id, "Deleted conversation");
        println!("Deleted {}", id);
        Ok(())
    }

    pub async fn feedback(&self, conversation_id: &str, message: &str) -> Result<()> {
        if message.trim().is_empty() {
            bail!("Feedback message is empty");
        }
        self.feedback.write_feedback(conversation_id, message).await?;
        tracing::info!(conversation_id = %conversation_id, "Queued feedback");
        println!("Feedback queued for {}", conversation_id);
        Ok(())
    }
}
