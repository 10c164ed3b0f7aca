//! Pending user feedback
//!
//! Feedback is written out-of-band (e.g. `strand feedback <id> <msg>`) while a
//! conversation is running and drained by the thread at the start of its next
//! `send_message`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::database::Database;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackMessage {
    pub id: i64,
    pub conversation_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn write_feedback(&self, conversation_id: &str, content: &str) -> Result<()>;

    /// Pending messages in the order they were written
    async fn read_pending_feedback(&self, conversation_id: &str) -> Result<Vec<FeedbackMessage>>;

    async fn clear_pending_feedback(&self, conversation_id: &str) -> Result<()>;
}

pub struct SqliteFeedbackStore {
    db: Database,
}

impl SqliteFeedbackStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FeedbackStore for SqliteFeedbackStore {
    async fn write_feedback(&self, conversation_id: &str, content: &str) -> Result<()> {
        self.db
            .conn()
            .execute(
                "INSERT INTO pending_feedback (conversation_id, content, created_at)
                 VALUES (?1, ?2, ?3)",
                params![conversation_id, content, Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("Failed to write feedback for {}", conversation_id))?;
        Ok(())
    }

    async fn read_pending_feedback(&self, conversation_id: &str) -> Result<Vec<FeedbackMessage>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, content, created_at
             FROM pending_feedback WHERE conversation_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![conversation_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, conversation_id, content, created_at)| {
                Ok(FeedbackMessage {
                    id,
                    conversation_id,
                    content,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .context("Corrupt feedback timestamp")?
                        .with_timezone(&Utc),
                })
            })
            .collect()
    }

    async fn clear_pending_feedback(&self, conversation_id: &str) -> Result<()> {
        self.db
            .conn()
            .execute(
                "DELETE FROM pending_feedback WHERE conversation_id = ?1",
                params![conversation_id],
            )
            .with_context(|| format!("Failed to clear feedback for {}", conversation_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_read_clear() {
        let store = SqliteFeedbackStore::new(Database::in_memory().unwrap());
        store.write_feedback("c1", "use tabs").await.unwrap();
        store.write_feedback("c1", "and run fmt").await.unwrap();
        store.write_feedback("c2", "other").await.unwrap();

        let pending = store.read_pending_feedback("c1").await.unwrap();
        let contents: Vec<&str> = pending.iter().map(|f| f.content.as_str()).collect();
        assert_eq!(contents, vec!["use tabs", "and run fmt"]);

        store.clear_pending_feedback("c1").await.unwrap();
        assert!(store.read_pending_feedback("c1").await.unwrap().is_empty());
        assert_eq!(store.read_pending_feedback("c2").await.unwrap().len(), 1);
    }
}
