//! Conversation snapshots

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::database::Database;
use crate::ai::types::UsageStats;
use crate::process::BackgroundProcess;
use crate::tools::registry::StructuredToolResult;

/// Persisted form of a thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    /// Serialized message history; only the thread interprets it
    pub raw_messages: String,
    pub provider: String,
    pub usage: UsageStats,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub file_last_access: HashMap<String, DateTime<Utc>>,
    /// Absent in older snapshots
    #[serde(default)]
    pub tool_results: Option<HashMap<String, StructuredToolResult>>,
    #[serde(default)]
    pub background_processes: Vec<BackgroundProcess>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub summary: Option<String>,
    pub provider: String,
    pub message_count: Option<usize>,
    pub usage: UsageStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Insert or replace a conversation
    async fn save(&self, record: &ConversationRecord) -> Result<()>;

    /// `Ok(None)` when no conversation has this id
    async fn load(&self, id: &str) -> Result<Option<ConversationRecord>>;

    /// Most recently updated first
    async fn list(&self, limit: usize) -> Result<Vec<ConversationSummary>>;

    /// Returns whether anything was deleted
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// `ConversationStore` over the strand SQLite database
pub struct SqliteConversationStore {
    db: Database,
}

impl SqliteConversationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn map_record_row(row: &rusqlite::Row) -> rusqlite::Result<RawRecord> {
        Ok(RawRecord {
            id: row.get(0)?,
            raw_messages: row.get(1)?,
            provider: row.get(2)?,
            usage: row.get(3)?,
            metadata: row.get(4)?,
            summary: row.get(5)?,
            file_last_access: row.get(6)?,
            tool_results: row.get(7)?,
            background_processes: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

/// Row as stored, before JSON columns are decoded
struct RawRecord {
    id: String,
    raw_messages: String,
    provider: String,
    usage: String,
    metadata: String,
    summary: Option<String>,
    file_last_access: String,
    tool_results: Option<String>,
    background_processes: String,
    created_at: String,
    updated_at: String,
}

impl RawRecord {
    fn decode(self) -> Result<ConversationRecord> {
        let id = self.id;
        let ctx = |field: &str| format!("Corrupt {} for conversation {}", field, id);

        Ok(ConversationRecord {
            usage: serde_json::from_str(&self.usage).with_context(|| ctx("usage"))?,
            metadata: serde_json::from_str(&self.metadata).with_context(|| ctx("metadata"))?,
            file_last_access: serde_json::from_str(&self.file_last_access)
                .with_context(|| ctx("file_last_access"))?,
            tool_results: self
                .tool_results
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .with_context(|| ctx("tool_results"))?,
            background_processes: serde_json::from_str(&self.background_processes)
                .with_context(|| ctx("background_processes"))?,
            created_at: parse_timestamp(&self.created_at).with_context(|| ctx("created_at"))?,
            updated_at: parse_timestamp(&self.updated_at).with_context(|| ctx("updated_at"))?,
            raw_messages: self.raw_messages,
            provider: self.provider,
            summary: self.summary,
            id,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn save(&self, record: &ConversationRecord) -> Result<()> {
        let usage = serde_json::to_string(&record.usage)?;
        let metadata = serde_json::to_string(&record.metadata)?;
        let file_last_access = serde_json::to_string(&record.file_last_access)?;
        let tool_results = record
            .tool_results
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let processes = serde_json::to_string(&record.background_processes)?;

        // Upsert keeps the original created_at
        self.db
            .conn()
            .execute(
                "INSERT INTO conversations (id, raw_messages, provider, usage, metadata, summary,
                     file_last_access, tool_results, background_processes, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                     raw_messages = excluded.raw_messages,
                     provider = excluded.provider,
                     usage = excluded.usage,
                     metadata = excluded.metadata,
                     summary = COALESCE(excluded.summary, conversations.summary),
                     file_last_access = excluded.file_last_access,
                     tool_results = excluded.tool_results,
                     background_processes = excluded.background_processes,
                     updated_at = excluded.updated_at",
                params![
                    record.id,
                    record.raw_messages,
                    record.provider,
                    usage,
                    metadata,
                    record.summary,
                    file_last_access,
                    tool_results,
                    processes,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| format!("Failed to save conversation {}", record.id))?;

        tracing::debug!(conversation_id = %record.id, "Conversation saved");
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<ConversationRecord>> {
        let raw = self
            .db
            .conn()
            .query_row(
                "SELECT id, raw_messages, provider, usage, metadata, summary, file_last_access,
                        tool_results, background_processes, created_at, updated_at
                 FROM conversations WHERE id = ?1",
                params![id],
                Self::map_record_row,
            )
            .optional()
            .with_context(|| format!("Failed to load conversation {}", id))?;

        raw.map(RawRecord::decode).transpose()
    }

    async fn list(&self, limit: usize) -> Result<Vec<ConversationSummary>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, summary, provider, json_array_length(raw_messages), usage,
                    created_at, updated_at
             FROM conversations ORDER BY updated_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<i64>>(3).unwrap_or(None),
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(id, summary, provider, count, usage, created_at, updated_at)| {
                    Ok(ConversationSummary {
                        usage: serde_json::from_str(&usage).unwrap_or_default(),
                        message_count: count.map(|c| c as usize),
                        created_at: parse_timestamp(&created_at)?,
                        updated_at: parse_timestamp(&updated_at)?,
                        id,
                        summary,
                        provider,
                    })
                },
            )
            .collect()
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let deleted = self
            .db
            .conn()
            .execute("DELETE FROM conversations WHERE id = ?1", params![id])
            .with_context(|| format!("Failed to delete conversation {}", id))?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(id: &str, at: DateTime<Utc>) -> ConversationRecord {
        ConversationRecord {
            id: id.to_string(),
            raw_messages: r#"[{"role":"user","parts":[{"type":"text","text":"hi"}]}]"#.into(),
            provider: "mock".into(),
            usage: UsageStats {
                input_tokens: 12,
                ..Default::default()
            },
            metadata: serde_json::json!({"model": "m"}),
            summary: None,
            file_last_access: HashMap::new(),
            tool_results: None,
            background_processes: Vec::new(),
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn save_load_roundtrip() {
        let store = SqliteConversationStore::new(Database::in_memory().unwrap());
        let mut rec = record("c1", Utc::now());
        rec.tool_results = Some(HashMap::from([(
            "call_1".to_string(),
            crate::tools::ToolResult::success("ok").structured("read"),
        )]));
        rec.file_last_access.insert("src/main.rs".into(), Utc::now());

        store.save(&rec).await.unwrap();
        let loaded = store.load("c1").await.unwrap().unwrap();

        assert_eq!(loaded.raw_messages, rec.raw_messages);
        assert_eq!(loaded.usage, rec.usage);
        assert_eq!(loaded.tool_results, rec.tool_results);
        assert_eq!(loaded.file_last_access.len(), 1);
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_preserves_created_at_and_summary() {
        let store = SqliteConversationStore::new(Database::in_memory().unwrap());
        let created = Utc::now() - Duration::hours(1);

        let mut first = record("c1", created);
        first.summary = Some("Fix the parser".into());
        store.save(&first).await.unwrap();

        let mut second = record("c1", Utc::now());
        second.raw_messages = "[]".into();
        store.save(&second).await.unwrap();

        let loaded = store.load("c1").await.unwrap().unwrap();
        assert_eq!(loaded.created_at.timestamp(), created.timestamp());
        assert_eq!(loaded.raw_messages, "[]");
        assert_eq!(loaded.summary.as_deref(), Some("Fix the parser"));
    }

    #[tokio::test]
    async fn list_orders_by_update_and_delete() {
        let store = SqliteConversationStore::new(Database::in_memory().unwrap());
        let now = Utc::now();
        store.save(&record("old", now - Duration::minutes(5))).await.unwrap();
        store.save(&record("new", now)).await.unwrap();

        let listed = store.list(10).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(listed[0].message_count, Some(1));
        assert_eq!(store.list(1).await.unwrap().len(), 1);

        assert!(store.delete("old").await.unwrap());
        assert!(!store.delete("old").await.unwrap());
        assert_eq!(store.list(10).await.unwrap().len(), 1);
    }
}
