//! SQLite connection and schema migrations

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;

/// Ordered schema migrations; index + 1 is the `user_version` they bring us to
const MIGRATIONS: &[&str] = &[
    // 1: conversations and pending feedback
    "CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        raw_messages TEXT NOT NULL,
        provider TEXT NOT NULL,
        usage TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        summary TEXT,
        file_last_access TEXT NOT NULL DEFAULT '{}',
        tool_results TEXT,
        background_processes TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_conversations_updated ON conversations(updated_at DESC);

    CREATE TABLE IF NOT EXISTS pending_feedback (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        conversation_id TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_feedback_conversation ON pending_feedback(conversation_id);",
];

/// Shared handle to the strand database. Cloning shares the connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at `path` and run migrations
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        tracing::debug!(path = %path.display(), "Database opened");
        Ok(db)
    }

    /// Private in-memory database (tests, dry runs)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Lock the connection for one or more statements
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn();
        let version: usize = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        for (index, sql) in MIGRATIONS.iter().enumerate().skip(version) {
            conn.execute_batch(sql)
                .with_context(|| format!("Migration {} failed", index + 1))?;
            conn.pragma_update(None, "user_version", index + 1)?;
            tracing::info!(version = index + 1, "Applied database migration");
        }
        Ok(())
    }
}
