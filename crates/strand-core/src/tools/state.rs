//! Session state shared between a thread, its tools and its helper threads

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::process::ProcessRegistry;
use crate::tools::registry::ToolRegistry;

/// Tool registry, file-access timestamps and background processes of one
/// conversation. Sub-agents and the compaction helper share the same `Arc`.
pub struct SessionState {
    working_dir: PathBuf,
    tools: Arc<ToolRegistry>,
    file_last_access: RwLock<HashMap<String, DateTime<Utc>>>,
    processes: ProcessRegistry,
}

impl SessionState {
    pub fn new(working_dir: impl Into<PathBuf>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            working_dir: working_dir.into(),
            tools,
            file_last_access: RwLock::new(HashMap::new()),
            processes: ProcessRegistry::new(),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn background_processes(&self) -> &ProcessRegistry {
        &self.processes
    }

    /// Record that a tool just read `path`
    pub fn set_file_last_accessed(&self, path: impl Into<String>) {
        self.file_last_access.write().insert(path.into(), Utc::now());
    }

    pub fn file_last_accessed(&self, path: &str) -> Option<DateTime<Utc>> {
        self.file_last_access.read().get(path).copied()
    }

    /// Snapshot of all recorded accesses
    pub fn file_last_access(&self) -> HashMap<String, DateTime<Utc>> {
        self.file_last_access.read().clone()
    }

    /// Replace the access map wholesale (conversation load)
    pub fn set_file_last_access(&self, access: HashMap<String, DateTime<Utc>>) {
        *self.file_last_access.write() = access;
    }

    /// Forget all accesses. Tools re-read files after compaction.
    pub fn clear_file_last_access(&self) {
        self.file_last_access.write().clear();
    }
}
