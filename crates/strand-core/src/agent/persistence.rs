//! Conversation save and resume

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::agent::thread::{Thread, ThreadInner};
use crate::ai::types::Message;
use crate::error::ThreadError;
use crate::storage::ConversationRecord;

impl Thread {
    /// Write the conversation to the store.
    ///
    /// No-op when persistence is off or no store is configured. With
    /// `summarize`, a fresh short summary is generated first.
    pub async fn save_conversation(
        &self,
        summarize: bool,
        cancel: &CancellationToken,
    ) -> Result<(), ThreadError> {
        let mut inner = self.inner.lock().await;
        self.save_locked(&mut inner, summarize, cancel).await
    }

    /// Replace this thread's state with a stored conversation
    pub async fn load_conversation_by_id(&self, id: &str) -> Result<(), ThreadError> {
        let mut inner = self.inner.lock().await;
        let store = self
            .conversation_store
            .as_ref()
            .ok_or_else(|| ThreadError::Config("no conversation store configured".to_string()))?;

        let record = store
            .load(id)
            .await
            .map_err(ThreadError::Persistence)?
            .ok_or_else(|| ThreadError::ConversationNotFound(id.to_string()))?;

        let messages: Vec<Message> = serde_json::from_str(&record.raw_messages)
            .map_err(|e| {
                ThreadError::Persistence(
                    anyhow::Error::new(e).context(format!("Corrupt message history for {}", id)),
                )
            })?;

        inner.conversation_id = record.id;
        inner.messages = messages;
        inner.usage = record.usage;
        inner.tool_results = record.tool_results.unwrap_or_default();
        inner.summary = record.summary;
        inner.created_at = record.created_at;

        let mut reattached = 0usize;
        if let Some(state) = &self.state {
            state.set_file_last_access(record.file_last_access);
            for process in record.background_processes {
                let pid = process.pid;
                match state.background_processes().reattach(process).await {
                    Ok(()) => reattached += 1,
                    Err(e) => tracing::debug!(pid, error = %e, "Dropping background process"),
                }
            }
        }

        tracing::info!(
            conversation_id = %inner.conversation_id,
            messages = inner.messages.len(),
            reattached_processes = reattached,
            "Loaded conversation"
        );
        Ok(())
    }

    pub(crate) async fn save_locked(
        &self,
        inner: &mut ThreadInner,
        summarize: bool,
        cancel: &CancellationToken,
    ) -> Result<(), ThreadError> {
        if !inner.persisted {
            return Ok(());
        }
        let Some(store) = &self.conversation_store else {
            return Ok(());
        };

        if summarize {
            let summary = self.short_summary_locked(inner, cancel).await;
            if !summary.is_empty() {
                inner.summary = Some(summary);
            }
        }

        let raw_messages = serde_json::to_string(&inner.messages)
            .map_err(|e| ThreadError::Persistence(e.into()))?;

        let (file_last_access, background_processes) = match &self.state {
            Some(state) => (
                state.file_last_access(),
                state.background_processes().running().await,
            ),
            None => Default::default(),
        };

        let record = ConversationRecord {
            id: inner.conversation_id.clone(),
            raw_messages,
            provider: self.provider.name().to_string(),
            usage: inner.usage.clone(),
            metadata: serde_json::json!({ "model": inner.config.model }),
            summary: inner.summary.clone(),
            file_last_access,
            tool_results: Some(inner.tool_results.clone()),
            background_processes,
            created_at: inner.created_at,
            updated_at: Utc::now(),
        };

        store
            .save(&record)
            .await
            .map_err(ThreadError::Persistence)?;
        tracing::info!(conversation_id = %record.id, summarize, "Saved conversation");
        Ok(())
    }
}
