//! Context compaction and short summaries
//!
//! Both run the live transcript through an ephemeral helper thread on the
//! weak model. Compaction replaces the history with the helper's reply;
//! short summaries only read it.

use tokio_util::sync::CancellationToken;

use crate::agent::handler::StringCollector;
use crate::agent::prompts::{
    COMPACT_PROMPT, COMPACT_TRANSCRIPT_HEADER, SHORT_SUMMARY_PROMPT, SUMMARY_TRANSCRIPT_HEADER,
};
use crate::agent::thread::{Thread, ThreadInner};
use crate::ai::types::{to_transcript, Message, TranscriptMessage};
use crate::config::MessageOpt;
use crate::error::ThreadError;

impl Thread {
    /// Replace the history with a single summary message.
    ///
    /// Runs regardless of history length.
    pub async fn compact_context(&self, cancel: &CancellationToken) -> Result<(), ThreadError> {
        let mut inner = self.inner.lock().await;
        self.compact_locked(&mut inner, true, cancel).await
    }

    /// One-sentence label for the conversation; empty on failure
    pub async fn short_summary(&self, cancel: &CancellationToken) -> String {
        let inner = self.inner.lock().await;
        self.short_summary_locked(&inner, cancel).await
    }

    /// Auto-compaction passes `force = false` and skips transcripts of two
    /// entries or fewer.
    pub(crate) async fn compact_locked(
        &self,
        inner: &mut ThreadInner,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<(), ThreadError> {
        let transcript = to_transcript(&inner.messages);
        if !force && transcript.len() <= 2 {
            tracing::debug!(entries = transcript.len(), "Transcript too short to compact");
            return Ok(());
        }

        let helper = self.helper_thread(inner);
        let request = format!(
            "{}{}{}",
            COMPACT_PROMPT,
            COMPACT_TRANSCRIPT_HEADER,
            render_transcript(&transcript)
        );

        let token = cancel.child_token();
        let collector = StringCollector::new();
        let opt = MessageOpt {
            cancel: token.clone(),
            ..MessageOpt::helper()
        };
        // Boxed: send_message reaches this function again through auto-compaction
        let reply = Box::pin(helper.send_message(&request, &collector, opt)).await?;
        inner.usage.aggregate(&helper.usage().await);

        let summary = reply.trim();
        if summary.is_empty() {
            if token.is_cancelled() {
                return Err(ThreadError::Cancelled("compaction interrupted".to_string()));
            }
            return Err(ThreadError::Compaction(
                "helper returned an empty summary".to_string(),
            ));
        }

        let previous = inner.messages.len();
        inner.messages = vec![Message::user(summary)];
        inner.tool_results.clear();
        inner.usage.current_context_window = 0;
        if let Some(state) = &self.state {
            state.clear_file_last_access();
        }

        tracing::info!(
            conversation_id = %inner.conversation_id,
            previous_messages = previous,
            summary_chars = summary.len(),
            "Compacted conversation"
        );
        Ok(())
    }

    pub(crate) async fn short_summary_locked(
        &self,
        inner: &ThreadInner,
        cancel: &CancellationToken,
    ) -> String {
        let transcript = to_transcript(&inner.messages);
        if transcript.is_empty() {
            return String::new();
        }

        let helper = self.helper_thread(inner);
        let request = format!(
            "{}{}{}",
            SHORT_SUMMARY_PROMPT,
            SUMMARY_TRANSCRIPT_HEADER,
            render_transcript(&transcript)
        );
        let opt = MessageOpt {
            cancel: cancel.child_token(),
            ..MessageOpt::helper()
        };

        let collector = StringCollector::new();
        match Box::pin(helper.send_message(&request, &collector, opt)).await {
            Ok(summary) => summary.trim().to_string(),
            Err(e) => {
                tracing::warn!(conversation_id = %inner.conversation_id, error = %e, "Failed to generate short summary");
                String::new()
            }
        }
    }

    /// Weak-model thread with no hooks, no persistence and no system prompt
    fn helper_thread(&self, inner: &ThreadInner) -> Thread {
        let mut config = inner.config.for_helper();
        config.system_prompt = None;

        let mut helper = Thread::new(self.provider.clone(), config);
        helper.state = self.state.clone();
        helper.retry_classifier = self.retry_classifier.clone();
        helper
    }
}

fn render_transcript(transcript: &[TranscriptMessage]) -> String {
    transcript
        .iter()
        .map(|m| format!("\n{}: {}", m.role, m.content))
        .collect()
}
