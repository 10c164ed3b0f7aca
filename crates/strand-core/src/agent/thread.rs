//! The exchange loop
//!
//! A `Thread` owns one conversation: its history, usage counters and tool
//! results. `send_message` drives turns against a `ProviderAdapter` until the
//! model stops asking for tools, a hook stops pushing follow-ups, the turn
//! limit is reached, or the caller cancels.
//!
//! Every public operation that touches conversation state holds the thread's
//! lock for its whole duration. Helper threads (compaction, summaries,
//! sub-agents) have their own lock and share only the `SessionState`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agent::executor;
use crate::agent::handler::MessageHandler;
use crate::agent::hooks::{HookContext, HookResult, HookRunner, HookTrigger, InvokedBy, NoopHooks};
use crate::agent::stream::assemble_stream;
use crate::ai::images::resolve_images;
use crate::ai::provider::{GenerationConfig, Prompt, ProviderAdapter, ThinkingConfig};
use crate::ai::retry::{with_retry_if, IsRetryable};
use crate::ai::types::{to_transcript, Message, Part, Role, TranscriptMessage, UsageStats};
use crate::config::{MessageOpt, ThreadConfig};
use crate::constants::thread as limits;
use crate::error::{ProviderError, ThreadError};
use crate::storage::{ConversationStore, FeedbackStore};
use crate::tools::registry::StructuredToolResult;
use crate::tools::state::SessionState;

/// Decides whether a provider error is worth retrying
pub type RetryClassifier = Arc<dyn Fn(&ProviderError) -> bool + Send + Sync>;

/// Mutable conversation state, guarded by `Thread::inner`
pub(crate) struct ThreadInner {
    pub(crate) conversation_id: String,
    pub(crate) config: ThreadConfig,
    pub(crate) messages: Vec<Message>,
    pub(crate) usage: UsageStats,
    pub(crate) tool_results: HashMap<String, StructuredToolResult>,
    pub(crate) persisted: bool,
    pub(crate) summary: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
}

/// Stateful orchestrator for one conversation
pub struct Thread {
    pub(crate) provider: Arc<dyn ProviderAdapter>,
    pub(crate) hooks: Arc<dyn HookTrigger>,
    pub(crate) state: Option<Arc<SessionState>>,
    pub(crate) conversation_store: Option<Arc<dyn ConversationStore>>,
    pub(crate) feedback_store: Option<Arc<dyn FeedbackStore>>,
    pub(crate) retry_classifier: Option<RetryClassifier>,
    pub(crate) inner: Mutex<ThreadInner>,
}

/// Outcome of a single provider round trip
struct Exchange {
    text: String,
    tools_used: bool,
}

impl Thread {
    pub fn new(provider: Arc<dyn ProviderAdapter>, config: ThreadConfig) -> Self {
        Self {
            provider,
            hooks: Arc::new(NoopHooks),
            state: None,
            conversation_store: None,
            feedback_store: None,
            retry_classifier: None,
            inner: Mutex::new(ThreadInner {
                conversation_id: uuid::Uuid::new_v4().to_string(),
                config,
                messages: Vec::new(),
                usage: UsageStats::default(),
                tool_results: HashMap::new(),
                persisted: false,
                summary: None,
                created_at: Utc::now(),
            }),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn HookTrigger>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_state(mut self, state: Arc<SessionState>) -> Self {
        self.state = Some(state);
        self
    }

    /// Attach a store and turn persistence on
    pub fn with_conversation_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.conversation_store = Some(store);
        self.inner.get_mut().persisted = true;
        self
    }

    pub fn with_feedback_store(mut self, store: Arc<dyn FeedbackStore>) -> Self {
        self.feedback_store = Some(store);
        self
    }

    /// Narrow (or widen) which provider errors are retried
    pub fn with_retry_classifier(mut self, classifier: RetryClassifier) -> Self {
        self.retry_classifier = Some(classifier);
        self
    }

    pub fn with_persistence(mut self, persisted: bool) -> Self {
        self.inner.get_mut().persisted = persisted;
        self
    }

    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.inner.get_mut().conversation_id = id.into();
        self
    }

    /// Helper thread sharing this thread's provider, hooks and session state.
    ///
    /// Sub-agents get a fresh conversation id, never persist, never drain
    /// feedback and never signal completion.
    pub fn new_sub_agent(&self, config: ThreadConfig) -> Thread {
        let mut sub = Thread::new(
            self.provider.clone(),
            ThreadConfig {
                is_sub_agent: true,
                ..config
            },
        )
        .with_hooks(self.hooks.clone());
        sub.state = self.state.clone();
        sub.retry_classifier = self.retry_classifier.clone();
        sub
    }

    pub async fn conversation_id(&self) -> String {
        self.inner.lock().await.conversation_id.clone()
    }

    pub async fn config(&self) -> ThreadConfig {
        self.inner.lock().await.config.clone()
    }

    /// Flat `{role, content}` view of the history
    pub async fn messages(&self) -> Vec<TranscriptMessage> {
        to_transcript(&self.inner.lock().await.messages)
    }

    /// History as stored, including thinking and image parts
    pub async fn raw_messages(&self) -> Vec<Message> {
        self.inner.lock().await.messages.clone()
    }

    pub async fn usage(&self) -> UsageStats {
        self.inner.lock().await.usage.clone()
    }

    pub async fn tool_results(&self) -> HashMap<String, StructuredToolResult> {
        self.inner.lock().await.tool_results.clone()
    }

    pub async fn summary(&self) -> Option<String> {
        self.inner.lock().await.summary.clone()
    }

    pub fn state(&self) -> Option<&Arc<SessionState>> {
        self.state.as_ref()
    }

    /// Fold a helper's token counts and costs into this thread
    pub async fn aggregate_subagent_usage(&self, usage: &UsageStats) {
        self.inner.lock().await.usage.aggregate(usage);
    }

    /// Replace `current_context_window` with a size estimate of the history
    pub async fn reestimate_context_window(&self) -> u64 {
        let mut inner = self.inner.lock().await;
        let estimate = estimate_context_window(&to_transcript(&inner.messages));
        inner.usage.current_context_window = estimate;
        estimate
    }

    /// Run one user message through the exchange loop.
    ///
    /// Returns the text of the last completed exchange. Cancelling
    /// `opt.cancel` stops the loop without an error.
    pub async fn send_message(
        &self,
        message: &str,
        handler: &dyn MessageHandler,
        opt: MessageOpt,
    ) -> Result<String, ThreadError> {
        let mut inner = self.inner.lock().await;
        let hooks = self.hook_runner(&inner);
        let is_sub_agent = inner.config.is_sub_agent;

        if !is_sub_agent {
            self.drain_feedback(&mut inner, handler).await;
        }

        if let HookResult::Block { reason } = hooks.user_message_send(message).await {
            tracing::info!(conversation_id = %inner.conversation_id, reason = %reason, "User message blocked by hook");
            return Err(ThreadError::Blocked { reason });
        }

        let mut parts = resolve_images(&opt.images).await;
        parts.push(Part::text(message));
        inner.messages.push(Message::new(Role::User, parts));

        if !opt.disable_auto_compact && should_auto_compact(&inner.usage, opt.compact_ratio) {
            tracing::info!(
                conversation_id = %inner.conversation_id,
                current = inner.usage.current_context_window,
                max = inner.usage.max_context_window,
                "Context window nearly full, compacting"
            );
            if let Err(e) = self.compact_locked(&mut inner, false, &opt.cancel).await {
                tracing::error!(error = %e, "Auto-compaction failed, continuing with full history");
            }
        }

        let max_turns = opt.effective_max_turns();
        let mut turn_count = 0usize;
        let mut final_output = String::new();

        loop {
            if opt.cancel.is_cancelled() {
                tracing::info!(conversation_id = %inner.conversation_id, turn_count, "Exchange loop cancelled by caller");
                break;
            }
            if turn_count >= max_turns {
                tracing::warn!(conversation_id = %inner.conversation_id, max_turns, "Reached max turns, stopping");
                break;
            }

            let exchange = match self.exchange(&mut inner, handler, &opt, &hooks).await {
                Ok(exchange) => exchange,
                Err(e) if opt.cancel.is_cancelled() => {
                    tracing::info!(error = %e, "Exchange interrupted by caller cancellation");
                    break;
                }
                Err(e) => return Err(e),
            };

            turn_count += 1;
            final_output = exchange.text;

            if exchange.tools_used {
                continue;
            }

            let follow_ups = hooks.agent_stop(&to_transcript(&inner.messages)).await;
            if follow_ups.is_empty() {
                break;
            }
            tracing::info!(count = follow_ups.len(), "Stop hook returned follow-up messages");
            for follow_up in follow_ups {
                handler.handle_text(&format!("Hook follow-up: {}", follow_up));
                inner.messages.push(Message::user(follow_up));
            }
        }

        if !opt.no_save_conversation {
            // The caller's token may already have fired; the final save still
            // refreshes the summary.
            self.save_locked(&mut inner, true, &CancellationToken::new()).await?;
        }

        if !is_sub_agent {
            handler.handle_done();
        }

        Ok(final_output)
    }

    /// One provider round trip plus tool dispatch
    async fn exchange(
        &self,
        inner: &mut ThreadInner,
        handler: &dyn MessageHandler,
        opt: &MessageOpt,
        hooks: &HookRunner,
    ) -> Result<Exchange, ThreadError> {
        let model = inner.config.model_for(opt.use_weak_model).to_string();
        let using_weak_model = opt.use_weak_model && !inner.config.weak_model.is_empty();

        let tools = match (&self.state, opt.no_tool_use) {
            (Some(state), false) => state.tools().get_ai_tools().await,
            _ => Vec::new(),
        };

        let budget = inner.config.thinking_budget_tokens;
        let thinking = (!using_weak_model && budget > 0 && self.provider.supports_thinking(&model))
            .then_some(ThinkingConfig {
                budget_tokens: budget,
            });

        let generation = GenerationConfig {
            model: model.clone(),
            temperature: inner.config.temperature,
            max_output_tokens: inner.config.max_tokens_for(opt.use_weak_model),
            tools,
            thinking,
        };
        let prompt = Prompt {
            system: inner.config.system_prompt.clone(),
            messages: inner.messages.clone(),
        };

        let start = Instant::now();
        let provider = &self.provider;
        let prompt = &prompt;
        let generation = &generation;
        let cancel = &opt.cancel;
        let classifier = self.retry_classifier.clone();

        let response = with_retry_if(
            &inner.config.retry,
            cancel,
            |e: &ProviderError| match &classifier {
                Some(classify) => classify(e),
                None => e.is_retryable(),
            },
            || async move {
                let stream = provider.stream(prompt, generation).await?;
                assemble_stream(stream, cancel).await
            },
        )
        .await?;

        if !response.thinking.is_empty() {
            handler.handle_thinking(&response.thinking);
        }
        if !response.text.is_empty() {
            handler.handle_text(&response.text);
        }

        let mut parts = Vec::new();
        if !response.thinking.is_empty() {
            parts.push(Part::thinking(response.thinking.clone()));
        }
        if !response.text.is_empty() {
            parts.push(Part::text(response.text.clone()));
        }
        parts.extend(response.tool_calls.iter().map(|call| call.to_part()));
        if !parts.is_empty() {
            inner.messages.push(Message::new(Role::Assistant, parts));
        }

        if let Some(snapshot) = &response.usage {
            let window = inner
                .config
                .context_window
                .unwrap_or_else(|| self.provider.context_window(&model));
            inner
                .usage
                .apply(snapshot, self.provider.pricing(&model), window);
        }

        let tools_used = !response.tool_calls.is_empty();
        if tools_used {
            let outcome =
                executor::execute_tools(&response.tool_calls, self.state.as_ref(), hooks, handler)
                    .await;
            inner.tool_results.extend(outcome.results);
            if let Some(message) = outcome.message {
                inner.messages.push(message);
            }
        }

        if !inner.config.is_sub_agent && !opt.disable_usage_log {
            tracing::info!(
                model = %model,
                input_tokens = inner.usage.input_tokens,
                output_tokens = inner.usage.output_tokens,
                context_window = inner.usage.current_context_window,
                cost = inner.usage.total_cost(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Exchange complete"
            );
        }

        if !opt.no_save_conversation {
            if let Err(e) = self.save_locked(inner, false, cancel).await {
                tracing::warn!(error = %e, "Intermediate conversation save failed");
            }
        }

        Ok(Exchange {
            text: response.text,
            tools_used,
        })
    }

    /// Append pending out-of-band feedback as user messages
    async fn drain_feedback(&self, inner: &mut ThreadInner, handler: &dyn MessageHandler) {
        let Some(store) = &self.feedback_store else {
            return;
        };

        let pending = match store.read_pending_feedback(&inner.conversation_id).await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(conversation_id = %inner.conversation_id, error = %e, "Failed to read pending feedback");
                return;
            }
        };
        if pending.is_empty() {
            return;
        }

        tracing::info!(conversation_id = %inner.conversation_id, count = pending.len(), "Draining pending feedback");
        for feedback in pending {
            if feedback.content.trim().is_empty() {
                continue;
            }
            handler.handle_text(&format!("User feedback: {}", feedback.content));
            inner.messages.push(Message::user(feedback.content));
        }

        if let Err(e) = store.clear_pending_feedback(&inner.conversation_id).await {
            tracing::warn!(conversation_id = %inner.conversation_id, error = %e, "Failed to clear pending feedback");
        }
    }

    pub(crate) fn hook_runner(&self, inner: &ThreadInner) -> HookRunner {
        let cwd = self
            .state
            .as_ref()
            .map(|s| s.working_dir().to_path_buf())
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_default();
        HookRunner::new(
            self.hooks.clone(),
            HookContext {
                conversation_id: inner.conversation_id.clone(),
                invoked_by: if inner.config.is_sub_agent {
                    InvokedBy::Subagent
                } else {
                    InvokedBy::Main
                },
                cwd,
            },
        )
    }
}

/// Whether usage has crossed `ratio` of the context window.
///
/// Never fires without a known window or for ratios outside `(0, 1]`.
pub fn should_auto_compact(usage: &UsageStats, ratio: f64) -> bool {
    if usage.max_context_window == 0 {
        return false;
    }
    if ratio <= 0.0 || ratio > 1.0 {
        return false;
    }
    usage.current_context_window as f64 / usage.max_context_window as f64 >= ratio
}

/// Rough token count of a transcript (chars / 4, floored)
pub fn estimate_context_window(transcript: &[TranscriptMessage]) -> u64 {
    let chars: usize = transcript.iter().map(|m| m.content.chars().count()).sum();
    ((chars / 4) as u64).max(limits::MIN_ESTIMATED_CONTEXT_TOKENS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::handler::{NoopHandler, StringCollector};
    use crate::agent::hooks::PreToolDecision;
    use crate::agent::testing::{MockProvider, RecordingTool};
    use crate::ai::provider::{Chunk, ChunkPart};
    use crate::ai::retry::RetryConfig;
    use crate::ai::types::UsageSnapshot;
    use crate::storage::{Database, SqliteFeedbackStore};
    use crate::tools::registry::ToolRegistry;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    fn config() -> ThreadConfig {
        ThreadConfig {
            model: "test-model".into(),
            weak_model: "test-weak".into(),
            retry: RetryConfig::disabled(),
            ..Default::default()
        }
    }

    fn tool_call(name: &str, args: Value) -> Chunk {
        Chunk::parts(vec![ChunkPart::FunctionCall {
            id: None,
            name: name.into(),
            arguments: args,
        }])
    }

    async fn state_with(tools: Vec<Arc<RecordingTool>>) -> Arc<SessionState> {
        let registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool).await;
        }
        Arc::new(SessionState::new("/tmp", Arc::new(registry)))
    }

    struct BlockTool(&'static str);

    #[async_trait]
    impl HookTrigger for BlockTool {
        async fn before_tool_call(
            &self,
            _ctx: &HookContext,
            tool_name: &str,
            _input: &Value,
            _call_id: &str,
        ) -> Result<PreToolDecision> {
            Ok(if tool_name == self.0 {
                PreToolDecision::Block {
                    reason: format!("{} is not permitted", tool_name),
                }
            } else {
                PreToolDecision::Continue
            })
        }
    }

    #[tokio::test]
    async fn tool_turn_then_final_answer() {
        let provider = MockProvider::new();
        provider.push(vec![
            Chunk::text("Let me look."),
            tool_call("bash", json!({"command": "ls -la"})),
        ]);
        provider.push(vec![Chunk::text("There are two files.")]);

        let bash = RecordingTool::new("bash", "a.txt\nb.txt");
        let thread = Thread::new(provider.clone(), config()).with_state(state_with(vec![bash.clone()]).await);

        let output = thread
            .send_message("List files", &NoopHandler, MessageOpt::default())
            .await
            .unwrap();

        assert_eq!(output, "There are two files.");
        assert_eq!(provider.call_count(), 2);
        assert_eq!(bash.calls(), vec![json!({"command": "ls -la"})]);

        let history = thread.raw_messages().await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[2].role, Role::User);
        assert_eq!(history[2].parts.len(), 1);
        assert!(matches!(&history[2].parts[0], Part::ToolResult { is_error: false, .. }));
        assert_eq!(thread.tool_results().await.len(), 1);

        // The second request carried the tool result
        let requests = provider.requests();
        assert_eq!(requests[1].0.messages.len(), 3);
    }

    #[tokio::test]
    async fn blocked_tool_is_never_invoked() {
        let provider = MockProvider::new();
        provider.push(vec![tool_call("dangerous_cmd", json!({"path": "/"}))]);
        provider.push(vec![Chunk::text("Understood.")]);

        let dangerous = RecordingTool::new("dangerous_cmd", "deleted");
        let thread = Thread::new(provider.clone(), config())
            .with_state(state_with(vec![dangerous.clone()]).await)
            .with_hooks(Arc::new(BlockTool("dangerous_cmd")));

        thread
            .send_message("Clean up", &NoopHandler, MessageOpt::default())
            .await
            .unwrap();

        assert!(dangerous.calls().is_empty());
        let results = thread.tool_results().await;
        let result = results.values().next().unwrap();
        assert!(result.is_error());
        assert!(result.assistant_facing().contains("dangerous_cmd is not permitted"));
    }

    #[tokio::test]
    async fn turn_limit_stops_after_tool_dispatch() {
        let provider = MockProvider::new();
        provider.push(vec![
            Chunk::text("Running it."),
            tool_call("bash", json!({"command": "make"})),
        ]);

        let bash = RecordingTool::new("bash", "ok");
        let thread = Thread::new(provider.clone(), config()).with_state(state_with(vec![bash.clone()]).await);

        let output = thread
            .send_message(
                "Build",
                &NoopHandler,
                MessageOpt {
                    max_turns: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(output, "Running it.");
        assert_eq!(provider.call_count(), 1);
        assert_eq!(bash.calls().len(), 1);
        // user, assistant, tool results
        assert_eq!(thread.raw_messages().await.len(), 3);
    }

    #[tokio::test]
    async fn parallel_calls_share_one_result_message() {
        let provider = MockProvider::new();
        provider.push(vec![
            tool_call("read", json!({"path": "a"})),
            tool_call("read", json!({"path": "b"})),
            tool_call("read", json!({"path": "c"})),
        ]);
        provider.push(vec![Chunk::text("done")]);

        let read = RecordingTool::new("read", "contents");
        let thread = Thread::new(provider.clone(), config()).with_state(state_with(vec![read.clone()]).await);
        thread
            .send_message("Read all", &NoopHandler, MessageOpt::default())
            .await
            .unwrap();

        let history = thread.raw_messages().await;
        let result_messages: Vec<&Message> = history
            .iter()
            .filter(|m| m.parts.iter().any(|p| matches!(p, Part::ToolResult { .. })))
            .collect();
        assert_eq!(result_messages.len(), 1);
        assert_eq!(result_messages[0].parts.len(), 3);

        let call_ids: Vec<String> = history[1].tool_calls().map(|c| c.id).collect();
        let result_ids: Vec<String> = result_messages[0]
            .parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolResult { call_id, .. } => Some(call_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(call_ids, result_ids);
        assert_eq!(
            read.calls(),
            vec![json!({"path": "a"}), json!({"path": "b"}), json!({"path": "c"})]
        );
    }

    struct RejectMessages;

    #[async_trait]
    impl HookTrigger for RejectMessages {
        async fn user_message_send(&self, _ctx: &HookContext, message: &str) -> Result<HookResult> {
            Ok(if message.contains("password") {
                HookResult::Block {
                    reason: "contains a secret".into(),
                }
            } else {
                HookResult::Continue
            })
        }
    }

    #[tokio::test]
    async fn blocked_user_message_consumes_nothing() {
        let provider = MockProvider::new();
        let thread = Thread::new(provider.clone(), config()).with_hooks(Arc::new(RejectMessages));

        let err = thread
            .send_message("my password is hunter2", &NoopHandler, MessageOpt::default())
            .await
            .unwrap_err();

        assert!(err.is_blocked());
        assert!(thread.raw_messages().await.is_empty());
        assert_eq!(provider.call_count(), 0);
    }

    struct FollowUpOnce {
        fired: parking_lot::Mutex<bool>,
    }

    #[async_trait]
    impl HookTrigger for FollowUpOnce {
        async fn agent_stop(
            &self,
            ctx: &HookContext,
            transcript: &[TranscriptMessage],
        ) -> Result<Vec<String>> {
            assert_eq!(ctx.invoked_by, InvokedBy::Main);
            assert!(!transcript.is_empty());
            let mut fired = self.fired.lock();
            if *fired {
                return Ok(Vec::new());
            }
            *fired = true;
            Ok(vec!["Now run the tests.".into()])
        }
    }

    #[tokio::test]
    async fn stop_hook_follow_up_continues_loop() {
        let provider = MockProvider::new();
        provider.push(vec![Chunk::text("Fixed the bug.")]);
        provider.push(vec![Chunk::text("Tests pass.")]);

        let thread = Thread::new(provider.clone(), config()).with_hooks(Arc::new(FollowUpOnce {
            fired: parking_lot::Mutex::new(false),
        }));
        let collector = StringCollector::new();

        let output = thread
            .send_message("Fix it", &collector, MessageOpt::default())
            .await
            .unwrap();

        assert_eq!(output, "Tests pass.");
        assert_eq!(provider.call_count(), 2);
        assert!(collector.text().contains("Hook follow-up: Now run the tests."));
        let transcript = thread.messages().await;
        assert_eq!(transcript[2].role, "user");
        assert_eq!(transcript[2].content, "Now run the tests.");
    }

    #[tokio::test]
    async fn pending_feedback_is_drained_first() {
        let provider = MockProvider::new();
        provider.push(vec![Chunk::text("ok")]);

        let feedback = Arc::new(SqliteFeedbackStore::new(Database::in_memory().unwrap()));
        let thread = Thread::new(provider.clone(), config())
            .with_conversation_id("conv-feedback")
            .with_feedback_store(feedback.clone());

        feedback.write_feedback("conv-feedback", "prefer small commits").await.unwrap();
        feedback.write_feedback("conv-feedback", "   ").await.unwrap();

        let collector = StringCollector::new();
        thread
            .send_message("Continue", &collector, MessageOpt::default())
            .await
            .unwrap();

        let transcript = thread.messages().await;
        assert_eq!(transcript[0].content, "prefer small commits");
        assert_eq!(transcript[1].content, "Continue");
        assert!(collector.text().starts_with("User feedback: prefer small commits"));
        assert!(feedback.read_pending_feedback("conv-feedback").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sub_agent_ignores_feedback() {
        let provider = MockProvider::new();
        provider.push(vec![Chunk::text("ok")]);

        let feedback = Arc::new(SqliteFeedbackStore::new(Database::in_memory().unwrap()));
        let parent = Thread::new(provider.clone(), config()).with_feedback_store(feedback.clone());
        let sub = parent.new_sub_agent(config());

        let sub_id = sub.conversation_id().await;
        assert_ne!(sub_id, parent.conversation_id().await);
        feedback.write_feedback(&sub_id, "ignored").await.unwrap();

        sub.send_message("task", &NoopHandler, MessageOpt::default())
            .await
            .unwrap();
        assert_eq!(sub.messages().await.len(), 2);
        assert!(sub.config().await.is_sub_agent);
    }

    #[tokio::test]
    async fn usage_updates_after_each_exchange() {
        let provider = MockProvider::new().with_context_window(1000);
        provider.push(vec![
            Chunk::text("hi"),
            Chunk::usage(UsageSnapshot {
                prompt_tokens: 100,
                response_tokens: 20,
                cached_tokens: 5,
                total_tokens: 125,
            }),
        ]);

        let thread = Thread::new(provider.clone(), config());
        thread
            .send_message("hello", &NoopHandler, MessageOpt::default())
            .await
            .unwrap();

        let usage = thread.usage().await;
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.current_context_window, 125);
        assert_eq!(usage.max_context_window, 1000);
    }

    #[tokio::test]
    async fn helper_usage_folds_into_parent() {
        let provider = MockProvider::new().with_context_window(1000);
        provider.push(vec![
            Chunk::text("hi"),
            Chunk::usage(UsageSnapshot {
                prompt_tokens: 100,
                response_tokens: 20,
                cached_tokens: 0,
                total_tokens: 120,
            }),
        ]);
        let thread = Thread::new(provider.clone(), config());
        thread
            .send_message("hello", &NoopHandler, MessageOpt::default())
            .await
            .unwrap();

        thread
            .aggregate_subagent_usage(&UsageStats {
                input_tokens: 40,
                output_tokens: 10,
                output_cost: 0.25,
                current_context_window: 5000,
                max_context_window: 8000,
                ..Default::default()
            })
            .await;

        let usage = thread.usage().await;
        assert_eq!(usage.input_tokens, 140);
        assert_eq!(usage.output_tokens, 30);
        assert!((usage.output_cost - 0.25).abs() < 1e-9);
        assert_eq!(usage.current_context_window, 120);
        assert_eq!(usage.max_context_window, 1000);
    }

    #[tokio::test]
    async fn context_window_can_be_reestimated() {
        let provider = MockProvider::new();
        provider.push(vec![Chunk::text("ok")]);
        let thread = Thread::new(provider.clone(), config());
        assert_eq!(thread.reestimate_context_window().await, 100);

        thread
            .send_message(&"x".repeat(4000), &NoopHandler, MessageOpt::default())
            .await
            .unwrap();

        assert_eq!(thread.reestimate_context_window().await, 1000);
        assert_eq!(thread.usage().await.current_context_window, 1000);
    }

    #[tokio::test]
    async fn retryable_errors_are_retried() {
        let provider = MockProvider::new();
        provider.push_error(ProviderError::api(503, "overloaded"));
        provider.push(vec![Chunk::text("recovered")]);

        let thread = Thread::new(
            provider.clone(),
            ThreadConfig {
                retry: RetryConfig {
                    attempts: 3,
                    initial_delay_ms: 1,
                    max_delay_ms: 2,
                    ..Default::default()
                },
                ..config()
            },
        );

        let output = thread
            .send_message("hi", &NoopHandler, MessageOpt::default())
            .await
            .unwrap();
        assert_eq!(output, "recovered");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn classifier_can_narrow_retries() {
        let provider = MockProvider::new();
        provider.push_error(ProviderError::api(401, "bad key"));
        provider.push(vec![Chunk::text("never")]);

        let thread = Thread::new(
            provider.clone(),
            ThreadConfig {
                retry: RetryConfig {
                    attempts: 3,
                    initial_delay_ms: 1,
                    max_delay_ms: 2,
                    ..Default::default()
                },
                ..config()
            },
        )
        .with_retry_classifier(Arc::new(|e: &ProviderError| {
            e.status.map(|s| s == 429 || s >= 500).unwrap_or(false)
        }));

        let err = thread
            .send_message("hi", &NoopHandler, MessageOpt::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ThreadError::RetriesExhausted(_)));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn caller_cancellation_stops_without_error() {
        let provider = MockProvider::new();
        let thread = Thread::new(provider.clone(), config());
        let opt = MessageOpt::default();
        opt.cancel.cancel();

        let output = thread.send_message("hi", &NoopHandler, opt).await.unwrap();
        assert!(output.is_empty());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn nested_cancellation_is_reported() {
        let provider = MockProvider::new();
        provider.push_error(ProviderError::canceled());

        let thread = Thread::new(provider.clone(), config());
        let err = thread
            .send_message("hi", &NoopHandler, MessageOpt::default())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn weak_model_and_no_tools_options() {
        let provider = MockProvider::new().with_thinking();
        provider.push(vec![Chunk::text("ok")]);
        provider.push(vec![Chunk::text("ok")]);

        let read = RecordingTool::new("read", "x");
        let thread = Thread::new(
            provider.clone(),
            ThreadConfig {
                thinking_budget_tokens: 1024,
                ..config()
            },
        )
        .with_state(state_with(vec![read]).await);

        thread
            .send_message("a", &NoopHandler, MessageOpt::default())
            .await
            .unwrap();
        thread
            .send_message(
                "b",
                &NoopHandler,
                MessageOpt {
                    use_weak_model: true,
                    no_tool_use: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let requests = provider.requests();
        assert_eq!(requests[0].1.model, "test-model");
        assert_eq!(requests[0].1.tools.len(), 1);
        assert_eq!(requests[0].1.thinking.map(|t| t.budget_tokens), Some(1024));
        assert_eq!(requests[1].1.model, "test-weak");
        assert!(requests[1].1.tools.is_empty());
        assert!(requests[1].1.thinking.is_none());
    }

    #[tokio::test]
    async fn images_precede_text() {
        let dir = tempfile::TempDir::new().unwrap();
        let image = dir.path().join("shot.png");
        std::fs::write(&image, b"\x89PNG").unwrap();

        let provider = MockProvider::new();
        provider.push(vec![Chunk::text("I see it.")]);
        let thread = Thread::new(provider.clone(), config());

        thread
            .send_message(
                "What is this?",
                &NoopHandler,
                MessageOpt {
                    images: vec![image.to_string_lossy().to_string(), "/missing.png".into()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let first = &thread.raw_messages().await[0];
        assert_eq!(first.parts.len(), 2);
        assert!(matches!(first.parts[0], Part::Image { .. }));
        assert_eq!(first.text(), "What is this?");
    }

    #[test]
    fn compaction_trigger_boundaries() {
        let usage = |current, max| UsageStats {
            current_context_window: current,
            max_context_window: max,
            ..Default::default()
        };

        assert!(should_auto_compact(&usage(80, 100), 0.8));
        assert!(!should_auto_compact(&usage(79, 100), 0.8));
        assert!(should_auto_compact(&usage(100, 100), 1.0));
        assert!(!should_auto_compact(&usage(100, 0), 0.5));
        assert!(!should_auto_compact(&usage(0, 0), 0.0));
        assert!(!should_auto_compact(&usage(100, 100), 0.0));
        assert!(!should_auto_compact(&usage(100, 100), -0.5));
        assert!(!should_auto_compact(&usage(200, 100), 1.5));
    }

    #[test]
    fn context_estimate_has_floor() {
        assert_eq!(estimate_context_window(&[]), 100);
        let long = vec![TranscriptMessage {
            role: "user".into(),
            content: "x".repeat(4000),
        }];
        assert_eq!(estimate_context_window(&long), 1000);
    }
}
