//! Hook system for the exchange loop
//!
//! Four interception points let policy code observe or steer a thread
//! without touching the loop itself:
//! - `user_message_send` - may block an incoming user message
//! - `before_tool_call` - may block a tool call or rewrite its input
//! - `after_tool_call` - may replace a tool result
//! - `agent_stop` - may push follow-up user messages instead of stopping
//!
//! Hooks are fail-open. `HookRunner` logs any hook error and carries on as
//! if the hook had not been installed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ai::types::TranscriptMessage;
use crate::tools::registry::StructuredToolResult;

/// Which kind of thread fired the hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvokedBy {
    Main,
    Subagent,
}

impl InvokedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvokedBy::Main => "main",
            InvokedBy::Subagent => "subagent",
        }
    }
}

/// Identity of the thread a hook fires for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    pub conversation_id: String,
    pub invoked_by: InvokedBy,
    pub cwd: PathBuf,
}

/// Result of a gating hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookResult {
    /// Allow the operation to proceed
    Continue,
    /// Block the operation with a reason
    Block { reason: String },
}

/// Result of `before_tool_call`
#[derive(Debug, Clone, PartialEq)]
pub enum PreToolDecision {
    Continue,
    /// Run the tool with this input instead
    Modify { input: Value },
    Block { reason: String },
}

/// Extension points consumed by `Thread`.
///
/// Every method has a pass-through default so implementors only override the
/// events they care about.
#[async_trait]
pub trait HookTrigger: Send + Sync {
    async fn user_message_send(&self, _ctx: &HookContext, _message: &str) -> Result<HookResult> {
        Ok(HookResult::Continue)
    }

    async fn before_tool_call(
        &self,
        _ctx: &HookContext,
        _tool_name: &str,
        _input: &Value,
        _call_id: &str,
    ) -> Result<PreToolDecision> {
        Ok(PreToolDecision::Continue)
    }

    /// Return `Some` to replace the result the model sees
    async fn after_tool_call(
        &self,
        _ctx: &HookContext,
        _tool_name: &str,
        _input: &Value,
        _call_id: &str,
        _result: &StructuredToolResult,
    ) -> Result<Option<StructuredToolResult>> {
        Ok(None)
    }

    /// Follow-up user messages; empty lets the loop stop
    async fn agent_stop(
        &self,
        _ctx: &HookContext,
        _transcript: &[TranscriptMessage],
    ) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Hook trigger that never intervenes
pub struct NoopHooks;

#[async_trait]
impl HookTrigger for NoopHooks {}

/// Fail-open wrapper binding a trigger to one thread's context
#[derive(Clone)]
pub struct HookRunner {
    trigger: Arc<dyn HookTrigger>,
    ctx: HookContext,
}

impl HookRunner {
    pub fn new(trigger: Arc<dyn HookTrigger>, ctx: HookContext) -> Self {
        Self { trigger, ctx }
    }

    pub fn trigger(&self) -> &Arc<dyn HookTrigger> {
        &self.trigger
    }

    pub fn context(&self) -> &HookContext {
        &self.ctx
    }

    pub async fn user_message_send(&self, message: &str) -> HookResult {
        match self.trigger.user_message_send(&self.ctx, message).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(hook = "user_message_send", error = %e, "Hook failed, continuing");
                HookResult::Continue
            }
        }
    }

    pub async fn before_tool_call(
        &self,
        tool_name: &str,
        input: &Value,
        call_id: &str,
    ) -> PreToolDecision {
        match self
            .trigger
            .before_tool_call(&self.ctx, tool_name, input, call_id)
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(
                    hook = "before_tool_call",
                    tool = tool_name,
                    error = %e,
                    "Hook failed, continuing"
                );
                PreToolDecision::Continue
            }
        }
    }

    pub async fn after_tool_call(
        &self,
        tool_name: &str,
        input: &Value,
        call_id: &str,
        result: &StructuredToolResult,
    ) -> Option<StructuredToolResult> {
        match self
            .trigger
            .after_tool_call(&self.ctx, tool_name, input, call_id, result)
            .await
        {
            Ok(replacement) => replacement,
            Err(e) => {
                tracing::warn!(
                    hook = "after_tool_call",
                    tool = tool_name,
                    error = %e,
                    "Hook failed, continuing"
                );
                None
            }
        }
    }

    pub async fn agent_stop(&self, transcript: &[TranscriptMessage]) -> Vec<String> {
        match self.trigger.agent_stop(&self.ctx, transcript).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(hook = "agent_stop", error = %e, "Hook failed, continuing");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct BrokenHooks;

    #[async_trait]
    impl HookTrigger for BrokenHooks {
        async fn user_message_send(&self, _ctx: &HookContext, _message: &str) -> Result<HookResult> {
            anyhow::bail!("hook crashed")
        }

        async fn before_tool_call(
            &self,
            _ctx: &HookContext,
            _tool_name: &str,
            _input: &Value,
            _call_id: &str,
        ) -> Result<PreToolDecision> {
            anyhow::bail!("hook crashed")
        }

        async fn agent_stop(
            &self,
            _ctx: &HookContext,
            _transcript: &[TranscriptMessage],
        ) -> Result<Vec<String>> {
            anyhow::bail!("hook crashed")
        }
    }

    fn ctx() -> HookContext {
        HookContext {
            conversation_id: "conv-1".into(),
            invoked_by: InvokedBy::Main,
            cwd: PathBuf::from("/tmp"),
        }
    }

    #[tokio::test]
    async fn broken_hook_fails_open() {
        let runner = HookRunner::new(Arc::new(BrokenHooks), ctx());

        assert_eq!(runner.user_message_send("hi").await, HookResult::Continue);
        assert_eq!(
            runner.before_tool_call("bash", &json!({}), "call_1").await,
            PreToolDecision::Continue
        );
        assert!(runner.agent_stop(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn noop_hooks_pass_everything() {
        let runner = HookRunner::new(Arc::new(NoopHooks), ctx());
        let result = crate::tools::ToolResult::success("ok").structured("bash");

        assert_eq!(runner.user_message_send("hi").await, HookResult::Continue);
        assert!(runner
            .after_tool_call("bash", &json!({}), "call_1", &result)
            .await
            .is_none());
    }

    #[test]
    fn invoked_by_serializes_lowercase() {
        assert_eq!(serde_json::to_value(InvokedBy::Subagent).unwrap(), json!("subagent"));
        assert_eq!(InvokedBy::Main.as_str(), "main");
    }
}
