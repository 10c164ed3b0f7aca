//! Tool execution for the exchange loop.
//!
//! Handles:
//! - `before_tool_call` gating (block or input rewrite)
//! - Regular tool execution via `ToolRegistry::execute()`
//! - `after_tool_call` result replacement
//! - Batching every result of a turn into one user message
//!
//! Calls run sequentially in the order the model issued them.

use std::sync::Arc;

use crate::agent::handler::MessageHandler;
use crate::agent::hooks::{HookRunner, PreToolDecision};
use crate::ai::types::{Message, Part, Role, ToolCall};
use crate::tools::registry::{StructuredToolResult, ToolContext, ToolResult};
use crate::tools::state::SessionState;

/// Results of one turn's tool calls
#[derive(Debug, Default)]
pub(crate) struct DispatchOutcome {
    /// `(call_id, result)` in call order
    pub results: Vec<(String, StructuredToolResult)>,
    /// Single user message carrying every result part; `None` if all calls were skipped
    pub message: Option<Message>,
}

/// Execute a batch of tool calls.
///
/// Without session state no tool can run and every call gets an
/// unknown-tool error result.
pub(crate) async fn execute_tools(
    tool_calls: &[ToolCall],
    state: Option<&Arc<SessionState>>,
    hooks: &HookRunner,
    handler: &dyn MessageHandler,
) -> DispatchOutcome {
    let mut outcome = DispatchOutcome::default();
    let mut parts = Vec::with_capacity(tool_calls.len());

    for call in tool_calls {
        let args = match serde_json::to_string(&call.arguments) {
            Ok(args) => args,
            Err(e) => {
                tracing::error!(
                    tool = %call.name,
                    call_id = %call.id,
                    error = %e,
                    "Failed to serialize tool arguments, skipping call"
                );
                continue;
            }
        };
        tracing::debug!(tool = %call.name, call_id = %call.id, args = %args, "Dispatching tool call");
        handler.handle_tool_use(&call.id, &call.name, &call.arguments);

        // ── Pre-execution gate ─────────────────────────────────────
        let (input, result) = match hooks
            .before_tool_call(&call.name, &call.arguments, &call.id)
            .await
        {
            PreToolDecision::Block { reason } => {
                tracing::info!(tool = %call.name, call_id = %call.id, reason = %reason, "Tool call blocked by hook");
                (call.arguments.clone(), ToolResult::blocked(&call.name, &reason))
            }
            PreToolDecision::Modify { input } => {
                tracing::debug!(tool = %call.name, call_id = %call.id, "Tool input rewritten by hook");
                let result = run_tool(call, input.clone(), state).await;
                (input, result)
            }
            PreToolDecision::Continue => {
                let result = run_tool(call, call.arguments.clone(), state).await;
                (call.arguments.clone(), result)
            }
        };

        // ── Post-execution hook, blocked calls included ─────────────
        let mut structured = result.structured(&call.name);
        if let Some(replacement) = hooks
            .after_tool_call(&call.name, &input, &call.id, &structured)
            .await
        {
            structured = replacement;
        }

        handler.handle_tool_result(&call.id, &call.name, &structured);
        parts.push(result_part(call, &structured));
        outcome.results.push((call.id.clone(), structured));
    }

    if !parts.is_empty() {
        outcome.message = Some(Message::new(Role::User, parts));
    }
    outcome
}

async fn run_tool(
    call: &ToolCall,
    input: serde_json::Value,
    state: Option<&Arc<SessionState>>,
) -> ToolResult {
    match state {
        Some(state) => {
            let ctx = ToolContext::for_state(state.clone()).with_tool_call_id(&call.id);
            state.tools().execute(&call.name, input, &ctx).await
        }
        None => ToolResult::error_with_code("unknown_tool", format!("Unknown tool: {}", call.name)),
    }
}

fn result_part(call: &ToolCall, result: &StructuredToolResult) -> Part {
    Part::ToolResult {
        call_id: call.id.clone(),
        name: call.name.clone(),
        result: result.assistant_facing(),
        is_error: result.is_error(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::handler::NoopHandler;
    use crate::agent::hooks::{HookContext, HookTrigger, InvokedBy, NoopHooks};
    use crate::agent::testing::RecordingTool;
    use crate::tools::registry::ToolRegistry;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::path::PathBuf;

    fn runner(trigger: Arc<dyn HookTrigger>) -> HookRunner {
        HookRunner::new(
            trigger,
            HookContext {
                conversation_id: "conv".into(),
                invoked_by: InvokedBy::Main,
                cwd: PathBuf::from("/tmp"),
            },
        )
    }

    async fn state_with(tools: Vec<Arc<RecordingTool>>) -> Arc<SessionState> {
        let registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool).await;
        }
        Arc::new(SessionState::new("/tmp", Arc::new(registry)))
    }

    struct RewriteHook;

    #[async_trait]
    impl HookTrigger for RewriteHook {
        async fn before_tool_call(
            &self,
            _ctx: &HookContext,
            tool_name: &str,
            _input: &Value,
            _call_id: &str,
        ) -> Result<PreToolDecision> {
            Ok(match tool_name {
                "bash" => PreToolDecision::Modify {
                    input: json!({"command": "ls"}),
                },
                "dangerous_cmd" => PreToolDecision::Block {
                    reason: "destructive command".into(),
                },
                _ => PreToolDecision::Continue,
            })
        }

        async fn after_tool_call(
            &self,
            _ctx: &HookContext,
            tool_name: &str,
            _input: &Value,
            _call_id: &str,
            result: &StructuredToolResult,
        ) -> Result<Option<StructuredToolResult>> {
            if tool_name != "read" {
                return Ok(None);
            }
            let mut replaced = result.clone();
            replaced.output = "[redacted]".into();
            Ok(Some(replaced))
        }
    }

    #[tokio::test]
    async fn results_are_batched_in_call_order() {
        let read = RecordingTool::new("read", "file contents");
        let bash = RecordingTool::new("bash", "a.txt");
        let state = state_with(vec![read.clone(), bash.clone()]).await;

        let calls = vec![
            ToolCall::new("bash", json!({"command": "ls -la"})),
            ToolCall::new("read", json!({"path": "a.txt"})),
            ToolCall::new("missing", json!({})),
        ];
        let outcome =
            execute_tools(&calls, Some(&state), &runner(Arc::new(NoopHooks)), &NoopHandler).await;

        let message = outcome.message.unwrap();
        assert_eq!(message.role, Role::User);
        assert_eq!(message.parts.len(), 3);
        let ids: Vec<&str> = message
            .parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolResult { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect();
        let expected: Vec<&str> = calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, expected);

        assert!(matches!(&message.parts[2], Part::ToolResult { is_error: true, result, .. } if result.contains("Unknown tool: missing")));
        assert_eq!(outcome.results.len(), 3);
        assert_eq!(bash.calls(), vec![json!({"command": "ls -la"})]);
    }

    #[tokio::test]
    async fn hooks_block_rewrite_and_replace() {
        let bash = RecordingTool::new("bash", "ok");
        let dangerous = RecordingTool::new("dangerous_cmd", "boom");
        let read = RecordingTool::new("read", "secret");
        let state = state_with(vec![bash.clone(), dangerous.clone(), read.clone()]).await;

        let calls = vec![
            ToolCall::new("dangerous_cmd", json!({"target": "/"})),
            ToolCall::new("bash", json!({"command": "rm -rf ."})),
            ToolCall::new("read", json!({"path": ".env"})),
        ];
        let outcome =
            execute_tools(&calls, Some(&state), &runner(Arc::new(RewriteHook)), &NoopHandler).await;

        assert!(dangerous.calls().is_empty());
        let (_, blocked) = &outcome.results[0];
        assert!(blocked.is_error());
        assert!(blocked.assistant_facing().contains("destructive command"));

        assert_eq!(bash.calls(), vec![json!({"command": "ls"})]);

        let (_, replaced) = &outcome.results[2];
        assert_eq!(replaced.output, "[redacted]");
    }

    #[derive(Default)]
    struct AuditHook {
        seen: parking_lot::Mutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl HookTrigger for AuditHook {
        async fn before_tool_call(
            &self,
            _ctx: &HookContext,
            tool_name: &str,
            _input: &Value,
            _call_id: &str,
        ) -> Result<PreToolDecision> {
            Ok(if tool_name == "dangerous_cmd" {
                PreToolDecision::Block {
                    reason: "destructive command".into(),
                }
            } else {
                PreToolDecision::Continue
            })
        }

        async fn after_tool_call(
            &self,
            _ctx: &HookContext,
            tool_name: &str,
            _input: &Value,
            _call_id: &str,
            result: &StructuredToolResult,
        ) -> Result<Option<StructuredToolResult>> {
            self.seen
                .lock()
                .push((tool_name.to_string(), result.is_error()));
            let mut replaced = result.clone();
            replaced.error = Some("denied by audit policy".into());
            Ok(Some(replaced))
        }
    }

    #[tokio::test]
    async fn blocked_calls_reach_after_tool_call() {
        let dangerous = RecordingTool::new("dangerous_cmd", "boom");
        let state = state_with(vec![dangerous.clone()]).await;
        let audit = Arc::new(AuditHook::default());

        let calls = vec![ToolCall::new("dangerous_cmd", json!({"target": "/"}))];
        let outcome =
            execute_tools(&calls, Some(&state), &runner(audit.clone()), &NoopHandler).await;

        assert!(dangerous.calls().is_empty());
        assert_eq!(
            *audit.seen.lock(),
            vec![("dangerous_cmd".to_string(), true)]
        );
        let (_, result) = &outcome.results[0];
        assert!(result.is_error());
        assert!(result.assistant_facing().contains("denied by audit policy"));
        assert!(matches!(
            &outcome.message.unwrap().parts[0],
            Part::ToolResult { is_error: true, result, .. } if result.contains("denied by audit policy")
        ));
    }

    #[tokio::test]
    async fn no_state_yields_error_results() {
        let calls = vec![ToolCall::new("bash", json!({}))];
        let outcome = execute_tools(&calls, None, &runner(Arc::new(NoopHooks)), &NoopHandler).await;
        assert!(outcome.results[0].1.is_error());
        assert_eq!(outcome.message.unwrap().parts.len(), 1);
    }

    #[tokio::test]
    async fn empty_batch_produces_no_message() {
        let outcome = execute_tools(&[], None, &runner(Arc::new(NoopHooks)), &NoopHandler).await;
        assert!(outcome.message.is_none());
        assert!(outcome.results.is_empty());
    }
}
