//! User-configurable shell hooks
//!
//! Users attach shell commands to hook events in `config.toml`. Each command
//! receives a JSON payload on stdin describing the event.
//!
//! ## Exit Code Protocol
//! - 0: Continue; stdout may carry a JSON result for the event
//! - 2: Block, stderr becomes the reason (a follow-up message for `agent_stop`)
//! - Other: Logged as a warning, the hook is ignored

use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::agent::hooks::{HookContext, HookResult, HookTrigger, PreToolDecision};
use crate::ai::types::TranscriptMessage;
use crate::constants;
use crate::tools::registry::StructuredToolResult;

/// Hook event a shell command is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserHookType {
    UserMessageSend,
    BeforeToolCall,
    AfterToolCall,
    AgentStop,
}

impl UserHookType {
    pub fn all() -> &'static [UserHookType] {
        &[
            UserHookType::UserMessageSend,
            UserHookType::BeforeToolCall,
            UserHookType::AfterToolCall,
            UserHookType::AgentStop,
        ]
    }

    /// Event name as sent in the payload
    pub fn display_name(&self) -> &'static str {
        match self {
            UserHookType::UserMessageSend => "user_message_send",
            UserHookType::BeforeToolCall => "before_tool_call",
            UserHookType::AfterToolCall => "after_tool_call",
            UserHookType::AgentStop => "agent_stop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|t| t.display_name() == s)
    }

    /// Tool events honour a hook's `tool_pattern`
    pub fn is_tool_event(&self) -> bool {
        matches!(
            self,
            UserHookType::BeforeToolCall | UserHookType::AfterToolCall
        )
    }
}

impl std::fmt::Display for UserHookType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// A user-defined hook command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserHook {
    /// Shell command to execute
    pub command: String,
    /// Regex on the tool name; tool events only, absent matches every tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_pattern: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(skip)]
    compiled_pattern: Option<Regex>,
}

fn default_enabled() -> bool {
    true
}

impl UserHook {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            tool_pattern: None,
            enabled: true,
            compiled_pattern: None,
        }
    }

    pub fn with_tool_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.tool_pattern = Some(pattern.into());
        self.compile_pattern();
        self
    }

    /// Compile the pattern (call after loading from config)
    pub fn compile_pattern(&mut self) {
        self.compiled_pattern = self
            .tool_pattern
            .as_deref()
            .and_then(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern = p, error = %e, "Invalid hook tool pattern, hook disabled");
                    None
                }
            });
    }

    /// Check if the pattern is valid regex
    pub fn is_pattern_valid(&self) -> bool {
        self.tool_pattern
            .as_deref()
            .map(|p| Regex::new(p).is_ok())
            .unwrap_or(true)
    }

    /// Check if this hook applies to a tool name
    pub fn matches(&self, tool_name: &str) -> bool {
        if !self.enabled {
            return false;
        }
        match (&self.tool_pattern, &self.compiled_pattern) {
            (None, _) => true,
            (Some(_), Some(re)) => re.is_match(tool_name),
            (Some(_), None) => false,
        }
    }
}

/// `[hooks]` section of the config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub user_message_send: Vec<UserHook>,
    pub before_tool_call: Vec<UserHook>,
    pub after_tool_call: Vec<UserHook>,
    pub agent_stop: Vec<UserHook>,
}

impl HooksConfig {
    pub fn is_empty(&self) -> bool {
        UserHookType::all().iter().all(|t| self.hooks(*t).is_empty())
    }

    pub fn hooks(&self, hook_type: UserHookType) -> &[UserHook] {
        match hook_type {
            UserHookType::UserMessageSend => &self.user_message_send,
            UserHookType::BeforeToolCall => &self.before_tool_call,
            UserHookType::AfterToolCall => &self.after_tool_call,
            UserHookType::AgentStop => &self.agent_stop,
        }
    }

    fn hooks_mut(&mut self) -> impl Iterator<Item = &mut UserHook> {
        self.user_message_send
            .iter_mut()
            .chain(self.before_tool_call.iter_mut())
            .chain(self.after_tool_call.iter_mut())
            .chain(self.agent_stop.iter_mut())
    }
}

/// Outcome of running one hook command
#[derive(Debug, PartialEq)]
pub enum UserHookResult {
    /// Exit 0, with whatever the command printed
    Continue { stdout: String },
    /// Exit 2
    Block { reason: String },
    /// Any other exit code
    Warn { message: String },
}

/// Executor for user hooks - runs shell commands and interprets results
pub struct UserHookExecutor;

impl UserHookExecutor {
    /// Run `hook` with `payload` on stdin.
    ///
    /// Spawn failures and timeouts are errors; exit codes are not.
    pub async fn execute(hook: &UserHook, payload: &Value) -> Result<UserHookResult> {
        let input = serde_json::to_string(payload).context("Failed to serialize hook payload")?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&hook.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn hook: {}", hook.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A hook that ignores stdin may close it early
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                tracing::debug!(command = %hook.command, error = %e, "Hook did not read stdin");
            }
        }

        let output = tokio::time::timeout(constants::HOOK_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Hook timed out after {} seconds: {}",
                    constants::HOOK_TIMEOUT.as_secs(),
                    hook.command
                )
            })?
            .with_context(|| format!("Hook execution failed: {}", hook.command))?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        tracing::debug!(
            command = %hook.command,
            exit_code,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "Hook execution complete"
        );

        Ok(match exit_code {
            0 => UserHookResult::Continue { stdout },
            2 => UserHookResult::Block {
                reason: if stderr.is_empty() {
                    "Hook blocked execution".to_string()
                } else {
                    stderr
                },
            },
            _ => UserHookResult::Warn {
                message: if stderr.is_empty() {
                    format!("Hook exited with code {}", exit_code)
                } else {
                    stderr
                },
            },
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GateOutput {
    blocked: bool,
    reason: Option<String>,
    input: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ToolResultOutput {
    output: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StopOutput {
    follow_up_messages: Vec<String>,
}

fn parse_stdout<T: serde::de::DeserializeOwned + Default>(stdout: &str) -> Result<T> {
    if stdout.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(stdout).with_context(|| format!("Hook printed invalid JSON: {}", stdout))
}

/// Run one hook of a chain. A failing hook is logged and skipped so the rest
/// of the chain still runs.
async fn run_in_chain(
    event: UserHookType,
    hook: &UserHook,
    payload: &Value,
) -> Option<UserHookResult> {
    match UserHookExecutor::execute(hook, payload).await {
        Ok(result) => Some(result),
        Err(e) => {
            tracing::warn!(event = %event, command = %hook.command, error = %e, "User hook failed, skipping");
            None
        }
    }
}

/// Parse a chain member's stdout, logging and skipping it on bad JSON
fn parse_in_chain<T: serde::de::DeserializeOwned + Default>(
    event: UserHookType,
    hook: &UserHook,
    stdout: &str,
) -> Option<T> {
    match parse_stdout(stdout) {
        Ok(out) => Some(out),
        Err(e) => {
            tracing::warn!(event = %event, command = %hook.command, error = %e, "Ignoring user hook output");
            None
        }
    }
}

/// `HookTrigger` backed by shell commands from the config file
pub struct ShellHookTrigger {
    config: HooksConfig,
}

impl ShellHookTrigger {
    pub fn new(mut config: HooksConfig) -> Self {
        for hook in config.hooks_mut() {
            hook.compile_pattern();
        }
        Self { config }
    }

    fn payload(ctx: &HookContext, event: UserHookType, fields: Value) -> Value {
        let mut payload = json!({
            "event": event.display_name(),
            "conv_id": ctx.conversation_id,
            "cwd": ctx.cwd.to_string_lossy(),
            "invoked_by": ctx.invoked_by.as_str(),
        });
        if let (Some(obj), Value::Object(extra)) = (payload.as_object_mut(), fields) {
            obj.extend(extra);
        }
        payload
    }

    fn matching(&self, hook_type: UserHookType, tool_name: Option<&str>) -> Vec<&UserHook> {
        self.config
            .hooks(hook_type)
            .iter()
            .filter(|h| match tool_name {
                Some(name) if hook_type.is_tool_event() => h.matches(name),
                _ => h.enabled,
            })
            .collect()
    }
}

#[async_trait]
impl HookTrigger for ShellHookTrigger {
    async fn user_message_send(&self, ctx: &HookContext, message: &str) -> Result<HookResult> {
        let event = UserHookType::UserMessageSend;
        let payload = Self::payload(ctx, event, json!({ "message": message }));

        for hook in self.matching(event, None) {
            let Some(result) = run_in_chain(event, hook, &payload).await else {
                continue;
            };
            match result {
                UserHookResult::Block { reason } => return Ok(HookResult::Block { reason }),
                UserHookResult::Continue { stdout } => {
                    let Some(out) = parse_in_chain::<GateOutput>(event, hook, &stdout) else {
                        continue;
                    };
                    if out.blocked {
                        return Ok(HookResult::Block {
                            reason: out.reason.unwrap_or_else(|| "Blocked by hook".to_string()),
                        });
                    }
                }
                UserHookResult::Warn { message } => {
                    tracing::warn!(event = %event, command = %hook.command, "User hook warning: {}", message);
                }
            }
        }
        Ok(HookResult::Continue)
    }

    async fn before_tool_call(
        &self,
        ctx: &HookContext,
        tool_name: &str,
        input: &Value,
        call_id: &str,
    ) -> Result<PreToolDecision> {
        let event = UserHookType::BeforeToolCall;
        let mut current = input.clone();
        let mut modified = false;

        for hook in self.matching(event, Some(tool_name)) {
            let payload = Self::payload(
                ctx,
                event,
                json!({ "tool_name": tool_name, "tool_input": current, "call_id": call_id }),
            );
            let Some(result) = run_in_chain(event, hook, &payload).await else {
                continue;
            };
            match result {
                UserHookResult::Block { reason } => {
                    tracing::info!(tool = tool_name, "User hook blocked tool call: {}", reason);
                    return Ok(PreToolDecision::Block { reason });
                }
                UserHookResult::Continue { stdout } => {
                    let Some(out) = parse_in_chain::<GateOutput>(event, hook, &stdout) else {
                        continue;
                    };
                    if out.blocked {
                        return Ok(PreToolDecision::Block {
                            reason: out.reason.unwrap_or_else(|| "Blocked by hook".to_string()),
                        });
                    }
                    if let Some(new_input) = out.input {
                        current = new_input;
                        modified = true;
                    }
                }
                UserHookResult::Warn { message } => {
                    tracing::warn!(event = %event, tool = tool_name, "User hook warning: {}", message);
                }
            }
        }

        Ok(if modified {
            PreToolDecision::Modify { input: current }
        } else {
            PreToolDecision::Continue
        })
    }

    async fn after_tool_call(
        &self,
        ctx: &HookContext,
        tool_name: &str,
        input: &Value,
        call_id: &str,
        result: &StructuredToolResult,
    ) -> Result<Option<StructuredToolResult>> {
        let event = UserHookType::AfterToolCall;
        let mut replacement: Option<StructuredToolResult> = None;

        for hook in self.matching(event, Some(tool_name)) {
            let current = replacement.as_ref().unwrap_or(result);
            let payload = Self::payload(
                ctx,
                event,
                json!({
                    "tool_name": tool_name,
                    "tool_input": input,
                    "call_id": call_id,
                    "result": current,
                }),
            );
            let Some(result) = run_in_chain(event, hook, &payload).await else {
                continue;
            };
            match result {
                UserHookResult::Continue { stdout } => {
                    let Some(out) = parse_in_chain::<ToolResultOutput>(event, hook, &stdout) else {
                        continue;
                    };
                    if out.output.is_none() && out.error.is_none() {
                        continue;
                    }
                    let mut next = current.clone();
                    if let Some(output) = out.output {
                        next.output = output;
                    }
                    if let Some(error) = out.error {
                        next.success = false;
                        next.error = Some(error);
                    }
                    replacement = Some(next);
                }
                // Nothing left to block after the tool ran
                UserHookResult::Block { reason } | UserHookResult::Warn { message: reason } => {
                    tracing::warn!(event = %event, tool = tool_name, "User hook warning: {}", reason);
                }
            }
        }
        Ok(replacement)
    }

    async fn agent_stop(
        &self,
        ctx: &HookContext,
        transcript: &[TranscriptMessage],
    ) -> Result<Vec<String>> {
        let event = UserHookType::AgentStop;
        let payload = Self::payload(ctx, event, json!({ "transcript": transcript }));
        let mut follow_ups = Vec::new();

        for hook in self.matching(event, None) {
            let Some(result) = run_in_chain(event, hook, &payload).await else {
                continue;
            };
            match result {
                UserHookResult::Continue { stdout } => {
                    let Some(out) = parse_in_chain::<StopOutput>(event, hook, &stdout) else {
                        continue;
                    };
                    follow_ups.extend(out.follow_up_messages.into_iter().filter(|m| !m.is_empty()));
                }
                // Refusing to stop means the model should keep working on the reason
                UserHookResult::Block { reason } => follow_ups.push(reason),
                UserHookResult::Warn { message } => {
                    tracing::warn!(event = %event, "User hook warning: {}", message);
                }
            }
        }
        Ok(follow_ups)
    }
}
