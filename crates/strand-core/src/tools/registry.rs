//! Tool registry for managing available tools
//!
//! Tools are looked up by name and executed with a per-call timeout. Hook
//! gating happens one level up, in the thread's tool dispatcher.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::ai::types::{AiTool, ToolSchema};
use crate::constants;
use crate::tools::state::SessionState;

/// Tool execution result
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub output: String,
    pub is_error: bool,
}

impl ToolResult {
    /// Create a success result
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    /// Create a structured success envelope with `ok=true` and `data`.
    pub fn success_data(data: Value) -> Self {
        let envelope = serde_json::json!({ "ok": true, "data": data });
        Self {
            output: envelope.to_string(),
            is_error: false,
        }
    }

    /// Create a structured error with explicit code.
    pub fn error_with_code(code: &str, msg: impl std::fmt::Display) -> Self {
        let envelope = serde_json::json!({
            "ok": false,
            "error": {
                "code": code,
                "message": msg.to_string()
            }
        });
        Self {
            output: envelope.to_string(),
            is_error: true,
        }
    }

    /// Create an invalid-parameters error.
    pub fn invalid_parameters(msg: impl std::fmt::Display) -> Self {
        Self::error_with_code("invalid_parameters", msg)
    }

    /// Synthetic result for a call refused by a `before_tool_call` hook
    pub fn blocked(tool_name: &str, reason: &str) -> Self {
        Self::error_with_code(
            "blocked_by_policy",
            format!("Tool '{}' was blocked by hook: {}", tool_name, reason),
        )
    }

    /// Create an error result with JSON-formatted error message
    pub fn error(msg: impl std::fmt::Display) -> Self {
        let message = msg.to_string();
        let code = classify_error_code(&message);
        Self::error_with_code(code, message)
    }

    /// Structured form kept in the thread's tool-result map
    pub fn structured(&self, tool_name: &str) -> StructuredToolResult {
        StructuredToolResult {
            tool_name: tool_name.to_string(),
            success: !self.is_error,
            error: if self.is_error {
                Some(error_message(&self.output))
            } else {
                None
            },
            output: self.output.clone(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }
}

/// Structured tool outcome, persisted alongside the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredToolResult {
    pub tool_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Model-facing rendering
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl StructuredToolResult {
    pub fn is_error(&self) -> bool {
        !self.success
    }

    /// Text sent back to the model for this result
    pub fn assistant_facing(&self) -> String {
        match &self.error {
            Some(error) => format!("<error>\n{}\n</error>", error),
            None => format!("<result>\n{}\n</result>", self.output),
        }
    }
}

/// Parse tool parameters, returning a ToolResult error on failure
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolResult> {
    serde_json::from_value(params)
        .map_err(|e| ToolResult::invalid_parameters(format!("Invalid parameters: {}", e)))
}

fn classify_error_code(message: &str) -> &'static str {
    let lower = message.to_ascii_lowercase();
    if lower.contains("invalid parameters")
        || lower.contains("missing field")
        || lower.contains("unknown field")
    {
        "invalid_parameters"
    } else if lower.contains("timed out") || lower.contains("timeout") {
        "timeout"
    } else if lower.contains("denied") {
        "permission_denied"
    } else if lower.contains("unknown tool") {
        "unknown_tool"
    } else {
        "tool_error"
    }
}

/// Pull the message out of an error envelope, or use the raw output
fn error_message(output: &str) -> String {
    serde_json::from_str::<Value>(output)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| output.to_string())
}

/// Context for tool execution
#[derive(Clone)]
pub struct ToolContext {
    pub working_dir: PathBuf,
    /// Id of the model's tool call being served
    pub tool_call_id: Option<String>,
    /// Optional per-call timeout override
    pub timeout: Option<Duration>,
    /// Shared session state (file access, background processes)
    pub state: Option<Arc<SessionState>>,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            tool_call_id: None,
            timeout: None,
            state: None,
        }
    }
}

impl ToolContext {
    /// Context bound to a session's state and working directory
    pub fn for_state(state: Arc<SessionState>) -> Self {
        Self {
            working_dir: state.working_dir().to_path_buf(),
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn with_tool_call_id(mut self, id: impl Into<String>) -> Self {
        self.tool_call_id = Some(id.into());
        self
    }

    /// Resolve a path relative to working directory (absolute paths pass through)
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.working_dir.join(p)
        }
    }
}

/// Trait for tool implementations
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (id)
    fn name(&self) -> &str;

    /// Tool description for AI
    fn description(&self) -> &str;

    /// Schema for parameters
    fn parameters_schema(&self) -> ToolSchema;

    /// Execute the tool
    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult;
}

/// Registry for managing tools
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
    /// Default timeout for tool execution
    default_timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
            default_timeout: constants::TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register a tool
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().await;
        tools.insert(name, tool);
    }

    /// Get a tool by name
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().await;
        tools.get(name).cloned()
    }

    /// Get all tools as AI tool definitions, sorted by name
    pub async fn get_ai_tools(&self) -> Vec<AiTool> {
        let tools = self.tools.read().await;
        let mut declared: Vec<AiTool> = tools
            .values()
            .map(|t| AiTool {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.parameters_schema(),
            })
            .collect();
        declared.sort_by(|a, b| a.name.cmp(&b.name));
        declared
    }

    /// Execute a tool by name with timeout
    pub async fn execute(&self, name: &str, params: Value, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.get(name).await else {
            tracing::warn!(tool = name, "Model requested an unknown tool");
            return ToolResult::error_with_code("unknown_tool", format!("Unknown tool: {}", name));
        };

        let timeout = ctx.timeout.unwrap_or(self.default_timeout);
        let start = Instant::now();

        let result = match tokio::time::timeout(timeout, tool.execute(params, ctx)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    tool = name,
                    timeout_secs = timeout.as_secs(),
                    "Tool execution timed out"
                );
                ToolResult::error_with_code(
                    "timeout",
                    format!(
                        "Tool '{}' timed out after {} seconds",
                        name,
                        timeout.as_secs()
                    ),
                )
            }
        };

        tracing::info!(
            tool = name,
            duration_ms = start.elapsed().as_millis() as u64,
            is_error = result.is_error,
            "Tool execution completed"
        );

        result
    }
}
