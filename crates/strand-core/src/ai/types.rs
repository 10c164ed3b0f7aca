//! Canonical AI types
//!
//! Provider-agnostic message model shared by the thread, the provider adapters
//! and the conversation store. Adapters translate these to their wire format.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome reported by a provider-side (built-in) code execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Ok,
    Failed,
    DeadlineExceeded,
    #[default]
    Unspecified,
}

/// Render a built-in execution result the way it is shown to the model
pub fn render_execution_result(output: &str, outcome: ExecutionOutcome) -> String {
    let mut rendered = format!("Code execution result:\n{}", output);
    if outcome == ExecutionOutcome::Unspecified {
        rendered.push_str("\nOutcome: Unspecified");
    }
    rendered
}

/// One element of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    /// Reasoning text. Kept in raw storage, skipped in transcripts.
    Thinking {
        text: String,
    },
    /// Inline image, base64 encoded
    Image {
        mime_type: String,
        data: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        call_id: String,
        name: String,
        result: String,
        is_error: bool,
    },
    ExecutionResult {
        output: String,
        outcome: ExecutionOutcome,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Part::Thinking { text: text.into() }
    }
}

/// A role plus an ordered list of parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    /// Single text part user message
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    /// Single text part assistant message
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![Part::text(text)])
    }

    /// Tool calls requested in this message, in order
    pub fn tool_calls(&self) -> impl Iterator<Item = ToolCall> + '_ {
        self.parts.iter().filter_map(|p| match p {
            Part::ToolCall {
                id,
                name,
                arguments,
            } => Some(ToolCall {
                id: id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
            }),
            _ => None,
        })
    }

    /// Concatenated plain text of the message
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: generate_tool_call_id(),
            name: name.into(),
            arguments,
        }
    }

    pub fn to_part(&self) -> Part {
        Part::ToolCall {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments: self.arguments.clone(),
        }
    }
}

static FALLBACK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate an opaque tool call id (`call_` + 16 hex chars).
///
/// Falls back to a timestamp plus process-local counter when the OS random
/// source is unavailable. The fallback is best-effort unique only.
pub fn generate_tool_call_id() -> String {
    let mut bytes = [0u8; 8];
    match rand::rngs::OsRng.try_fill_bytes(&mut bytes) {
        Ok(()) => {
            let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            format!("call_{}", hex)
        }
        Err(e) => {
            tracing::warn!(error = %e, "OS random source unavailable, using timestamp tool call id");
            let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
            let seq = FALLBACK_COUNTER.fetch_add(1, Ordering::Relaxed);
            format!("call_{}_{}", nanos, seq)
        }
    }
}

/// Flattened `{role, content}` view of the history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: String,
    pub content: String,
}

impl TranscriptMessage {
    fn new(role: Role, content: String) -> Self {
        Self {
            role: role.as_str().to_string(),
            content,
        }
    }
}

/// Convert message history into a flat transcript.
///
/// Thinking and image parts are skipped. Tool calls and tool results are
/// rendered as text so hooks and summarizers can read them.
pub fn to_transcript(messages: &[Message]) -> Vec<TranscriptMessage> {
    let mut transcript = Vec::new();
    for message in messages {
        for part in &message.parts {
            match part {
                Part::Text { text } if !text.is_empty() => {
                    transcript.push(TranscriptMessage::new(message.role, text.clone()));
                }
                Part::ToolCall {
                    name, arguments, ..
                } => {
                    transcript.push(TranscriptMessage::new(
                        Role::Assistant,
                        format!("Using tool: {} with input: {}", name, arguments),
                    ));
                }
                Part::ToolResult {
                    call_id,
                    result,
                    is_error,
                    ..
                } => {
                    let payload = serde_json::json!({
                        "call_id": call_id,
                        "result": result,
                        "error": is_error,
                    });
                    transcript.push(TranscriptMessage::new(
                        Role::User,
                        format!("Tool result:\n{}", payload),
                    ));
                }
                Part::ExecutionResult { output, outcome } => {
                    transcript.push(TranscriptMessage::new(
                        Role::Assistant,
                        render_execution_result(output, *outcome),
                    ));
                }
                Part::Text { .. } | Part::Thinking { .. } | Part::Image { .. } => {}
            }
        }
    }
    transcript
}

/// Cumulative usage snapshot reported by a provider for one exchange
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub prompt_tokens: u64,
    pub response_tokens: u64,
    pub cached_tokens: u64,
    pub total_tokens: u64,
}

/// Per-million-token pricing for a model
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> (f64, f64) {
        (
            input_tokens as f64 * self.input_per_million / 1_000_000.0,
            output_tokens as f64 * self.output_per_million / 1_000_000.0,
        )
    }
}

/// Thread-level usage counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub cache_creation_cost: f64,
    pub cache_read_cost: f64,
    pub current_context_window: u64,
    pub max_context_window: u64,
}

impl UsageStats {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens
            + self.output_tokens
            + self.cache_creation_input_tokens
            + self.cache_read_input_tokens
    }

    pub fn total_cost(&self) -> f64 {
        self.input_cost + self.output_cost + self.cache_creation_cost + self.cache_read_cost
    }

    /// Fold one exchange's snapshot into the counters.
    ///
    /// `context_window` is only consulted while `max_context_window` is unset.
    pub fn apply(&mut self, snapshot: &UsageSnapshot, pricing: ModelPricing, context_window: u64) {
        let (input_cost, output_cost) =
            pricing.cost(snapshot.prompt_tokens, snapshot.response_tokens);

        self.input_tokens += snapshot.prompt_tokens;
        self.output_tokens += snapshot.response_tokens;
        self.cache_read_input_tokens += snapshot.cached_tokens;
        self.input_cost += input_cost;
        self.output_cost += output_cost;

        if self.max_context_window == 0 {
            self.max_context_window = context_window;
        }

        self.current_context_window =
            self.input_tokens + self.output_tokens + self.cache_read_input_tokens;
    }

    /// Add a helper thread's token counts and costs.
    ///
    /// Context window figures stay per-thread so auto-compaction decisions are
    /// not skewed by helper work.
    pub fn aggregate(&mut self, other: &UsageStats) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_input_tokens += other.cache_creation_input_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
        self.input_cost += other.input_cost;
        self.output_cost += other.output_cost;
        self.cache_creation_cost += other.cache_creation_cost;
        self.cache_read_cost += other.cache_read_cost;
    }
}

/// Internal tool parameter schema.
///
/// Properties keep their insertion order, which adapters must preserve when
/// translating to a vendor format.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolSchema {
    pub schema_type: String,
    pub description: Option<String>,
    pub properties: Vec<(String, ToolSchema)>,
    pub required: Vec<String>,
    pub items: Option<Box<ToolSchema>>,
}

impl ToolSchema {
    pub fn of_type(schema_type: impl Into<String>) -> Self {
        Self {
            schema_type: schema_type.into(),
            ..Default::default()
        }
    }

    pub fn object() -> Self {
        Self::of_type("object")
    }

    pub fn string() -> Self {
        Self::of_type("string")
    }

    pub fn integer() -> Self {
        Self::of_type("integer")
    }

    pub fn boolean() -> Self {
        Self::of_type("boolean")
    }

    pub fn array(items: ToolSchema) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::of_type("array")
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn property(mut self, name: impl Into<String>, schema: ToolSchema) -> Self {
        self.properties.push((name.into(), schema));
        self
    }

    pub fn require<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required.extend(names.into_iter().map(Into::into));
        self
    }

    /// Parse a JSON Schema document. Unknown keywords are ignored.
    pub fn from_json_schema(value: &Value) -> Self {
        let schema_type = value
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("object")
            .to_string();
        let description = value
            .get("description")
            .and_then(|d| d.as_str())
            .map(str::to_string);
        let properties = value
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|props| {
                props
                    .iter()
                    .map(|(name, schema)| (name.clone(), Self::from_json_schema(schema)))
                    .collect()
            })
            .unwrap_or_default();
        let required = value
            .get("required")
            .and_then(|r| r.as_array())
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let items = value
            .get("items")
            .map(|items| Box::new(Self::from_json_schema(items)));

        Self {
            schema_type,
            description,
            properties,
            required,
            items,
        }
    }

    /// Render as a JSON Schema document, properties in declaration order
    pub fn to_json_schema(&self) -> Value {
        let mut schema = serde_json::Map::new();
        schema.insert("type".to_string(), Value::String(self.schema_type.clone()));
        if let Some(description) = &self.description {
            schema.insert(
                "description".to_string(),
                Value::String(description.clone()),
            );
        }
        if !self.properties.is_empty() {
            let mut props = serde_json::Map::new();
            for (name, prop) in &self.properties {
                props.insert(name.clone(), prop.to_json_schema());
            }
            schema.insert("properties".to_string(), Value::Object(props));
        }
        if !self.required.is_empty() {
            schema.insert(
                "required".to_string(),
                Value::Array(self.required.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(items) = &self.items {
            schema.insert("items".to_string(), items.to_json_schema());
        }
        Value::Object(schema)
    }
}

/// Tool declaration offered to the model
#[derive(Debug, Clone, PartialEq)]
pub struct AiTool {
    pub name: String,
    pub description: String,
    pub input_schema: ToolSchema,
}
