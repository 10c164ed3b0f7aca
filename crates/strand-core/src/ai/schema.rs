//! Tool schema translation
//!
//! Converts internal `ToolSchema` trees into the function-declaration shape
//! most vendors accept. Translation is recursive and keeps property order.

use serde_json::{json, Map, Value};

use crate::ai::types::{AiTool, ToolSchema};

/// Wire type names understood by function-calling vendors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl WireType {
    /// Map a JSON Schema type name. Unknown names become `String`.
    pub fn from_schema_type(schema_type: &str) -> Self {
        match schema_type.to_ascii_lowercase().as_str() {
            "string" => WireType::String,
            "number" => WireType::Number,
            "integer" => WireType::Integer,
            "boolean" => WireType::Boolean,
            "array" => WireType::Array,
            "object" => WireType::Object,
            _ => WireType::String,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WireType::String => "STRING",
            WireType::Number => "NUMBER",
            WireType::Integer => "INTEGER",
            WireType::Boolean => "BOOLEAN",
            WireType::Array => "ARRAY",
            WireType::Object => "OBJECT",
        }
    }
}

/// Translate one schema node and its children
pub fn translate_schema(schema: &ToolSchema) -> Value {
    let mut out = Map::new();
    out.insert(
        "type".to_string(),
        Value::String(WireType::from_schema_type(&schema.schema_type).as_str().to_string()),
    );

    if let Some(description) = schema.description.as_deref().filter(|d| !d.is_empty()) {
        out.insert(
            "description".to_string(),
            Value::String(description.to_string()),
        );
    }

    if !schema.properties.is_empty() {
        let mut props = Map::new();
        for (name, prop) in &schema.properties {
            props.insert(name.clone(), translate_schema(prop));
        }
        out.insert("properties".to_string(), Value::Object(props));
    }

    if !schema.required.is_empty() {
        out.insert(
            "required".to_string(),
            Value::Array(schema.required.iter().cloned().map(Value::String).collect()),
        );
    }

    if let Some(items) = &schema.items {
        out.insert("items".to_string(), translate_schema(items));
    }

    Value::Object(out)
}

/// Group all tools under a single declaration block
pub fn translate_tools(tools: &[AiTool]) -> Value {
    if tools.is_empty() {
        return Value::Array(Vec::new());
    }

    let declarations: Vec<Value> = tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": translate_schema(&tool.input_schema),
            })
        })
        .collect();

    json!([{ "functionDeclarations": declarations }])
}
