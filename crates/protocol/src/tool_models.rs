//! Tool descriptors and results exchanged with tool clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool a client can invoke.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the tool arguments.
    #[serde(default, rename = "inputSchema", alias = "input_schema")]
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: Value::Object(Default::default()),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }
}

/// Structured result of a successful tool call.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub content: Value,
    #[serde(default)]
    pub metadata: Value,
}

impl ToolResult {
    pub fn new(content: Value) -> Self {
        Self {
            content,
            metadata: Value::Null,
        }
    }
}

/// A tool call requested by an agent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolRequest {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}
