//! Tool trait: the untyped tool execution surface.
//!
//! Tools built outside the typed agent API (built-ins, adapters for external
//! tool protocols) implement this trait. They receive decoded arguments and
//! are trusted to have validated them on their own terms.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ToolError;
use crate::message::{ContentPart, Message};
use crate::provider::ToolDefinition;

/// The result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The output content shown to the model
    pub content: Vec<ContentPart>,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,

    /// Whether the tool reported a failure
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    /// A successful plain-text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::text(text)],
            structured_content: None,
            is_error: false,
        }
    }

    /// A successful structured result; the text content is the JSON encoding.
    pub fn structured(value: Value) -> Self {
        Self {
            content: vec![ContentPart::text(value.to_string())],
            structured_content: Some(value),
            is_error: false,
        }
    }

    /// An error-flagged result the model can read and react to.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::text(text)],
            structured_content: None,
            is_error: true,
        }
    }

    /// Turn this result into the tool message answering `tool_call_id`.
    pub fn into_message(self, tool_call_id: impl Into<String>) -> Message {
        let mut msg = Message::tool_result(tool_call_id, "");
        msg.content = self.content;
        msg
    }
}

/// The untyped Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "calculator").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's arguments.
    fn input_schema(&self) -> Value;

    /// JSON Schema describing this tool's structured result, if it has one.
    fn output_schema(&self) -> Option<Value> {
        None
    }

    /// Execute the tool with decoded arguments.
    ///
    /// Return `ToolError::Retry` to ask the model to try again.
    async fn execute(&self, arguments: &Map<String, Value>) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
            output_schema: self.output_schema(),
        }
    }
}
