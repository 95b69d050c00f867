//! Structured output: shaping requests and extracting typed answers.
//!
//! A [`ResponseFormat`] describes the JSON shape the caller wants back and one
//! of three ways to get it from the model:
//!
//! - **Native**: the provider enforces the schema and the answer is the message text.
//! - **Tool**: a hidden `_output` tool carries the answer as its arguments.
//! - **Prompted**: the schema is appended to the system prompt and the JSON is
//!   dug out of whatever text comes back.
//!
//! Every mode ends in the same validation step against the schema.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OutputError, SchemaError};
use crate::message::{ContentPart, Message};
use crate::provider::{ChatRequest, ToolDefinition};
use crate::schema::Schema;

/// Name of the hidden tool injected in [`ResponseFormatMode::Tool`].
pub const OUTPUT_TOOL_NAME: &str = "_output";

const DEFAULT_OUTPUT_DESCRIPTION: &str =
    "Structured output tool. Call this tool with your final answer. NEVER call other tools in the same response.";

/// How structured output is requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormatMode {
    Native,
    Tool,
    Prompted,
}

impl std::str::FromStr for ResponseFormatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "tool" => Ok(Self::Tool),
            "prompted" => Ok(Self::Prompted),
            other => Err(format!("unknown response format mode: {other}")),
        }
    }
}

/// The desired shape of a run's final answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseFormat {
    pub mode: ResponseFormatMode,
    pub name: String,
    pub description: String,
    pub schema: Schema,
}

impl ResponseFormat {
    pub fn new(mode: ResponseFormatMode, name: impl Into<String>, schema: Schema) -> Self {
        Self {
            mode,
            name: name.into(),
            description: String::new(),
            schema,
        }
    }

    /// Derive the format from a Rust type's JSON Schema.
    pub fn for_type<T: JsonSchema>(mode: ResponseFormatMode) -> Result<Self, SchemaError> {
        Ok(Self::new(mode, T::schema_name(), Schema::for_type::<T>()?))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The hidden tool used in tool mode.
    pub fn output_tool_definition(&self) -> ToolDefinition {
        let description = if self.description.is_empty() {
            DEFAULT_OUTPUT_DESCRIPTION
        } else {
            self.description.as_str()
        };
        let description = if self.name.is_empty() {
            description.to_string()
        } else {
            format!("{}: {}", self.name, description)
        };

        ToolDefinition {
            name: OUTPUT_TOOL_NAME.to_string(),
            description,
            input_schema: self.schema.document().clone(),
            output_schema: None,
        }
    }

    /// The instruction appended to the system prompt in prompted mode.
    pub fn prompted_suffix(&self) -> String {
        format!(
            "\n\nYou must respond with valid JSON matching this schema. Do not include any other text, only the JSON object.\n\nSchema:\n{}",
            self.schema.document()
        )
    }

    /// Decode and validate extracted text against the schema.
    fn validate(&self, raw: &str) -> Result<String, OutputError> {
        let value: Value = serde_json::from_str(raw).map_err(|e| OutputError::SchemaValidation {
            raw: raw.to_string(),
            reason: format!("invalid JSON: {e}"),
        })?;
        self.schema
            .validate(&value)
            .map_err(|e| OutputError::SchemaValidation {
                raw: raw.to_string(),
                reason: e.to_string(),
            })?;
        Ok(raw.to_string())
    }
}

/// Shape an outbound request for the format it carries.
///
/// Native mode is left to the provider, which sees `request.response_format`.
pub fn apply_response_format(request: &mut ChatRequest) {
    let Some(format) = &request.response_format else {
        return;
    };

    match format.mode {
        ResponseFormatMode::Native => {}
        ResponseFormatMode::Tool => {
            if !request.tools.iter().any(|t| t.name == OUTPUT_TOOL_NAME) {
                let definition = format.output_tool_definition();
                request.tools.push(definition);
            }
        }
        ResponseFormatMode::Prompted => {
            let suffix = format.prompted_suffix();
            request.system_prompt = Some(match request.system_prompt.take() {
                Some(prompt) => prompt + &suffix,
                None => suffix.trim_start().to_string(),
            });
        }
    }
}

/// Pull validated JSON text out of a response message.
///
/// `Ok(None)` means the model is still working: it asked for tools and has
/// not answered yet. In tool mode a lone `_output` call is rewritten into a
/// text part so the message reads like any other answer.
pub fn extract_structured_content(
    format: &ResponseFormat,
    message: &mut Message,
) -> Result<Option<String>, OutputError> {
    match format.mode {
        ResponseFormatMode::Native => {
            if message.has_tool_calls() {
                return Ok(None);
            }
            let text = message.text();
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(OutputError::NoContent { raw: text });
            }
            format.validate(trimmed).map(Some)
        }
        ResponseFormatMode::Prompted => {
            if message.has_tool_calls() {
                return Ok(None);
            }
            let text = message.text();
            match extract_json(&text) {
                Some(json) => format.validate(json).map(Some),
                None => Err(OutputError::NoContent { raw: text }),
            }
        }
        ResponseFormatMode::Tool => extract_from_output_tool(format, message),
    }
}

fn extract_from_output_tool(
    format: &ResponseFormat,
    message: &mut Message,
) -> Result<Option<String>, OutputError> {
    let output_calls = message
        .tool_calls
        .iter()
        .filter(|c| c.function.name == OUTPUT_TOOL_NAME)
        .count();

    let mut other_tools: Vec<String> = Vec::new();
    for call in &message.tool_calls {
        if call.function.name != OUTPUT_TOOL_NAME && !other_tools.contains(&call.function.name) {
            other_tools.push(call.function.name.clone());
        }
    }

    if output_calls == 0 {
        if other_tools.is_empty() {
            return Err(OutputError::ToolNotCalled {
                tool: OUTPUT_TOOL_NAME.to_string(),
            });
        }
        return Ok(None);
    }
    if !other_tools.is_empty() {
        return Err(OutputError::OutputToolMisuse {
            tool: OUTPUT_TOOL_NAME.to_string(),
            other_tools,
        });
    }
    if output_calls > 1 {
        return Err(OutputError::MultipleOutputCalls {
            tool: OUTPUT_TOOL_NAME.to_string(),
            count: output_calls,
        });
    }

    let call = message.tool_calls.remove(0);
    let text = Value::Object(call.function.arguments).to_string();
    message.content.push(ContentPart::text(text.clone()));
    format.validate(&text).map(Some)
}

/// Locate a JSON value inside free-form model text.
///
/// Tries the trimmed text, then the first fenced code block, then the first
/// balanced `{...}` or `[...]` span.
pub fn extract_json(text: &str) -> Option<&str> {
    let text = text.trim();
    if is_valid_json(text) {
        return Some(text);
    }

    if let Some(candidate) = fenced_block(text) {
        if is_valid_json(candidate) {
            return Some(candidate);
        }
    }

    let start_obj = text.find('{');
    let start_arr = text.find('[');
    let (start, open, close) = match (start_obj, start_arr) {
        (Some(o), Some(a)) if a < o => (a, '[', ']'),
        (Some(o), _) => (o, '{', '}'),
        (None, Some(a)) => (a, '[', ']'),
        (None, None) => return None,
    };

    let end = matching_brace(&text[start..], open, close)?;
    let candidate = &text[start..=start + end];
    is_valid_json(candidate).then_some(candidate)
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")? + 3;
    let rest = &text[start..];
    let end = rest.find("```")?;
    let inner = &rest[..end];
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    Some(inner.trim())
}

/// Byte offset of the brace closing the one at the start of `s`.
fn matching_brace(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if c == '\\' && in_string {
            escape = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        if c == open {
            depth += 1;
        } else if c == close {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

fn is_valid_json(s: &str) -> bool {
    !s.is_empty() && serde_json::from_str::<serde::de::IgnoredAny>(s).is_ok()
}
