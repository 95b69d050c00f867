//! Reassembly of streamed responses.
//!
//! Providers stream a response as an ordered series of [`StreamChunk`]s, each
//! carrying fragments of text, refusal text and tool-call arguments. The
//! accumulators here fold those fragments back into complete messages.
//!
//! Neither accumulator synchronizes internally: feed them from one producer,
//! in delivery order.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::StreamError;
use crate::message::{ContentPart, Message, Role, ToolCall, ToolFunction};
use crate::provider::{ChatResponse, Choice, MessageDelta, StreamChunk, Usage};

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Folds message deltas for a single choice into one [`Message`].
#[derive(Debug, Default)]
pub struct MessageAccumulator {
    role: Option<Role>,
    content: String,
    refusal: String,
    tool_calls: BTreeMap<u32, PartialToolCall>,
}

impl MessageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one delta. Absent fields leave earlier state untouched.
    pub fn push(&mut self, delta: &MessageDelta) {
        if let Some(role) = delta.role {
            self.role = Some(role);
        }
        if let Some(content) = &delta.content {
            self.content.push_str(content);
        }
        if let Some(refusal) = &delta.refusal {
            self.refusal.push_str(refusal);
        }
        for fragment in &delta.tool_calls {
            let call = self.tool_calls.entry(fragment.index).or_default();
            if let Some(id) = fragment.id.as_deref().filter(|id| !id.is_empty()) {
                call.id = id.to_string();
            }
            if let Some(name) = fragment.name.as_deref().filter(|n| !n.is_empty()) {
                call.name = name.to_string();
            }
            if let Some(arguments) = &fragment.arguments {
                call.arguments.push_str(arguments);
            }
        }
    }

    /// Text received so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Build the final message, with tool calls in index order.
    ///
    /// Argument text that is not a JSON object fails the whole message.
    pub fn finish(self) -> Result<Message, StreamError> {
        let mut content = Vec::new();
        if !self.content.is_empty() {
            content.push(ContentPart::text(self.content));
        }
        if !self.refusal.is_empty() {
            content.push(ContentPart::Refusal {
                refusal: self.refusal,
            });
        }

        let mut tool_calls = Vec::with_capacity(self.tool_calls.len());
        for (index, call) in self.tool_calls {
            tool_calls.push(ToolCall {
                id: call.id,
                function: ToolFunction {
                    name: call.name,
                    arguments: decode_arguments(index, &call.arguments)?,
                },
            });
        }

        Ok(Message {
            role: self.role.unwrap_or(Role::Assistant),
            content,
            tool_calls,
            tool_call_id: None,
        })
    }
}

fn decode_arguments(index: u32, text: &str) -> Result<Map<String, Value>, StreamError> {
    if text.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(StreamError::InvalidToolArguments {
            index,
            reason: format!("expected a JSON object, got {other}"),
        }),
        Err(e) => Err(StreamError::InvalidToolArguments {
            index,
            reason: e.to_string(),
        }),
    }
}

#[derive(Debug, Default)]
struct ChoiceState {
    message: MessageAccumulator,
    finish_reason: Option<String>,
}

/// Folds whole stream chunks, one [`MessageAccumulator`] per choice index.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    id: String,
    model: String,
    choices: BTreeMap<u32, ChoiceState>,
    usage: Option<Usage>,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &StreamChunk) {
        if !chunk.id.is_empty() {
            self.id.clone_from(&chunk.id);
        }
        if !chunk.model.is_empty() {
            self.model.clone_from(&chunk.model);
        }
        for choice in &chunk.choices {
            let state = self.choices.entry(choice.index).or_default();
            state.message.push(&choice.delta);
            if let Some(reason) = &choice.finish_reason {
                state.finish_reason = Some(reason.clone());
            }
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }
    }

    /// Build the final response with choices in index order.
    pub fn finish(self) -> Result<ChatResponse, StreamError> {
        if self.choices.is_empty() {
            return Err(StreamError::NoChoices);
        }

        let mut choices = Vec::with_capacity(self.choices.len());
        for (index, state) in self.choices {
            choices.push(Choice {
                index,
                message: state.message.finish()?,
                finish_reason: state.finish_reason,
                structured_content: None,
            });
        }

        Ok(ChatResponse {
            id: self.id,
            model: self.model,
            choices,
            usage: self.usage,
        })
    }
}
