//! Shared test helpers for run loop tests.

use std::sync::Mutex;

use serde_json::Value;
use typeclaw_core::error::ProviderError;
use typeclaw_core::message::{Message, ToolCall};
use typeclaw_core::provider::{ChatRequest, ChatResponse, Provider, Usage};

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue and
/// records the request it was given. Running out of responses is an error.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<ChatResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Requests received so far, after response format augmentation.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let count = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let responses = self.responses.lock().unwrap();
        responses.get(count - 1).cloned().ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "no more responses (call #{count}, have {})",
                responses.len()
            ))
        })
    }
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> ChatResponse {
    ChatResponse::single("mock-model", Message::assistant(text), Some(Usage::new(10, 5)))
}

/// Create a response with one tool call.
pub fn make_tool_call(id: &str, name: &str, arguments: Value) -> ChatResponse {
    make_tool_calls(vec![ToolCall::from_json(id, name, arguments)])
}

/// Create a response with several tool calls in one turn.
pub fn make_tool_calls(calls: Vec<ToolCall>) -> ChatResponse {
    ChatResponse::single("mock-model", Message::assistant_tool_calls("", calls), Some(Usage::new(20, 10)))
}
