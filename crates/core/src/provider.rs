//! Provider trait: the abstraction over chat transports.
//!
//! A Provider knows how to send a conversation to an LLM and get a response
//! back, either as a complete response or as a stream of deltas.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;
use crate::message::{Message, Role};
use crate::response_format::ResponseFormat;

/// Receiving half of a streamed response.
pub type ChunkReceiver = tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// Configuration for a chat request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// System instructions, sent ahead of the messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Temperature (0.0 = deterministic)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Number of choices to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// How the model may use the tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// Desired shape of the final answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            system_prompt: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            n: None,
            tools: Vec::new(),
            tool_choice: None,
            response_format: None,
            stop: Vec::new(),
        }
    }
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's arguments
    pub input_schema: Value,

    /// JSON Schema describing the tool's result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

/// Controls whether and which tools the model calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Function(String),
}

/// One generated alternative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,

    pub message: Message,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    /// Validated JSON text extracted for the active response format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<String>,
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: String,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    pub choices: Vec<Choice>,

    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// A single-choice response, the common case.
    pub fn single(model: impl Into<String>, message: Message, usage: Option<Usage>) -> Self {
        Self {
            id: String::new(),
            model: model.into(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: None,
                structured_content: None,
            }],
            usage,
        }
    }

    pub fn first(&self) -> Option<&Choice> {
        self.choices.first()
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// How embedding vectors are encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingFormat {
    Float,
    Base64,
}

/// A request to embed one or more inputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingRequest {
    pub model: String,

    /// Texts to embed; one vector comes back per input
    pub input: Vec<String>,

    /// Output dimensionality, for models that support shortening
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_format: Option<EncodingFormat>,
}

impl EmbeddingRequest {
    pub fn new(model: impl Into<String>, input: Vec<String>) -> Self {
        Self {
            model: model.into(),
            input,
            dimensions: None,
            encoding_format: None,
        }
    }

    pub fn with_dimensions(mut self, dimensions: u32) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn with_encoding_format(mut self, format: EncodingFormat) -> Self {
        self.encoding_format = Some(format);
        self
    }
}

/// One embedding vector, positioned by its input index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub index: u32,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub model: String,

    /// Sorted by `index`
    pub embeddings: Vec<Embedding>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A partial tool call in a streamed delta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Position of the call in the final message
    pub index: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Fragment of the JSON argument text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// A partial message in a streamed delta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDelta>,
}

/// One choice's share of a stream chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChoice {
    pub index: u32,

    #[serde(default)]
    pub delta: MessageDelta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub choices: Vec<StreamChoice>,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    /// Rebuild a single chunk carrying everything in a complete response.
    pub fn from_response(response: &ChatResponse) -> Self {
        let choices = response
            .choices
            .iter()
            .map(|choice| StreamChoice {
                index: choice.index,
                delta: MessageDelta {
                    role: Some(choice.message.role),
                    content: Some(choice.message.text()).filter(|t| !t.is_empty()),
                    refusal: choice.message.refusal(),
                    tool_calls: choice
                        .message
                        .tool_calls
                        .iter()
                        .enumerate()
                        .map(|(i, call)| ToolCallDelta {
                            index: i as u32,
                            id: Some(call.id.clone()),
                            name: Some(call.function.name.clone()),
                            arguments: Some(Value::Object(call.function.arguments.clone()).to_string()),
                        })
                        .collect(),
                },
                finish_reason: choice.finish_reason.clone(),
            })
            .collect();

        Self {
            id: response.id.clone(),
            model: response.model.clone(),
            choices,
            usage: response.usage,
        }
    }
}

/// The core Provider trait.
///
/// Every chat backend implements this trait. The run loop calls `complete()`
/// without knowing which provider is being used.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "openrouter").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ChatRequest) -> std::result::Result<ChatResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(&self, request: ChatRequest) -> std::result::Result<ChunkReceiver, ProviderError> {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx.send(Ok(StreamChunk::from_response(&response))).await;
        Ok(rx)
    }

    /// Embed the request's inputs.
    ///
    /// Chat-only providers keep the default, which reports the operation as unsupported.
    async fn embed(&self, request: EmbeddingRequest) -> std::result::Result<EmbeddingResponse, ProviderError> {
        Err(ProviderError::Unsupported(format!(
            "{} does not offer embeddings (model {})",
            self.name(),
            request.model
        )))
    }

    /// List available models for this provider.
    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCall;
    use serde_json::json;

    struct EchoProvider;

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            let text = request.messages.last().map(|m| m.text()).unwrap_or_default();
            let mut message = Message::assistant(text);
            message.tool_calls.push(ToolCall::from_json("call_1", "lookup", json!({"q": "rust"})));
            Ok(ChatResponse::single(request.model, message, Some(Usage::new(3, 2))))
        }
    }

    #[test]
    fn request_defaults() {
        let req = ChatRequest::new("gpt-4o-mini", vec![Message::user("hi")]);
        assert!(req.temperature.is_none());
        assert!(req.tools.is_empty());
        assert!(req.response_format.is_none());
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total += Usage::new(10, 5);
        total += Usage::new(1, 2);
        assert_eq!(total, Usage { prompt_tokens: 11, completion_tokens: 7, total_tokens: 18 });
    }

    #[test]
    fn tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "lookup".into(),
            description: "Look something up".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "q": { "type": "string" } },
                "required": ["q"]
            }),
            output_schema: None,
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("lookup"));
        assert!(!json.contains("output_schema"));
    }

    #[tokio::test]
    async fn default_stream_wraps_complete() {
        let provider = EchoProvider;
        let mut rx = provider
            .stream(ChatRequest::new("m", vec![Message::user("ping")]))
            .await
            .unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert!(rx.recv().await.is_none());

        let delta = &chunk.choices[0].delta;
        assert_eq!(delta.role, Some(Role::Assistant));
        assert_eq!(delta.content.as_deref(), Some("ping"));
        assert_eq!(delta.tool_calls[0].arguments.as_deref(), Some(r#"{"q":"rust"}"#));
        assert_eq!(chunk.usage, Some(Usage::new(3, 2)));
    }

    #[tokio::test]
    async fn embed_is_unsupported_by_default() {
        let err = EchoProvider
            .embed(EmbeddingRequest::new("text-embedding-3-small", vec!["hi".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported(_)));
        assert!(err.to_string().contains("echo"));
    }

    #[test]
    fn embedding_request_omits_unset_options() {
        let request = EmbeddingRequest::new("m", vec!["a".into(), "b".into()]);
        assert_eq!(serde_json::to_value(&request).unwrap(), json!({"model": "m", "input": ["a", "b"]}));

        let request = request.with_dimensions(256).with_encoding_format(EncodingFormat::Base64);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["dimensions"], 256);
        assert_eq!(value["encoding_format"], "base64");
    }
}
