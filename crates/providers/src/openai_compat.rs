//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, Groq and any
//! endpoint exposing `/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE), including `n > 1`
//! - Embeddings via `/embeddings`, as float or base64 vectors
//! - Tool use / function calling and tool choice
//! - Native structured output via `response_format: json_schema`
//! - Image inputs (inline bytes are sent as base64 data URLs)
//! - Retries with backoff for rate limits, 5xx responses and network errors

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use typeclaw_core::error::ProviderError;
use typeclaw_core::message::{ContentPart, ImageDetail, Message, Role, ToolCall};
use typeclaw_core::provider::{
    ChatRequest, ChatResponse, Choice, ChunkReceiver, Embedding, EmbeddingRequest, EmbeddingResponse, MessageDelta,
    StreamChoice, StreamChunk, ToolCallDelta, ToolChoice, ToolDefinition, Usage,
};
use typeclaw_core::response_format::{ResponseFormat, ResponseFormatMode};

const CHAT_PATH: &str = "chat/completions";
const EMBEDDINGS_PATH: &str = "embeddings";

/// How transient transport failures are retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Time allowed for one attempt to produce response headers
    pub attempt_timeout: Duration,

    /// Time allowed for all attempts together, backoff included
    pub total_timeout: Duration,

    /// First backoff delay; doubles on every retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            attempt_timeout: Duration::from_secs(60),
            total_timeout: Duration::from_secs(300),
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32, error: &ProviderError) -> Duration {
        match error {
            ProviderError::RateLimited { retry_after_secs } => Duration::from_secs(*retry_after_secs),
            _ => self.base_delay * 2u32.saturating_pow(attempt),
        }
    }
}

/// An OpenAI-compatible LLM provider.
///
/// This handles the vast majority of LLM providers since most expose
/// an OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    headers: HashMap<String, String>,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            headers: HashMap::new(),
            retry: RetryPolicy::default(),
            client: reqwest::Client::new(),
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new("ollama", base_url.unwrap_or("http://localhost:11434/v1"), "")
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Extra headers sent with every request.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the JSON body for `/chat/completions`.
    fn request_body(request: &ChatRequest, stream: bool) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system_prompt {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.extend(request.messages.iter().map(to_api_message));

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(n) = request.n {
            body["n"] = json!(n);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools.iter().map(to_api_tool).collect::<Vec<_>>());
        }
        if let Some(choice) = &request.tool_choice {
            body["tool_choice"] = to_api_tool_choice(choice);
        }
        if let Some(format) = request
            .response_format
            .as_ref()
            .filter(|f| f.mode == ResponseFormatMode::Native)
        {
            body["response_format"] = to_api_response_format(format);
        }
        if !request.stop.is_empty() {
            body["stop"] = json!(request.stop);
        }

        body
    }

    /// Build the JSON body for `/embeddings`.
    fn embedding_body(request: &EmbeddingRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "input": request.input,
        });
        if let Some(dimensions) = request.dimensions {
            body["dimensions"] = json!(dimensions);
        }
        if let Some(format) = request.encoding_format {
            body["encoding_format"] = json!(format);
        }
        body
    }

    /// Send with retries. The attempt timeout covers the wait for response headers.
    async fn send(&self, path: &str, body: &Value, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let deadline = Instant::now() + self.retry.total_timeout;
        let mut attempt = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProviderError::Timeout(format!(
                    "gave up after {}s",
                    self.retry.total_timeout.as_secs()
                )));
            }

            let timeout = self.retry.attempt_timeout.min(remaining);
            let error = match self.send_once(path, body, stream, timeout).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };
            if !error.is_transient() || attempt >= self.retry.max_retries {
                return Err(error);
            }

            let delay = self.retry.delay(attempt, &error);
            if delay >= deadline.saturating_duration_since(Instant::now()) {
                return Err(error);
            }
            attempt += 1;
            warn!(provider = %self.name, attempt, error = %error, "Retrying request in {delay:?}");
            tokio::time::sleep(delay).await;
        }
    }

    async fn send_once(
        &self,
        path: &str,
        body: &Value,
        stream: bool,
        timeout: Duration,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/{path}", self.base_url);
        let mut builder = self.client.post(&url).header("Content-Type", "application/json").json(body);
        if !self.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }

        let response = tokio::time::timeout(timeout, builder.send())
            .await
            .map_err(|_| ProviderError::Timeout(format!("no response within {}s", timeout.as_secs())))?
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl typeclaw_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = Self::request_body(&request, false);
        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self.send(CHAT_PATH, &body, false).await?;
        let api_response: ApiResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;

        from_api_response(api_response)
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChunkReceiver, ProviderError> {
        let body = Self::request_body(&request, true);
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.send(CHAT_PATH, &body, true).await?;
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(forward_sse(response.bytes_stream(), tx));

        Ok(rx)
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        let body = Self::embedding_body(&request);
        debug!(provider = %self.name, model = %request.model, inputs = request.input.len(), "Sending embedding request");

        let response = self.send(EMBEDDINGS_PATH, &body, false).await?;
        let api_response: ApiEmbeddingResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse embedding response: {e}"),
        })?;

        from_api_embeddings(api_response)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let mut builder = self.client.get(&url).timeout(self.retry.attempt_timeout);
        if !self.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }
        let response = builder.send().await.map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Ok(Vec::new());
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let models = body["data"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|m| m["id"].as_str().map(String::from)).collect())
            .unwrap_or_default();

        Ok(models)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let mut builder = self.client.get(&url).timeout(self.retry.attempt_timeout);
        if !self.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }
        let response = builder.send().await.map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

// --- Request conversion ---

fn to_api_message(message: &Message) -> Value {
    match message.role {
        Role::User => json!({ "role": "user", "content": to_api_content(&message.content) }),
        Role::Tool => json!({
            "role": "tool",
            "content": message.text(),
            "tool_call_id": message.tool_call_id,
        }),
        Role::Assistant => {
            let text = message.text();
            let mut api = json!({
                "role": "assistant",
                "content": if text.is_empty() { Value::Null } else { Value::String(text) },
            });
            if let Some(refusal) = message.refusal() {
                api["refusal"] = json!(refusal);
            }
            if !message.tool_calls.is_empty() {
                api["tool_calls"] = json!(message.tool_calls.iter().map(to_api_tool_call).collect::<Vec<_>>());
            }
            api
        }
    }
}

/// Plain text stays a string; anything richer becomes a parts array.
fn to_api_content(parts: &[ContentPart]) -> Value {
    let text_only = parts.iter().all(|p| matches!(p, ContentPart::Text { .. }));
    if text_only {
        let text: String = parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        return Value::String(text);
    }

    let api_parts: Vec<Value> = parts
        .iter()
        .map(|part| match part {
            ContentPart::Text { text } => json!({ "type": "text", "text": text }),
            ContentPart::Image { data, media_type, detail } => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(data);
                image_part(format!("data:{media_type};base64,{encoded}"), *detail)
            }
            ContentPart::ImageUrl { url, detail } => image_part(url.clone(), *detail),
            ContentPart::Refusal { refusal } => json!({ "type": "text", "text": refusal }),
        })
        .collect();
    Value::Array(api_parts)
}

fn image_part(url: String, detail: Option<ImageDetail>) -> Value {
    let mut image_url = json!({ "url": url });
    if let Some(detail) = detail {
        image_url["detail"] = json!(detail);
    }
    json!({ "type": "image_url", "image_url": image_url })
}

fn to_api_tool_call(call: &ToolCall) -> ApiToolCall {
    ApiToolCall {
        id: call.id.clone(),
        r#type: "function".into(),
        function: ApiFunction {
            name: call.function.name.clone(),
            arguments: Value::Object(call.function.arguments.clone()).to_string(),
        },
    }
}

fn to_api_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

fn to_api_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Function(name) => json!({ "type": "function", "function": { "name": name } }),
    }
}

fn to_api_response_format(format: &ResponseFormat) -> Value {
    // Names are restricted to [a-zA-Z0-9_-]
    let name: String = format
        .name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    let mut json_schema = json!({
        "name": if name.is_empty() { "output".to_string() } else { name },
        "schema": format.schema.document(),
    });
    if !format.description.is_empty() {
        json_schema["description"] = json!(format.description);
    }
    json!({ "type": "json_schema", "json_schema": json_schema })
}

// --- Response conversion ---

fn from_api_response(api: ApiResponse) -> Result<ChatResponse, ProviderError> {
    let mut choices = Vec::with_capacity(api.choices.len());
    for choice in api.choices {
        let mut message = Message::assistant(choice.message.content.unwrap_or_default());
        if let Some(refusal) = choice.message.refusal {
            message.content.push(ContentPart::Refusal { refusal });
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            let arguments = parse_arguments(&call.function.arguments).map_err(|reason| ProviderError::ApiError {
                status_code: 200,
                message: format!("invalid arguments for tool call {}: {reason}", call.id),
            })?;
            message.tool_calls.push(ToolCall::new(call.id, call.function.name, arguments));
        }
        choices.push(Choice {
            index: choice.index,
            message,
            finish_reason: choice.finish_reason,
            structured_content: None,
        });
    }

    Ok(ChatResponse {
        id: api.id,
        model: api.model,
        choices,
        usage: api.usage.map(ApiUsage::into_usage),
    })
}

fn parse_arguments(text: &str) -> Result<Map<String, Value>, String> {
    if text.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("arguments are not a JSON object".into()),
        Err(e) => Err(e.to_string()),
    }
}

fn from_api_stream_chunk(api: ApiStreamChunk) -> StreamChunk {
    StreamChunk {
        id: api.id,
        model: api.model,
        choices: api
            .choices
            .into_iter()
            .map(|choice| StreamChoice {
                index: choice.index,
                delta: from_api_delta(choice.delta),
                finish_reason: choice.finish_reason,
            })
            .collect(),
        usage: api.usage.map(ApiUsage::into_usage),
    }
}

fn from_api_delta(delta: ApiStreamDelta) -> MessageDelta {
    let mut tool_calls: Vec<ToolCallDelta> = delta
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let (name, arguments) = match tc.function {
                Some(f) => (f.name, f.arguments),
                None => (None, None),
            };
            ToolCallDelta {
                index: tc.index,
                id: tc.id,
                name,
                arguments,
            }
        })
        .collect();

    // Legacy `function_call` deltas carry a single call, always at index 0
    if let Some(call) = delta.function_call {
        let present = |field: &Option<String>| field.as_deref().is_some_and(|v| !v.is_empty());
        if present(&call.name) || present(&call.arguments) {
            tool_calls.push(ToolCallDelta {
                index: 0,
                id: None,
                name: call.name,
                arguments: call.arguments,
            });
        }
    }

    MessageDelta {
        role: delta.role.as_deref().and_then(parse_role),
        content: delta.content,
        refusal: delta.refusal,
        tool_calls,
    }
}

fn from_api_embeddings(api: ApiEmbeddingResponse) -> Result<EmbeddingResponse, ProviderError> {
    let mut embeddings = Vec::with_capacity(api.data.len());
    for item in api.data {
        let vector = match item.embedding {
            ApiEmbeddingVector::Floats(values) => values,
            ApiEmbeddingVector::Base64(encoded) => {
                decode_base64_vector(&encoded).map_err(|reason| ProviderError::ApiError {
                    status_code: 200,
                    message: format!("invalid embedding {}: {reason}", item.index),
                })?
            }
        };
        embeddings.push(Embedding {
            index: item.index,
            vector,
        });
    }
    embeddings.sort_by_key(|e| e.index);

    Ok(EmbeddingResponse {
        model: api.model,
        embeddings,
        usage: api.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: 0,
            total_tokens: u.total_tokens,
        }),
    })
}

/// Base64 vectors are packed little-endian `f32`s.
fn decode_base64_vector(encoded: &str) -> Result<Vec<f32>, String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| e.to_string())?;
    if bytes.len() % 4 != 0 {
        return Err(format!("{} bytes is not a whole number of f32 values", bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn parse_role(role: &str) -> Option<Role> {
    match role {
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        "tool" => Some(Role::Tool),
        _ => None,
    }
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Data(String),
    Done,
}

/// Splits an SSE byte stream into events.
///
/// Bytes are buffered until a full line is available, so a multi-byte
/// character split across network reads is decoded whole.
#[derive(Debug, Default)]
struct SseLines {
    buffer: Vec<u8>,
}

impl SseLines {
    /// Feed more bytes and take every complete `data:` event out, up to `[DONE]`.
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<SseEvent>, ProviderError> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = std::str::from_utf8(&raw)
                .map_err(|e| ProviderError::StreamInterrupted(format!("invalid UTF-8 in event stream: {e}")))?
                .trim_end_matches(['\n', '\r']);

            // Empty lines, SSE comments and non-data fields
            let Some(data) = line.strip_prefix("data:") else {
                if !line.is_empty() {
                    trace!(line, "Skipping non-data SSE line");
                }
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
                break;
            }
            events.push(SseEvent::Data(data.to_string()));
        }
        Ok(events)
    }
}

/// Decode one `data:` payload. Error events and malformed chunks end the stream.
fn parse_stream_data(data: &str) -> Result<StreamChunk, ProviderError> {
    let chunk: ApiStreamChunk = serde_json::from_str(data)
        .map_err(|e| ProviderError::StreamInterrupted(format!("unparseable stream chunk: {e}")))?;
    if let Some(error) = chunk.error {
        return Err(ProviderError::StreamInterrupted(format!("provider error: {error}")));
    }
    Ok(from_api_stream_chunk(chunk))
}

/// Forward parsed chunks from an SSE byte stream into `tx`.
///
/// A well-formed stream ends with `[DONE]`. Transport errors, error events,
/// malformed chunks and an early end of stream are sent as a final
/// `StreamInterrupted` error.
async fn forward_sse<S, B, E>(bytes: S, tx: mpsc::Sender<Result<StreamChunk, ProviderError>>)
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut bytes = std::pin::pin!(bytes);
    let mut lines = SseLines::default();

    while let Some(read) = bytes.next().await {
        let events = match read {
            Ok(data) => lines.push(data.as_ref()),
            Err(e) => Err(ProviderError::StreamInterrupted(e.to_string())),
        };
        let events = match events {
            Ok(events) => events,
            Err(e) => return interrupt(&tx, e).await,
        };

        for event in events {
            let SseEvent::Data(data) = event else {
                return;
            };
            match parse_stream_data(&data) {
                Ok(chunk) => {
                    if tx.send(Ok(chunk)).await.is_err() {
                        return; // receiver dropped
                    }
                }
                Err(e) => return interrupt(&tx, e).await,
            }
        }
    }

    interrupt(
        &tx,
        ProviderError::StreamInterrupted("connection closed before [DONE]".into()),
    )
    .await;
}

async fn interrupt(tx: &mpsc::Sender<Result<StreamChunk, ProviderError>>, error: ProviderError) {
    warn!(error = %error, "Streaming response interrupted");
    let _ = tx.send(Err(error)).await;
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    #[serde(default)]
    index: u32,
    message: ApiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl ApiUsage {
    fn into_usage(self) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct ApiStreamChunk {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ApiStreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,

    /// Set when the provider fails mid-stream
    #[serde(default)]
    error: Option<ApiStreamError>,
}

#[derive(Debug, Deserialize)]
struct ApiStreamError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    r#type: Option<String>,
}

impl std::fmt::Display for ApiStreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = if self.message.is_empty() { "unknown error" } else { &self.message };
        match &self.r#type {
            Some(kind) => write!(f, "{message} ({kind})"),
            None => f.write_str(message),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiStreamChoice {
    #[serde(default)]
    index: u32,
    delta: ApiStreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiStreamDelta {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiStreamToolCall>>,

    /// Pre-tools function calling
    #[serde(default)]
    function_call: Option<ApiStreamFunction>,
}

/// A tool call delta; arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct ApiStreamToolCall {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ApiStreamFunction>,
}

#[derive(Debug, Deserialize)]
struct ApiStreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

// --- Embedding types ---

#[derive(Debug, Deserialize)]
struct ApiEmbeddingResponse {
    #[serde(default)]
    model: String,
    data: Vec<ApiEmbedding>,
    #[serde(default)]
    usage: Option<ApiEmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiEmbedding {
    #[serde(default)]
    index: u32,
    embedding: ApiEmbeddingVector,
}

/// `encoding_format: "float"` gives an array, `"base64"` a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiEmbeddingVector {
    Floats(Vec<f32>),
    Base64(String),
}

#[derive(Debug, Deserialize)]
struct ApiEmbeddingUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use typeclaw_core::Provider;
    use typeclaw_core::accumulator::ResponseAccumulator;
    use typeclaw_core::schema::Schema;

    #[test]
    fn openrouter_constructor() {
        let provider = OpenAiCompatProvider::openrouter("sk-test");
        assert_eq!(provider.name(), "openrouter");
        assert!(provider.base_url().contains("openrouter.ai"));
    }

    #[test]
    fn ollama_constructor() {
        let provider = OpenAiCompatProvider::ollama(None);
        assert_eq!(provider.name(), "ollama");
        assert!(provider.base_url().contains("localhost:11434"));
    }

    #[test]
    fn body_carries_system_prompt_and_sampling() {
        let mut request = ChatRequest::new("gpt-4o-mini", vec![Message::user("Hello")]);
        request.system_prompt = Some("You are helpful".into());
        request.temperature = Some(0.3);
        request.n = Some(2);

        let body = OpenAiCompatProvider::request_body(&request, false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Hello");
        assert_eq!(body["n"], 2);
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn image_bytes_become_data_urls() {
        let message = Message::user_parts(vec![
            ContentPart::text("What is this?"),
            ContentPart::Image {
                data: vec![1, 2, 3],
                media_type: "image/png".into(),
                detail: Some(ImageDetail::Low),
            },
        ]);
        let api = to_api_message(&message);
        assert_eq!(api["content"][0]["type"], "text");
        assert_eq!(api["content"][1]["image_url"]["url"], "data:image/png;base64,AQID");
        assert_eq!(api["content"][1]["image_url"]["detail"], "low");
    }

    #[test]
    fn assistant_tool_calls_serialize_arguments_as_text() {
        let message = Message::assistant_tool_calls(
            "",
            vec![ToolCall::from_json("call_1", "calculator", json!({"expression": "2+2"}))],
        );
        let api = to_api_message(&message);
        assert!(api["content"].is_null());
        assert_eq!(api["tool_calls"][0]["function"]["arguments"], r#"{"expression":"2+2"}"#);
    }

    #[test]
    fn tool_result_message() {
        let api = to_api_message(&Message::tool_result("call_1", "4"));
        assert_eq!(api["role"], "tool");
        assert_eq!(api["tool_call_id"], "call_1");
        assert_eq!(api["content"], "4");
    }

    #[test]
    fn tool_choice_conversion() {
        assert_eq!(to_api_tool_choice(&ToolChoice::Required), json!("required"));
        assert_eq!(
            to_api_tool_choice(&ToolChoice::Function("add".into())),
            json!({"type": "function", "function": {"name": "add"}})
        );
    }

    #[test]
    fn native_format_is_sent_as_json_schema() {
        let schema = Schema::new(json!({"type": "object"})).unwrap();
        let mut request = ChatRequest::new("m", vec![Message::user("hi")]);
        request.response_format = Some(ResponseFormat::new(ResponseFormatMode::Native, "City Info", schema.clone()));
        let body = OpenAiCompatProvider::request_body(&request, false);
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "City_Info");

        request.response_format = Some(ResponseFormat::new(ResponseFormatMode::Tool, "City", schema));
        let body = OpenAiCompatProvider::request_body(&request, false);
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn parse_multi_choice_response() {
        let data = r#"{
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "Hi"}, "finish_reason": "stop"},
                {"index": 1, "message": {"role": "assistant", "content": null,
                  "tool_calls": [{"id": "call_1", "type": "function",
                                  "function": {"name": "add", "arguments": "{\"a\":1}"}}]},
                 "finish_reason": "tool_calls"}
            ],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let response = from_api_response(serde_json::from_str(data).unwrap()).unwrap();
        assert_eq!(response.choices.len(), 2);
        assert_eq!(response.choices[0].message.text(), "Hi");
        assert_eq!(response.choices[1].message.tool_calls[0].function.arguments["a"], 1);
        assert_eq!(response.usage, Some(Usage::new(10, 5)));
    }

    #[test]
    fn invalid_tool_arguments_are_rejected() {
        let data = r#"{"choices": [{"message": {"tool_calls": [
            {"id": "c", "type": "function", "function": {"name": "add", "arguments": "[1,2]"}}]}}]}"#;
        assert!(from_api_response(serde_json::from_str(data).unwrap()).is_err());
    }

    #[test]
    fn refusal_is_kept_as_content_part() {
        let data = r#"{"choices": [{"message": {"content": null, "refusal": "I can't help with that."}}]}"#;
        let response = from_api_response(serde_json::from_str(data).unwrap()).unwrap();
        assert_eq!(response.choices[0].message.refusal().as_deref(), Some("I can't help with that."));
    }

    // --- SSE parsing tests ---

    #[test]
    fn sse_lines_keep_partial_lines() {
        let mut lines = SseLines::default();
        let events = lines.push(b"data: {\"a\":1}\n\n: keep-alive\ndata: {\"b\"").unwrap();
        assert_eq!(events, vec![SseEvent::Data("{\"a\":1}".into())]);

        let events = lines.push(b":2}\r\ndata: [DONE]\n").unwrap();
        assert_eq!(events, vec![SseEvent::Data("{\"b\":2}".into()), SseEvent::Done]);
    }

    #[test]
    fn sse_lines_join_codepoints_split_across_reads() {
        let mut lines = SseLines::default();
        assert!(lines.push(b"data: {\"content\":\"caf\xC3").unwrap().is_empty());
        let events = lines.push(b"\xA9\"}\n").unwrap();
        assert_eq!(events, vec![SseEvent::Data("{\"content\":\"café\"}".into())]);
    }

    #[test]
    fn sse_lines_reject_invalid_utf8() {
        let mut lines = SseLines::default();
        let err = lines.push(b"data: \xFF\xFE\n").unwrap_err();
        assert!(matches!(err, ProviderError::StreamInterrupted(_)));
    }

    /// Run `forward_sse` over scripted network reads and collect what it sends.
    async fn forward(reads: Vec<Result<Vec<u8>, &'static str>>) -> Vec<Result<StreamChunk, ProviderError>> {
        let (tx, mut rx) = mpsc::channel(16);
        forward_sse(futures::stream::iter(reads), tx).await;
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    fn content_chunk(text: &str) -> Vec<u8> {
        format!("data: {{\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"{text}\"}}}}]}}\n\n").into_bytes()
    }

    #[tokio::test]
    async fn forwarded_stream_keeps_multibyte_text() {
        let reads = vec![
            Ok(b"data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"caf\xC3".to_vec()),
            Ok(b"\xA9\"}}]}\n\ndata: [DONE]\n\n".to_vec()),
        ];
        let items = forward(reads).await;
        assert_eq!(items.len(), 1);

        let mut accumulator = ResponseAccumulator::new();
        for item in &items {
            accumulator.push(item.as_ref().unwrap());
        }
        assert_eq!(accumulator.finish().unwrap().choices[0].message.text(), "café");
    }

    #[tokio::test]
    async fn error_event_interrupts_stream() {
        let reads = vec![
            Ok(content_chunk("Hel")),
            Ok(b"data: {\"error\":{\"message\":\"server overloaded\",\"type\":\"server_error\"}}\n\n".to_vec()),
            Ok(content_chunk("never")),
        ];
        let items = forward(reads).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        match &items[1] {
            Err(ProviderError::StreamInterrupted(message)) => {
                assert!(message.contains("server overloaded"));
                assert!(message.contains("server_error"));
            }
            other => panic!("expected an interruption, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_chunk_interrupts_stream() {
        let items = forward(vec![Ok(b"data: {\"choices\": [\n\n".to_vec())]).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Err(ProviderError::StreamInterrupted(m)) if m.contains("unparseable")));
    }

    #[tokio::test]
    async fn end_of_stream_without_done_is_interrupted() {
        let items = forward(vec![Ok(content_chunk("Hel"))]).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(&items[1], Err(ProviderError::StreamInterrupted(m)) if m.contains("[DONE]")));
    }

    #[tokio::test]
    async fn transport_error_interrupts_stream() {
        let items = forward(vec![Ok(content_chunk("Hel")), Err("connection reset")]).await;
        assert!(matches!(&items[1], Err(ProviderError::StreamInterrupted(m)) if m == "connection reset"));
    }

    #[tokio::test]
    async fn done_ends_stream_cleanly() {
        let items = forward(vec![Ok(b"data: [DONE]\n\ndata: {\"ignored\": true}\n".to_vec())]).await;
        assert!(items.is_empty());
    }

    #[test]
    fn parse_stream_tool_call_delta() {
        let data = r#"{"choices":[{"index":0,"delta":{"role":"assistant","tool_calls":[{"index":0,"id":"call_abc","function":{"name":"calculator","arguments":""}}]},"finish_reason":null}]}"#;
        let chunk = from_api_stream_chunk(serde_json::from_str(data).unwrap());
        let delta = &chunk.choices[0].delta;
        assert_eq!(delta.role, Some(Role::Assistant));
        assert_eq!(delta.tool_calls[0].id.as_deref(), Some("call_abc"));
        assert_eq!(delta.tool_calls[0].name.as_deref(), Some("calculator"));
    }

    #[test]
    fn parse_stream_usage_chunk() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        let chunk = from_api_stream_chunk(serde_json::from_str(data).unwrap());
        assert!(chunk.choices.is_empty());
        assert_eq!(chunk.usage, Some(Usage::new(10, 5)));
    }

    #[test]
    fn streamed_chunks_reassemble() {
        let lines = [
            r#"{"id":"1","model":"m","choices":[{"index":0,"delta":{"role":"assistant","content":"Hel"}}]}"#,
            r#"{"id":"1","model":"m","choices":[{"index":0,"delta":{"content":"lo","tool_calls":[{"index":0,"id":"call_1","function":{"name":"calculator","arguments":"{\"expression\""}}]}}]}"#,
            r#"{"id":"1","model":"m","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":": \"2+2\"}"}}]},"finish_reason":"tool_calls"}]}"#,
        ];
        let mut accumulator = ResponseAccumulator::new();
        for line in lines {
            accumulator.push(&from_api_stream_chunk(serde_json::from_str(line).unwrap()));
        }
        let response = accumulator.finish().unwrap();
        let message = &response.choices[0].message;
        assert_eq!(message.text(), "Hello");
        assert_eq!(message.tool_calls[0].function.arguments["expression"], "2+2");
    }

    #[test]
    fn legacy_function_call_becomes_tool_call_delta() {
        let lines = [
            r#"{"choices":[{"index":0,"delta":{"role":"assistant","function_call":{"name":"calculator","arguments":""}}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"function_call":{"arguments":"{\"expression\":"}}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"function_call":{"arguments":" \"1+1\"}"}},"finish_reason":"function_call"}]}"#,
        ];
        let mut accumulator = ResponseAccumulator::new();
        for line in lines {
            let chunk = from_api_stream_chunk(serde_json::from_str(line).unwrap());
            assert_eq!(chunk.choices[0].delta.tool_calls[0].index, 0);
            accumulator.push(&chunk);
        }
        let message = accumulator.finish().unwrap().choices.remove(0).message;
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].function.name, "calculator");
        assert_eq!(message.tool_calls[0].function.arguments["expression"], "1+1");
    }

    #[test]
    fn empty_legacy_function_call_is_ignored() {
        let data = r#"{"choices":[{"index":0,"delta":{"content":"hi","function_call":{"name":"","arguments":""}}}]}"#;
        let chunk = from_api_stream_chunk(serde_json::from_str(data).unwrap());
        assert!(chunk.choices[0].delta.tool_calls.is_empty());
    }

    // --- Embedding tests ---

    #[test]
    fn embedding_body_carries_options() {
        let request = EmbeddingRequest::new("text-embedding-3-small", vec!["hello".into(), "world".into()]);
        let body = OpenAiCompatProvider::embedding_body(&request);
        assert_eq!(body, json!({"model": "text-embedding-3-small", "input": ["hello", "world"]}));

        let request = request
            .with_dimensions(256)
            .with_encoding_format(typeclaw_core::EncodingFormat::Base64);
        let body = OpenAiCompatProvider::embedding_body(&request);
        assert_eq!(body["dimensions"], 256);
        assert_eq!(body["encoding_format"], "base64");
    }

    #[test]
    fn parse_float_embeddings_sorted_by_index() {
        let data = r#"{
            "object": "list",
            "model": "text-embedding-3-small",
            "data": [
                {"object": "embedding", "index": 1, "embedding": [0.5, -1.0]},
                {"object": "embedding", "index": 0, "embedding": [0.25, 2.0]}
            ],
            "usage": {"prompt_tokens": 4, "total_tokens": 4}
        }"#;
        let response = from_api_embeddings(serde_json::from_str(data).unwrap()).unwrap();
        assert_eq!(response.model, "text-embedding-3-small");
        assert_eq!(response.embeddings[0].index, 0);
        assert_eq!(response.embeddings[0].vector, vec![0.25, 2.0]);
        assert_eq!(response.embeddings[1].vector, vec![0.5, -1.0]);
        assert_eq!(
            response.usage,
            Some(Usage {
                prompt_tokens: 4,
                completion_tokens: 0,
                total_tokens: 4
            })
        );
    }

    #[test]
    fn parse_base64_embeddings() {
        let bytes: Vec<u8> = [1.0f32, -2.5].iter().flat_map(|v| v.to_le_bytes()).collect();
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let data = json!({"model": "m", "data": [{"index": 0, "embedding": encoded}]});

        let response = from_api_embeddings(serde_json::from_value(data).unwrap()).unwrap();
        assert_eq!(response.embeddings[0].vector, vec![1.0, -2.5]);
        assert!(response.usage.is_none());
    }

    #[test]
    fn truncated_base64_embedding_is_rejected() {
        let encoded = base64::engine::general_purpose::STANDARD.encode([0u8, 0, 128]);
        let data = json!({"model": "m", "data": [{"index": 3, "embedding": encoded}]});
        let err = from_api_embeddings(serde_json::from_value(data).unwrap()).unwrap_err();
        assert!(err.to_string().contains("invalid embedding 3"));
    }

    #[test]
    fn rate_limit_backoff_honors_retry_after() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay(0, &ProviderError::RateLimited { retry_after_secs: 7 }),
            Duration::from_secs(7)
        );
        assert_eq!(
            policy.delay(2, &ProviderError::Network("reset".into())),
            Duration::from_millis(2000)
        );
    }
}
