//! Chat client: a provider plus structured output handling.
//!
//! The client shapes each request for its response format, dispatches it,
//! and extracts validated structured content into every returned choice.
//! Extraction failures come back as [`Error::Output`] so callers can decide
//! whether to give the model another attempt.

use std::sync::Arc;

use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::accumulator::ResponseAccumulator;
use crate::error::{Error, Result};
use crate::provider::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, Provider, StreamChunk};
use crate::response_format::{apply_response_format, extract_structured_content};

#[derive(Clone)]
pub struct Client {
    provider: Arc<dyn Provider>,
}

impl Client {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Send a request and wait for the complete response.
    pub async fn chat(&self, mut request: ChatRequest) -> Result<ChatResponse> {
        apply_response_format(&mut request);
        debug!(
            provider = self.provider.name(),
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Dispatching chat request"
        );

        let mut response = self.provider.complete(request.clone()).await?;
        extract_into(&request, &mut response)?;
        Ok(response)
    }

    /// Stream a request, handing every chunk to `on_chunk` as it arrives,
    /// and return the reassembled response.
    pub async fn chat_stream<F>(&self, mut request: ChatRequest, mut on_chunk: F) -> Result<ChatResponse>
    where
        F: FnMut(&StreamChunk) + Send,
    {
        apply_response_format(&mut request);
        debug!(provider = self.provider.name(), model = %request.model, "Dispatching streaming request");

        let rx = self.provider.stream(request.clone()).await?;
        let mut stream = ReceiverStream::new(rx);
        let mut accumulator = ResponseAccumulator::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            on_chunk(&chunk);
            accumulator.push(&chunk);
        }

        let mut response = accumulator.finish()?;
        extract_into(&request, &mut response)?;
        Ok(response)
    }

    /// Embed the request's inputs through the provider.
    pub async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        if request.input.is_empty() {
            return Err(Error::Config {
                message: "embedding request has no input".into(),
            });
        }
        debug!(
            provider = self.provider.name(),
            model = %request.model,
            inputs = request.input.len(),
            "Dispatching embedding request"
        );
        Ok(self.provider.embed(request).await?)
    }
}

fn extract_into(request: &ChatRequest, response: &mut ChatResponse) -> Result<()> {
    let Some(format) = &request.response_format else {
        return Ok(());
    };
    for choice in &mut response.choices {
        choice.structured_content = extract_structured_content(format, &mut choice.message)
            .map_err(Error::Output)?;
    }
    Ok(())
}
