//! # TypeClaw Core
//!
//! Domain types, traits, and error definitions for the TypeClaw agent runtime.
//! This crate defines the data model that all other crates implement against,
//! plus the three transport-independent engines:
//!
//! - [`schema`]: compiled JSON Schema validation
//! - [`response_format`]: structured output in native, tool and prompted modes
//! - [`accumulator`]: reassembly of streamed responses
//!
//! Providers implement [`Provider`]; the agent crate drives them through [`Client`].

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;
pub mod schema;
pub mod response_format;
pub mod accumulator;
pub mod client;
pub mod agent;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ModelRetry, OutputError, Result, RunError, ToolError};
pub use message::{ContentPart, Message, Role, ToolCall};
pub use provider::{
    ChatRequest, ChatResponse, Embedding, EmbeddingRequest, EmbeddingResponse, EncodingFormat, Provider, StreamChunk,
    ToolDefinition, Usage,
};
pub use tool::{Tool, ToolResult};
pub use schema::Schema;
pub use response_format::{OUTPUT_TOOL_NAME, ResponseFormat, ResponseFormatMode};
pub use accumulator::{MessageAccumulator, ResponseAccumulator};
pub use client::Client;
pub use agent::{AgentConfig, UsageLimits};
