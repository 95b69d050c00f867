//! Error types for the TypeClaw domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

use crate::agent::UsageLimitKind;

/// The top-level error type for all TypeClaw operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Schema errors ---
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    // --- Structured output errors ---
    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    // --- Stream assembly errors ---
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    // --- Run loop errors ---
    #[error("Run failed: {0}")]
    Run(#[from] RunError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The run failure carried by this error, if any.
    pub fn as_run_error(&self) -> Option<&RunError> {
        match self {
            Error::Run(e) => Some(e),
            _ => None,
        }
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not supported by this provider: {0}")]
    Unsupported(String),
}

impl ProviderError {
    /// Whether the transport may succeed if the same request is sent again.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. }
            | ProviderError::Timeout(_)
            | ProviderError::Network(_) => true,
            ProviderError::ApiError { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }
}

/// Signal from a tool that the model should be asked again with feedback.
///
/// This is the only tool failure that consumes retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ModelRetry {
    pub message: String,
}

impl ModelRetry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Retry(#[from] ModelRetry),
}

impl ToolError {
    /// Shorthand for a [`ModelRetry`] failure.
    pub fn retry(message: impl Into<String>) -> Self {
        ToolError::Retry(ModelRetry::new(message))
    }
}

#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    #[error("invalid schema document: {0}")]
    InvalidSchema(String),

    #[error("validation failed: {}", .errors.join("; "))]
    Validation { errors: Vec<String> },

    #[error("failed to generate schema: {0}")]
    Generation(String),
}

/// Failures to produce structured output from a model response.
///
/// Every variant is recoverable by the run loop: the model gets feedback and
/// another attempt while output retry budget remains.
#[derive(Debug, Clone, Error)]
pub enum OutputError {
    #[error("no structured content found in response")]
    NoContent { raw: String },

    #[error("schema validation failed: {reason}")]
    SchemaValidation { raw: String, reason: String },

    #[error("expected the `{tool}` tool to be called")]
    ToolNotCalled { tool: String },

    #[error("the `{tool}` tool must be called alone, but was called with: {}", .other_tools.join(", "))]
    OutputToolMisuse {
        tool: String,
        other_tools: Vec<String>,
    },

    #[error("the `{tool}` tool was called {count} times, expected exactly once")]
    MultipleOutputCalls { tool: String, count: usize },

    #[error("failed to decode output: {reason}")]
    Decode { raw: String, reason: String },
}

impl OutputError {
    /// Feedback text sent back to the model so it can correct its answer.
    pub fn feedback(&self) -> String {
        match self {
            OutputError::NoContent { .. } => {
                "No structured output was found in your response. Respond with a JSON value matching the required schema.".to_string()
            }
            OutputError::SchemaValidation { raw, reason } | OutputError::Decode { raw, reason } => format!(
                "Your response did not match the required schema: {reason}\n\nYour response was:\n{raw}\n\nFix the errors and try again."
            ),
            OutputError::ToolNotCalled { tool } => {
                format!("You must call the `{tool}` tool to provide your final answer.")
            }
            OutputError::OutputToolMisuse { tool, other_tools } => format!(
                "The `{tool}` tool must be called on its own. Do not call it together with: {}. Try again.",
                other_tools.join(", ")
            ),
            OutputError::MultipleOutputCalls { tool, .. } => {
                format!("Call the `{tool}` tool exactly once with your final answer.")
            }
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum StreamError {
    #[error("invalid arguments for streamed tool call {index}: {reason}")]
    InvalidToolArguments { index: u32, reason: String },

    #[error("stream produced no choices")]
    NoChoices,
}

/// A usage ceiling that a run crossed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("usage limit exceeded: {limit} (observed {observed}, max {max})")]
pub struct UsageLimitExceeded {
    pub limit: UsageLimitKind,
    pub observed: u64,
    pub max: u64,
}

/// Fatal run failures.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool \"{tool}\" exceeded max retries ({max_retries}): {message}")]
    ToolRetriesExceeded {
        tool: String,
        max_retries: u32,
        message: String,
    },

    #[error("exceeded maximum output retries ({max_retries}): {source}")]
    OutputRetriesExceeded {
        max_retries: u32,
        #[source]
        source: OutputError,
    },

    #[error("agent exceeded max iterations ({0})")]
    MaxIterations(u32),

    #[error(transparent)]
    UsageLimitExceeded(#[from] UsageLimitExceeded),

    #[error("no response from model")]
    NoResponse,

    #[error("run cancelled")]
    Cancelled,

    #[error("duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("tool name is reserved: {0}")]
    ReservedToolName(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn transient_provider_errors() {
        assert!(ProviderError::RateLimited { retry_after_secs: 1 }.is_transient());
        assert!(ProviderError::ApiError {
            status_code: 503,
            message: "unavailable".into()
        }
        .is_transient());
        assert!(!ProviderError::AuthenticationFailed("bad key".into()).is_transient());
    }

    #[test]
    fn tool_retries_exceeded_names_tool_and_limit() {
        let err = RunError::ToolRetriesExceeded {
            tool: "always_fails".into(),
            max_retries: 2,
            message: "Always fails".into(),
        };
        assert_eq!(
            err.to_string(),
            "tool \"always_fails\" exceeded max retries (2): Always fails"
        );
    }

    #[test]
    fn usage_limit_display() {
        let err = RunError::from(UsageLimitExceeded {
            limit: UsageLimitKind::Requests,
            observed: 3,
            max: 3,
        });
        assert!(err.to_string().contains("request_limit"));
    }

    #[test]
    fn misuse_feedback_lists_other_tools() {
        let err = OutputError::OutputToolMisuse {
            tool: "_output".into(),
            other_tools: vec!["search".into(), "lookup".into()],
        };
        assert!(err.to_string().contains("search, lookup"));
        assert!(err.feedback().contains("search, lookup"));
    }

    #[test]
    fn schema_validation_feedback_carries_raw_response() {
        let err = OutputError::SchemaValidation {
            raw: r#"{"name": 5}"#.into(),
            reason: "5 is not of type \"string\"".into(),
        };
        assert!(err.feedback().contains(r#"{"name": 5}"#));
    }

    #[test]
    fn tool_error_retry_shorthand() {
        let err = ToolError::retry("try a smaller number");
        assert!(matches!(err, ToolError::Retry(ref r) if r.message == "try a smaller number"));
    }
}
