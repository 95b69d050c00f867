//! Agent configuration and run-scoped usage limits.

use serde::{Deserialize, Serialize};

use crate::error::{Error, UsageLimitExceeded};

/// Configuration for the agent's behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model round-trips per run (safety limit)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Default retry budget for tools that don't set their own
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Retry budget for structured output failures (falls back to `retries`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_retries: Option<u32>,

    /// Sampling temperature sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens per model response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_retries() -> u32 {
    1
}

impl AgentConfig {
    /// The effective output retry budget.
    pub fn output_retries(&self) -> u32 {
        self.output_retries.unwrap_or(self.retries)
    }

    /// Reject configurations that can never complete a run.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_iterations == 0 {
            return Err(Error::Config {
                message: "max_iterations must be at least 1".into(),
            });
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(Error::Config {
                    message: "temperature must be between 0.0 and 2.0".into(),
                });
            }
        }
        Ok(())
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            retries: default_retries(),
            output_retries: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Which usage ceiling was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageLimitKind {
    Requests,
    CompletionTokens,
    ToolCalls,
}

impl std::fmt::Display for UsageLimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UsageLimitKind::Requests => "request_limit",
            UsageLimitKind::CompletionTokens => "completion_tokens_limit",
            UsageLimitKind::ToolCalls => "tool_calls_limit",
        };
        f.write_str(name)
    }
}

/// Per-run ceilings. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLimits {
    /// Max model round-trips
    #[serde(default)]
    pub request_limit: u32,

    /// Max completion tokens in any single response
    #[serde(default)]
    pub completion_tokens_limit: u32,

    /// Max non-fatal tool executions
    #[serde(default)]
    pub tool_calls_limit: u32,
}

impl UsageLimits {
    pub fn with_request_limit(mut self, limit: u32) -> Self {
        self.request_limit = limit;
        self
    }

    pub fn with_completion_tokens_limit(mut self, limit: u32) -> Self {
        self.completion_tokens_limit = limit;
        self
    }

    pub fn with_tool_calls_limit(mut self, limit: u32) -> Self {
        self.tool_calls_limit = limit;
        self
    }

    /// Checked before a request is issued: `requests` already sent must be below the ceiling.
    pub fn check_before_request(&self, requests: u32) -> Result<(), UsageLimitExceeded> {
        if self.request_limit > 0 && requests >= self.request_limit {
            return Err(UsageLimitExceeded {
                limit: UsageLimitKind::Requests,
                observed: u64::from(requests),
                max: u64::from(self.request_limit),
            });
        }
        Ok(())
    }

    /// Checked against a single response, not the running total.
    pub fn check_completion_tokens(&self, completion_tokens: u32) -> Result<(), UsageLimitExceeded> {
        if self.completion_tokens_limit > 0 && completion_tokens > self.completion_tokens_limit {
            return Err(UsageLimitExceeded {
                limit: UsageLimitKind::CompletionTokens,
                observed: u64::from(completion_tokens),
                max: u64::from(self.completion_tokens_limit),
            });
        }
        Ok(())
    }

    pub fn check_tool_calls(&self, tool_calls: u32) -> Result<(), UsageLimitExceeded> {
        if self.tool_calls_limit > 0 && tool_calls > self.tool_calls_limit {
            return Err(UsageLimitExceeded {
                limit: UsageLimitKind::ToolCalls,
                observed: u64::from(tool_calls),
                max: u64::from(self.tool_calls_limit),
            });
        }
        Ok(())
    }
}
