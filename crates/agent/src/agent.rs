//! Agent configuration: what the model sees and how answers are decoded.

use std::collections::HashMap;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use typeclaw_core::agent::{AgentConfig, UsageLimits};
use typeclaw_core::client::Client;
use typeclaw_core::error::{Error, OutputError, RunError};
use typeclaw_core::message::Message;
use typeclaw_core::provider::{Provider, ToolChoice, ToolDefinition};
use typeclaw_core::response_format::{OUTPUT_TOOL_NAME, ResponseFormat, ResponseFormatMode};
use typeclaw_core::tool::Tool;

use crate::tool::AgentTool;

/// Turns the final response into the run's output value.
pub(crate) type OutputDecoder<O> =
    Arc<dyn Fn(Option<&str>, &Message) -> Result<O, OutputError> + Send + Sync>;

enum SystemPrompt<D> {
    Static(String),
    Dynamic(Arc<dyn Fn(&D) -> String + Send + Sync>),
}

impl<D> Clone for SystemPrompt<D> {
    fn clone(&self) -> Self {
        match self {
            SystemPrompt::Static(s) => SystemPrompt::Static(s.clone()),
            SystemPrompt::Dynamic(f) => SystemPrompt::Dynamic(Arc::clone(f)),
        }
    }
}

/// A configured agent, generic over its dependency payload `D` and output type `O`.
///
/// Agents are immutable once built and can serve many runs, concurrently
/// if needed; every run gets its own [`RunContext`](crate::RunContext).
pub struct Agent<D, O = String> {
    pub(crate) client: Client,
    pub(crate) model: String,
    system_prompts: Vec<SystemPrompt<D>>,
    pub(crate) tools: Vec<AgentTool<D>>,
    tool_index: HashMap<String, usize>,
    pub(crate) definitions: Vec<ToolDefinition>,
    pub(crate) config: AgentConfig,
    pub(crate) tool_choice: Option<ToolChoice>,
    pub(crate) response_format: Option<ResponseFormat>,
    pub(crate) decoder: OutputDecoder<O>,
}

impl<D: Send + Sync + 'static> Agent<D, String> {
    /// Start configuring an agent that answers in plain text.
    pub fn builder(provider: Arc<dyn Provider>, model: impl Into<String>) -> AgentBuilder<D, String> {
        AgentBuilder::new(provider, model)
    }
}

impl<D, O> Agent<D, O> {
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn response_format(&self) -> Option<&ResponseFormat> {
        self.response_format.as_ref()
    }

    /// Definitions of the caller-registered tools, in registration order.
    pub fn tool_definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub(crate) fn tool(&self, name: &str) -> Option<&AgentTool<D>> {
        self.tool_index.get(name).map(|&i| &self.tools[i])
    }

    /// The system prompt for a run with these dependencies.
    pub(crate) fn system_prompt(&self, deps: &D) -> Option<String> {
        let parts: Vec<String> = self
            .system_prompts
            .iter()
            .map(|p| match p {
                SystemPrompt::Static(s) => s.clone(),
                SystemPrompt::Dynamic(f) => f(deps),
            })
            .filter(|s| !s.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join("\n\n"))
    }
}

/// Builder for [`Agent`]. Validation happens once, in [`AgentBuilder::build`].
pub struct AgentBuilder<D, O = String> {
    provider: Arc<dyn Provider>,
    model: String,
    system_prompts: Vec<SystemPrompt<D>>,
    tools: Vec<AgentTool<D>>,
    config: AgentConfig,
    tool_choice: Option<ToolChoice>,
    response_format: Option<ResponseFormat>,
    decoder: OutputDecoder<O>,
}

impl<D: Send + Sync + 'static> AgentBuilder<D, String> {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            system_prompts: Vec::new(),
            tools: Vec::new(),
            config: AgentConfig::default(),
            tool_choice: None,
            response_format: None,
            decoder: Arc::new(|_, message: &Message| Ok(message.text())),
        }
    }
}

impl<D: Send + Sync + 'static, O> AgentBuilder<D, O> {
    /// Add a fixed system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompts.push(SystemPrompt::Static(prompt.into()));
        self
    }

    /// Add a system prompt computed from the run's dependencies.
    pub fn with_system_prompt_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&D) -> String + Send + Sync + 'static,
    {
        self.system_prompts.push(SystemPrompt::Dynamic(Arc::new(f)));
        self
    }

    pub fn with_tool(mut self, tool: AgentTool<D>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = AgentTool<D>>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Register an untyped tool (built-in or imported from another protocol).
    pub fn with_external_tool(self, tool: Arc<dyn Tool>) -> Self {
        self.with_tool(AgentTool::external(tool))
    }

    /// Replace the whole configuration record.
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Default retry budget for tools without their own.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.config.retries = retries;
        self
    }

    pub fn with_output_retries(mut self, retries: u32) -> Self {
        self.config.output_retries = Some(retries);
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.config.max_iterations = max;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.config.max_tokens = Some(max);
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    /// Answer with a `T`, using a schema generated from the type.
    pub fn output_type<T>(self, mode: ResponseFormatMode) -> Result<AgentBuilder<D, T>, Error>
    where
        T: DeserializeOwned + JsonSchema + 'static,
    {
        let format = ResponseFormat::for_type::<T>(mode)?;
        Ok(self.output_format(format))
    }

    /// Answer with a `T`, validated against an explicit format.
    pub fn output_format<T>(self, format: ResponseFormat) -> AgentBuilder<D, T>
    where
        T: DeserializeOwned + 'static,
    {
        AgentBuilder {
            provider: self.provider,
            model: self.model,
            system_prompts: self.system_prompts,
            tools: self.tools,
            config: self.config,
            tool_choice: self.tool_choice,
            response_format: Some(format),
            decoder: Arc::new(|structured: Option<&str>, message: &Message| {
                let raw = structured.ok_or_else(|| OutputError::NoContent { raw: message.text() })?;
                serde_json::from_str(raw).map_err(|e| OutputError::Decode {
                    raw: raw.to_string(),
                    reason: e.to_string(),
                })
            }),
        }
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<Agent<D, O>, Error> {
        self.config.validate()?;

        let mut tool_index = HashMap::with_capacity(self.tools.len());
        for (i, tool) in self.tools.iter().enumerate() {
            if tool.name() == OUTPUT_TOOL_NAME {
                return Err(RunError::ReservedToolName(tool.name().to_string()).into());
            }
            if tool_index.insert(tool.name().to_string(), i).is_some() {
                return Err(RunError::DuplicateTool(tool.name().to_string()).into());
            }
        }
        let definitions = self.tools.iter().map(|t| t.definition().clone()).collect();

        Ok(Agent {
            client: Client::new(self.provider),
            model: self.model,
            system_prompts: self.system_prompts,
            tools: self.tools,
            tool_index,
            definitions,
            config: self.config,
            tool_choice: self.tool_choice,
            response_format: self.response_format,
            decoder: self.decoder,
        })
    }
}

/// Per-run options for [`Agent::run`](crate::Agent::run).
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Appended to the history as a user message
    pub prompt: Option<String>,

    /// Seed history, e.g. the messages of an earlier run
    pub messages: Vec<Message>,

    /// Retry budget overriding every tool's own
    pub retries: Option<u32>,

    pub usage_limits: UsageLimits,
}

impl RunOptions {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_usage_limits(mut self, limits: UsageLimits) -> Self {
        self.usage_limits = limits;
        self
    }
}
