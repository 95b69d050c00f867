//! Typed tools for agents.
//!
//! An [`AgentTool`] pairs a [`ToolDefinition`] with an executor that turns
//! raw model arguments into a [`ToolResult`]. Typed handlers get their input
//! validated and decoded, and their output validated and encoded; external
//! tools are passed through as they are.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use typeclaw_core::error::{ModelRetry, SchemaError, ToolError};
use typeclaw_core::provider::ToolDefinition;
use typeclaw_core::schema::Schema;
use typeclaw_core::tool::{Tool, ToolResult};

use crate::run_context::RunContext;

/// Future returned by a typed tool handler.
pub type ToolFuture<'a, O> = Pin<Box<dyn Future<Output = Result<O, ToolError>> + Send + 'a>>;

/// Runs one tool call. Only [`ModelRetry`] escapes as an error; every other
/// failure is folded into an error-flagged [`ToolResult`].
#[async_trait]
trait Executor<D>: Send + Sync {
    async fn execute(&self, ctx: &RunContext<D>, arguments: &Map<String, Value>) -> Result<ToolResult, ModelRetry>;
}

struct TypedExecutor<I, O, F> {
    input_schema: Schema,
    output_schema: Schema,
    handler: F,
    _types: PhantomData<fn(I) -> O>,
}

#[async_trait]
impl<D, I, O, F> Executor<D> for TypedExecutor<I, O, F>
where
    D: Send + Sync + 'static,
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    F: for<'a> Fn(&'a RunContext<D>, I) -> ToolFuture<'a, O> + Send + Sync + 'static,
{
    async fn execute(&self, ctx: &RunContext<D>, arguments: &Map<String, Value>) -> Result<ToolResult, ModelRetry> {
        let arguments = Value::Object(arguments.clone());
        self.input_schema
            .validate(&arguments)
            .map_err(|e| ModelRetry::new(format!("Invalid tool input: {e}")))?;
        let input: I = serde_json::from_value(arguments)
            .map_err(|e| ModelRetry::new(format!("Failed to parse tool input: {e}")))?;

        let output = match (self.handler)(ctx, input).await {
            Ok(output) => output,
            Err(ToolError::Retry(retry)) => return Err(retry),
            Err(e) => return Ok(ToolResult::error(format!("Tool execution error: {e}"))),
        };

        let value = match serde_json::to_value(&output) {
            Ok(value) => value,
            Err(e) => return Ok(ToolResult::error(format!("Failed to encode tool output: {e}"))),
        };
        if let Err(e) = self.output_schema.validate(&value) {
            return Ok(ToolResult::error(format!("Invalid tool output: {e}")));
        }
        Ok(ToolResult::structured(value))
    }
}

struct ExternalExecutor {
    tool: Arc<dyn Tool>,
}

#[async_trait]
impl<D: Send + Sync + 'static> Executor<D> for ExternalExecutor {
    async fn execute(&self, _ctx: &RunContext<D>, arguments: &Map<String, Value>) -> Result<ToolResult, ModelRetry> {
        match self.tool.execute(arguments).await {
            Ok(result) => Ok(result),
            Err(ToolError::Retry(retry)) => Err(retry),
            Err(e) => Ok(ToolResult::error(e.to_string())),
        }
    }
}

/// A tool an agent can offer to the model.
pub struct AgentTool<D> {
    definition: ToolDefinition,
    retries: Option<u32>,
    executor: Arc<dyn Executor<D>>,
}

impl<D> Clone for AgentTool<D> {
    fn clone(&self) -> Self {
        Self {
            definition: self.definition.clone(),
            retries: self.retries,
            executor: Arc::clone(&self.executor),
        }
    }
}

impl<D> std::fmt::Debug for AgentTool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTool")
            .field("name", &self.definition.name)
            .field("retries", &self.retries)
            .finish()
    }
}

impl<D: Send + Sync + 'static> AgentTool<D> {
    /// A typed tool whose schemas are generated from `I` and `O`.
    ///
    /// ```ignore
    /// let add = AgentTool::new("add", "Add two numbers", |_ctx, input: AddInput| {
    ///     Box::pin(async move { Ok(AddOutput { sum: input.a + input.b }) })
    /// })?;
    /// ```
    pub fn new<I, O, F>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Result<Self, SchemaError>
    where
        I: DeserializeOwned + JsonSchema + Send + 'static,
        O: Serialize + JsonSchema + Send + 'static,
        F: for<'a> Fn(&'a RunContext<D>, I) -> ToolFuture<'a, O> + Send + Sync + 'static,
    {
        Ok(Self::with_schemas(
            name,
            description,
            Schema::for_type::<I>()?,
            Schema::for_type::<O>()?,
            handler,
        ))
    }

    /// A typed tool with hand-written schemas.
    pub fn with_schemas<I, O, F>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Schema,
        output_schema: Schema,
        handler: F,
    ) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: for<'a> Fn(&'a RunContext<D>, I) -> ToolFuture<'a, O> + Send + Sync + 'static,
    {
        let definition = ToolDefinition {
            name: name.into(),
            description: description.into(),
            input_schema: input_schema.document().clone(),
            output_schema: Some(output_schema.document().clone()),
        };
        Self {
            definition,
            retries: None,
            executor: Arc::new(TypedExecutor {
                input_schema,
                output_schema,
                handler,
                _types: PhantomData,
            }),
        }
    }

    /// Wrap an untyped tool. Its arguments are passed through without validation.
    pub fn external(tool: Arc<dyn Tool>) -> Self {
        Self {
            definition: tool.to_definition(),
            retries: None,
            executor: Arc::new(ExternalExecutor { tool }),
        }
    }

    /// Override the agent's default retry budget for this tool.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    pub fn retries(&self) -> Option<u32> {
        self.retries
    }

    /// Run one call against this tool.
    pub async fn execute(&self, ctx: &RunContext<D>, arguments: &Map<String, Value>) -> Result<ToolResult, ModelRetry> {
        self.executor.execute(ctx, arguments).await
    }
}
