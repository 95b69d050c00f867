//! The run loop.
//!
//! Each iteration dispatches the full history to the model, then either
//! finalizes the answer or executes the requested tools in order and loops:
//!
//! 1. **Check** the request ceiling before anything is sent
//! 2. **Dispatch** through the [`Client`](typeclaw_core::Client), which shapes
//!    the request for the response format and extracts structured content
//! 3. **Finalize** when the model called no tools, decoding the output
//! 4. **Execute** tool calls one at a time, folding results into history
//!
//! Output validation failures and `ModelRetry` signals are fed back to the
//! model while their budgets last; everything else ends the run.

use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use typeclaw_core::agent::UsageLimits;
use typeclaw_core::error::{Error, ModelRetry, OutputError, Result, RunError};
use typeclaw_core::message::{Message, ToolCall};
use typeclaw_core::provider::{ChatRequest, ChatResponse, Usage};
use typeclaw_core::tool::ToolResult;

use crate::agent::{Agent, RunOptions};
use crate::run_context::RunContext;

/// The outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult<O> {
    pub output: O,

    /// Full history, valid as seed messages for a follow-up run
    pub messages: Vec<Message>,

    pub usage: Usage,
    pub run_id: String,

    /// Model requests issued
    pub requests: u32,

    /// Tool executions that produced a result
    pub tool_calls: u32,
}

impl<D: Send + Sync + 'static, O> Agent<D, O> {
    /// Run the agent to completion.
    ///
    /// Cancelling `cancel` aborts the run at the next suspension point,
    /// whether that is a model request or a tool handler.
    pub async fn run(&self, cancel: CancellationToken, deps: D, options: RunOptions) -> Result<RunResult<O>> {
        let RunOptions {
            prompt,
            messages,
            retries,
            usage_limits,
        } = options;
        if prompt.is_none() && messages.is_empty() {
            return Err(Error::Config {
                message: "a run needs a prompt or seed messages".into(),
            });
        }

        let mut ctx = RunContext::start(deps, prompt, messages, cancel.clone());
        let system_prompt = self.system_prompt(ctx.deps());
        let mut output_attempts = 0;

        info!(run_id = %ctx.run_id(), model = %self.model, "Agent run started");

        for iteration in 0..self.config.max_iterations {
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled.into());
            }
            usage_limits
                .check_before_request(ctx.requests())
                .map_err(RunError::from)?;

            debug!(
                iteration = iteration + 1,
                messages = ctx.messages().len(),
                "Agent loop iteration"
            );

            let request = self.request(&ctx, system_prompt.clone());
            ctx.record_request();
            let started = Instant::now();
            let dispatched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RunError::Cancelled.into()),
                response = self.client.chat(request) => response,
            };
            debug!(duration_ms = started.elapsed().as_millis() as u64, "Model responded");

            let ChatResponse { choices, usage, .. } = match dispatched {
                Ok(response) => response,
                Err(Error::Output(e)) => {
                    self.recover_output(&mut ctx, &mut output_attempts, e)?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            let Some(choice) = choices.into_iter().next() else {
                return Err(RunError::NoResponse.into());
            };

            if let Some(usage) = usage {
                usage_limits
                    .check_completion_tokens(usage.completion_tokens)
                    .map_err(RunError::from)?;
                ctx.add_usage(usage);
            }

            let message = choice.message;
            if !message.has_tool_calls() {
                let decoded = (self.decoder)(choice.structured_content.as_deref(), &message);
                ctx.push_message(message);
                match decoded {
                    Ok(output) => return Ok(self.finish(ctx, output)),
                    Err(e) => {
                        self.recover_output(&mut ctx, &mut output_attempts, e)?;
                        continue;
                    }
                }
            }

            let calls = message.tool_calls.clone();
            ctx.push_message(message);
            for call in &calls {
                self.execute_tool_call(&mut ctx, call, retries, &usage_limits, &cancel)
                    .await?;
            }
        }

        Err(RunError::MaxIterations(self.config.max_iterations).into())
    }

    fn request(&self, ctx: &RunContext<D>, system_prompt: Option<String>) -> ChatRequest {
        let mut request = ChatRequest::new(self.model.clone(), ctx.messages().to_vec());
        request.system_prompt = system_prompt;
        request.tools = self.definitions.clone();
        request.tool_choice = self.tool_choice.clone();
        request.response_format = self.response_format.clone();
        request.temperature = self.config.temperature;
        request.max_tokens = self.config.max_tokens;
        request
    }

    /// Feed an output failure back to the model, or give up once the budget is spent.
    fn recover_output(&self, ctx: &mut RunContext<D>, attempts: &mut u32, error: OutputError) -> Result<()> {
        let max_retries = self.config.output_retries();
        if *attempts >= max_retries {
            return Err(RunError::OutputRetriesExceeded {
                max_retries,
                source: error,
            }
            .into());
        }
        *attempts += 1;
        warn!(attempt = *attempts, max_retries, "Output rejected: {error}");
        ctx.push_message(Message::user(error.feedback()));
        Ok(())
    }

    async fn execute_tool_call(
        &self,
        ctx: &mut RunContext<D>,
        call: &ToolCall,
        retries: Option<u32>,
        limits: &UsageLimits,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let name = call.name();
        let tool = self
            .tool(name)
            .ok_or_else(|| RunError::UnknownTool(name.to_string()))?;
        let max_retries = retries.or(tool.retries()).unwrap_or(self.config.retries);
        ctx.begin_tool_call(&call.id, name, max_retries);

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunError::Cancelled.into()),
            outcome = tool.execute(&*ctx, &call.function.arguments) => outcome,
        };
        debug!(
            tool = name,
            duration_ms = started.elapsed().as_millis() as u64,
            "Tool executed"
        );

        let message = match outcome {
            Err(ModelRetry { message }) => {
                if ctx.retry() >= max_retries {
                    return Err(RunError::ToolRetriesExceeded {
                        tool: name.to_string(),
                        max_retries,
                        message,
                    }
                    .into());
                }
                ctx.record_tool_retry(name);
                warn!(tool = name, attempt = ctx.retry() + 1, max_retries, "Tool asked for a retry: {message}");
                ToolResult::error(message).into_message(&call.id)
            }
            Ok(result) => {
                if result.is_error {
                    warn!(tool = name, "Tool returned an error result");
                } else {
                    ctx.reset_tool_retries(name);
                }
                let executed = ctx.record_tool_execution();
                limits.check_tool_calls(executed).map_err(RunError::from)?;
                result.into_message(&call.id)
            }
        };
        ctx.push_message(message);
        ctx.end_tool_call();
        Ok(())
    }

    fn finish(&self, ctx: RunContext<D>, output: O) -> RunResult<O> {
        let (messages, usage, run_id, requests, tool_calls) = ctx.into_parts();
        info!(
            run_id = %run_id,
            model = %self.model,
            requests,
            tool_calls,
            total_tokens = usage.total_tokens,
            "Agent run finished"
        );
        RunResult {
            output,
            messages,
            usage,
            run_id,
            requests,
            tool_calls,
        }
    }
}
