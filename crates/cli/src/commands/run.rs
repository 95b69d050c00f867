//! `typeclaw run`: a single agent run from the command line.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use typeclaw_agent::{Agent, AgentBuilder, RunOptions, RunResult};
use typeclaw_config::{AppConfig, parse_output_mode};
use typeclaw_core::{
    ChatRequest, Client, Message, Provider, ResponseFormat, ResponseFormatMode, Schema, StreamChunk,
};

const SYSTEM_PROMPT: &str = "You are a precise assistant. Use the calculator tool for any arithmetic \
instead of computing it yourself.";

#[derive(Debug, Args)]
pub struct RunArgs {
    /// The prompt to send
    pub prompt: String,

    /// Model to use (defaults to the configured model)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Output mode: text, native, tool or prompted
    #[arg(long)]
    pub mode: Option<String>,

    /// JSON Schema file the answer must conform to
    #[arg(long)]
    pub schema: Option<PathBuf>,

    /// Stream a single model turn to stdout as it is generated (no tools)
    #[arg(long)]
    pub stream: bool,

    /// Maximum number of model requests
    #[arg(long)]
    pub request_limit: Option<u32>,

    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Print the whole run result as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;
    let format = resolve_format(&args, &config)?;

    if !config.has_api_key() {
        warn!(
            provider = %config.default_provider,
            "No API key configured (set TYPECLAW_API_KEY or OPENAI_API_KEY)"
        );
    }

    let provider = typeclaw_providers::build_from_config(&config)?.default_provider()?;
    let model = args
        .model
        .clone()
        .or_else(|| config.provider().and_then(|p| p.default_model.clone()))
        .unwrap_or_else(|| config.default_model.clone());

    if args.stream {
        return stream_turn(provider, model, &args.prompt, &config, format).await;
    }

    let mut agent_config = config.agent_config();
    if let Some(max) = args.max_iterations {
        agent_config.max_iterations = max;
    }
    let mut limits = config.limits;
    if let Some(limit) = args.request_limit {
        limits.request_limit = limit;
    }

    let builder: AgentBuilder<(), String> = typeclaw_tools::builtin_tools().into_iter().fold(
        Agent::<()>::builder(provider, model)
            .with_system_prompt(SYSTEM_PROMPT)
            .with_config(agent_config),
        |builder, tool| builder.with_external_tool(tool),
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let options = RunOptions::prompt(args.prompt.clone()).with_usage_limits(limits);
    let result = match format {
        None => text_result(builder.build()?.run(cancel, (), options).await?),
        Some(format) => {
            builder
                .output_format::<Value>(format)
                .build()?
                .run(cancel, (), options)
                .await?
        }
    };

    print_result(&result, args.json)
}

/// Work out the response format from `--mode`, `--schema` and `[agent] output_mode`.
///
/// An explicit structured `--mode` needs a schema. The configured mode only
/// applies when a schema is given, and a schema alone defaults to tool mode.
fn resolve_format(args: &RunArgs, config: &AppConfig) -> Result<Option<ResponseFormat>> {
    let mode = match &args.mode {
        Some(mode) => parse_output_mode(mode)?,
        None => config.agent.output_mode()?,
    };

    let Some(path) = &args.schema else {
        if let (Some(flag), Some(_)) = (&args.mode, mode) {
            bail!("--mode {flag} requires --schema <file>");
        }
        return Ok(None);
    };
    if args.mode.is_some() && mode.is_none() {
        bail!("--schema cannot be combined with --mode text");
    }

    let (name, schema) = load_schema(path)?;
    Ok(Some(ResponseFormat::new(
        mode.unwrap_or(ResponseFormatMode::Tool),
        name,
        schema,
    )))
}

/// Read a JSON Schema file. The format is named after its `title`, or the file stem.
fn load_schema(path: &Path) -> Result<(String, Schema)> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema {}", path.display()))?;
    let document: Value = serde_json::from_str(&text)
        .with_context(|| format!("Schema {} is not valid JSON", path.display()))?;

    let name = document
        .get("title")
        .and_then(Value::as_str)
        .map(String::from)
        .or_else(|| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "output".into());

    let schema = Schema::new(document).with_context(|| format!("Invalid schema {}", path.display()))?;
    Ok((name, schema))
}

fn text_result(result: RunResult<String>) -> RunResult<Value> {
    RunResult {
        output: Value::String(result.output),
        messages: result.messages,
        usage: result.usage,
        run_id: result.run_id,
        requests: result.requests,
        tool_calls: result.tool_calls,
    }
}

fn print_result(result: &RunResult<Value>, json: bool) -> Result<()> {
    let mut stdout = std::io::stdout();
    if json {
        writeln!(stdout, "{}", serde_json::to_string_pretty(result)?)?;
        return Ok(());
    }
    match &result.output {
        Value::String(text) => writeln!(stdout, "{text}")?,
        other => writeln!(stdout, "{}", serde_json::to_string_pretty(other)?)?,
    }
    Ok(())
}

async fn stream_turn(
    provider: Arc<dyn Provider>,
    model: String,
    prompt: &str,
    config: &AppConfig,
    format: Option<ResponseFormat>,
) -> Result<()> {
    let mut request = ChatRequest::new(model, vec![Message::user(prompt)]);
    request.system_prompt = Some(SYSTEM_PROMPT.into());
    request.temperature = config.default_temperature;
    request.max_tokens = config.default_max_tokens;
    request.response_format = format;

    let mut stdout = std::io::stdout();
    let mut streamed = false;
    let mut write_error = None;
    let response = Client::new(provider)
        .chat_stream(request, |chunk| {
            if write_error.is_some() {
                return;
            }
            match write_delta(&mut stdout, chunk) {
                Ok(wrote) => streamed |= wrote,
                Err(e) => write_error = Some(e),
            }
        })
        .await?;
    if let Some(e) = write_error {
        return Err(e).context("Failed to write to stdout");
    }

    if streamed {
        writeln!(stdout)?;
    } else if let Some(structured) = response.first().and_then(|c| c.structured_content.as_deref()) {
        // Tool mode carries the answer in the output tool call, not the text
        writeln!(stdout, "{structured}")?;
    }
    Ok(())
}

/// Write the first choice's text from `chunk`, reporting whether anything was written.
fn write_delta(out: &mut impl Write, chunk: &StreamChunk) -> std::io::Result<bool> {
    let mut wrote = false;
    for choice in chunk.choices.iter().filter(|c| c.index == 0) {
        if let Some(text) = choice.delta.content.as_deref().filter(|t| !t.is_empty()) {
            out.write_all(text.as_bytes())?;
            wrote = true;
        }
    }
    if wrote {
        out.flush()?;
    }
    Ok(wrote)
}
