//! Per-run state shared with tool handlers.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use typeclaw_core::message::Message;
use typeclaw_core::provider::Usage;

/// Everything the run loop knows about one run.
///
/// The loop owns the context and mutates it between steps. Tool handlers get
/// a shared reference for the duration of a single call; the per-call fields
/// (`retry`, `max_retries`, `tool_call_id`) are reset before each call.
#[derive(Debug)]
pub struct RunContext<D> {
    deps: D,
    run_id: String,
    prompt: Option<String>,
    messages: Vec<Message>,
    usage: Usage,
    requests: u32,
    tool_calls: u32,
    retry: u32,
    max_retries: u32,
    tool_call_id: Option<String>,
    tool_retries: HashMap<String, u32>,
    cancellation: CancellationToken,
}

impl<D> RunContext<D> {
    /// A fresh context, e.g. for exercising a tool handler directly.
    pub fn new(deps: D, cancellation: CancellationToken) -> Self {
        Self {
            deps,
            run_id: uuid::Uuid::new_v4().to_string(),
            prompt: None,
            messages: Vec::new(),
            usage: Usage::default(),
            requests: 0,
            tool_calls: 0,
            retry: 0,
            max_retries: 0,
            tool_call_id: None,
            tool_retries: HashMap::new(),
            cancellation,
        }
    }

    pub(crate) fn start(
        deps: D,
        prompt: Option<String>,
        messages: Vec<Message>,
        cancellation: CancellationToken,
    ) -> Self {
        let mut ctx = Self::new(deps, cancellation);
        ctx.messages = messages;
        if let Some(prompt) = &prompt {
            ctx.messages.push(Message::user(prompt.clone()));
        }
        ctx.prompt = prompt;
        ctx
    }

    /// The dependency payload handed to `Agent::run`.
    pub fn deps(&self) -> &D {
        &self.deps
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The prompt this run started with, if any.
    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    /// Conversation history so far.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Token usage accumulated so far.
    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Model requests issued so far.
    pub fn requests(&self) -> u32 {
        self.requests
    }

    /// Non-fatal tool executions so far.
    pub fn tool_calls(&self) -> u32 {
        self.tool_calls
    }

    /// How many times the in-flight tool has asked for a retry in a row.
    pub fn retry(&self) -> u32 {
        self.retry
    }

    /// The retry budget of the in-flight tool call.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// True when another `ModelRetry` from the in-flight tool would end the run.
    pub fn last_attempt(&self) -> bool {
        self.retry >= self.max_retries
    }

    /// The id of the tool call being serviced.
    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_call_id.as_deref()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub(crate) fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub(crate) fn record_request(&mut self) {
        self.requests += 1;
    }

    pub(crate) fn add_usage(&mut self, usage: Usage) {
        self.usage += usage;
    }

    pub(crate) fn record_tool_execution(&mut self) -> u32 {
        self.tool_calls += 1;
        self.tool_calls
    }

    /// Point the per-call fields at a new tool call.
    pub(crate) fn begin_tool_call(&mut self, tool_call_id: &str, tool: &str, max_retries: u32) {
        self.retry = self.tool_retries.get(tool).copied().unwrap_or(0);
        self.max_retries = max_retries;
        self.tool_call_id = Some(tool_call_id.to_string());
    }

    pub(crate) fn record_tool_retry(&mut self, tool: &str) {
        *self.tool_retries.entry(tool.to_string()).or_insert(0) += 1;
    }

    pub(crate) fn reset_tool_retries(&mut self, tool: &str) {
        self.tool_retries.insert(tool.to_string(), 0);
    }

    pub(crate) fn end_tool_call(&mut self) {
        self.tool_call_id = None;
    }

    pub(crate) fn into_parts(self) -> (Vec<Message>, Usage, String, u32, u32) {
        (self.messages, self.usage, self.run_id, self.requests, self.tool_calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_appends_prompt_after_seed_history() {
        let seed = vec![Message::user("earlier"), Message::assistant("reply")];
        let ctx = RunContext::start((), Some("now".into()), seed, CancellationToken::new());
        assert_eq!(ctx.messages().len(), 3);
        assert_eq!(ctx.messages()[2].text(), "now");
        assert_eq!(ctx.prompt(), Some("now"));
        assert!(!ctx.run_id().is_empty());
    }

    #[test]
    fn retry_counters_are_per_tool() {
        let mut ctx = RunContext::new((), CancellationToken::new());
        ctx.record_tool_retry("a");
        ctx.record_tool_retry("a");
        ctx.begin_tool_call("c1", "a", 3);
        assert_eq!(ctx.retry(), 2);
        assert!(!ctx.last_attempt());

        ctx.begin_tool_call("c2", "b", 3);
        assert_eq!(ctx.retry(), 0);
        assert_eq!(ctx.tool_call_id(), Some("c2"));

        ctx.reset_tool_retries("a");
        ctx.begin_tool_call("c3", "a", 0);
        assert_eq!(ctx.retry(), 0);
        assert!(ctx.last_attempt());
    }

    #[test]
    fn deps_are_borrowed() {
        let ctx = RunContext::new(String::from("db"), CancellationToken::new());
        assert_eq!(ctx.deps(), "db");
    }
}
