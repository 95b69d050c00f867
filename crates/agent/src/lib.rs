//! The agent run loop for TypeClaw.
//!
//! An [`Agent`] is configured once through [`AgentBuilder`] and then driven
//! with [`Agent::run`]. Each run follows a **Dispatch → Inspect → Execute**
//! cycle:
//!
//! 1. **Dispatch** the history, tools and response format to the model
//! 2. **Inspect** the reply: no tool calls means the answer is final
//! 3. **Execute** each requested tool, append the results, loop back to 1
//!
//! Tools are typed: [`AgentTool::new`] derives input and output schemas from
//! the handler's types and validates both sides of every call.

pub mod agent;
pub mod loop_runner;
pub mod run_context;
pub mod tool;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use agent::{Agent, AgentBuilder, RunOptions};
pub use loop_runner::RunResult;
pub use run_context::RunContext;
pub use tool::{AgentTool, ToolFuture};
