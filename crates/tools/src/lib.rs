//! Built-in tool implementations for TypeClaw.
//!
//! Built-in tools implement the untyped [`Tool`] trait and are registered on
//! an agent with `AgentBuilder::with_external_tool`.

pub mod calculator;

use std::sync::Arc;

use typeclaw_core::tool::Tool;

pub use calculator::CalculatorTool;

/// All built-in tools.
pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(CalculatorTool)]
}
