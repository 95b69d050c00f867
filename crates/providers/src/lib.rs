//! LLM Provider implementations for TypeClaw.
//!
//! All providers implement the `typeclaw_core::Provider` trait.
//! The router selects the correct provider based on configuration.

pub mod openai_compat;
pub mod router;

pub use openai_compat::{OpenAiCompatProvider, RetryPolicy};
pub use router::{ProviderRouter, build_from_config};
