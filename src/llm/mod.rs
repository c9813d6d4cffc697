//! LLM provider abstraction layer
//!
//! Provider-agnostic completion interface with tool calling, implemented
//! for OpenAI and Anthropic.

pub mod provider;
pub mod providers;

pub use provider::*;
pub use providers::*;
