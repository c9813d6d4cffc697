//! Test doubles for the LLM provider, the embedder and tools, plus the
//! shared test configuration

pub mod fixtures;
pub mod mocks;

pub use fixtures::test_config;
pub use mocks::*;
