//! Ask DAF
//!
//! A finance assistant for the finance department (DAF): questions in natural
//! language are classified, answered by an LLM that calls finance tools over
//! the invoice ledger and retrieves passages from internal documents, and the
//! answer is checked for unsupported figures before it is returned.
//!
//! # Overview
//!
//! - [`rag`]: chunking, embeddings, vector or hybrid search and citations
//! - [`intent`]: rule-based intent classification and entity extraction
//! - [`validation`]: grounding checks for numbers and citations in answers
//! - [`finance`] and [`tools`]: the invoice ledger and the tools the LLM calls
//! - [`idp`]: invoice field extraction from document text
//! - [`assistant`]: the question pipeline tying the above together
//! - [`api`]: the warp HTTP surface
//!
//! # Quick Start
//!
//! ```rust
//! use ask_daf::intent::{Intent, IntentClassifier};
//!
//! let classifier = IntentClassifier::new();
//! let classification = classifier.classify("Quelles factures sont en retard ?");
//! assert_eq!(classification.intent, Intent::PaymentStatus);
//! ```

pub mod api;
pub mod assistant;
pub mod config;
pub mod error;
pub mod finance;
pub mod idp;
pub mod intent;
pub mod llm;
pub mod observability;
pub mod rag;
pub mod testing;
pub mod text;
pub mod tools;
pub mod validation;

pub use assistant::{AskDaf, AskRequest, AskResponse};
pub use config::AssistantConfig;
pub use error::{AssistantError, AssistantResult};
pub use tools::{Tool, ToolDescription, ToolError, ToolSystem};
