//! Error types for the Ask DAF assistant
//!
//! Every subsystem has its own error enum; `AssistantError` aggregates them
//! and maps each variant to a stable public error code with a sanitized
//! message for API responses.

use crate::config::ConfigError;
use crate::finance::LedgerError;
use crate::idp::ExtractionError;
use crate::rag::embedding::EmbeddingError;
use crate::rag::store::StoreError;
use crate::tools::ToolError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for assistant operations
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("LLM provider error: {message}")]
    LlmError { message: String },

    #[error("Retrieval error: {message}")]
    RetrievalError { message: String },

    #[error("Tool execution failed: {message}")]
    ToolExecutionFailed { message: String },

    #[error("Budget exceeded: {what} limit of {max} reached")]
    BudgetExceeded { what: String, max: u32 },

    #[error("Internal error: {message}")]
    InternalError { message: String },

    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Tool error: {0}")]
    ToolError(#[from] ToolError),

    #[error("Vector store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Embedding error: {0}")]
    EmbeddingError(#[from] EmbeddingError),

    #[error("Extraction error: {0}")]
    ExtractionError(#[from] ExtractionError),

    #[error("Ledger error: {0}")]
    LedgerError(#[from] LedgerError),
}

/// Public error codes returned by the HTTP API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidInput,
    LlmError,
    RetrievalError,
    ToolExecutionFailed,
    BudgetExceeded,
    InternalError,
}

/// Serializable error payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl AssistantError {
    /// Map the error to its public code and a sanitized message
    pub fn to_error_body(&self) -> ErrorBody {
        let (code, message) = match self {
            AssistantError::InvalidInput { message } => (ErrorCode::InvalidInput, message.clone()),
            AssistantError::LlmError { message } => (ErrorCode::LlmError, message.clone()),
            AssistantError::RetrievalError { message } => {
                (ErrorCode::RetrievalError, message.clone())
            }
            AssistantError::ToolExecutionFailed { message } => {
                (ErrorCode::ToolExecutionFailed, message.clone())
            }
            AssistantError::BudgetExceeded { what, max } => (
                ErrorCode::BudgetExceeded,
                format!("{what} limit of {max} reached"),
            ),
            AssistantError::InternalError { message } => {
                (ErrorCode::InternalError, message.clone())
            }
            AssistantError::ConfigError(e) => (
                ErrorCode::InternalError,
                format!("Configuration error: {e}"),
            ),
            AssistantError::ToolError(e) => {
                (ErrorCode::ToolExecutionFailed, format!("Tool error: {e}"))
            }
            AssistantError::StoreError(e @ StoreError::NotFound(_)) => {
                (ErrorCode::InvalidInput, e.to_string())
            }
            AssistantError::StoreError(e) => {
                (ErrorCode::RetrievalError, format!("Vector store error: {e}"))
            }
            AssistantError::EmbeddingError(e) => {
                (ErrorCode::RetrievalError, format!("Embedding error: {e}"))
            }
            AssistantError::ExtractionError(ExtractionError::EmptyDocument) => (
                ErrorCode::InvalidInput,
                "Document text is empty".to_string(),
            ),
            AssistantError::ExtractionError(e) => {
                (ErrorCode::LlmError, format!("Extraction error: {e}"))
            }
            AssistantError::LedgerError(
                e @ (LedgerError::InvalidPeriod(_) | LedgerError::InvalidFilter(_)),
            ) => (ErrorCode::InvalidInput, e.to_string()),
            AssistantError::LedgerError(e) => {
                (ErrorCode::InternalError, format!("Ledger error: {e}"))
            }
        };

        ErrorBody {
            code,
            message: sanitize_error_message(&message),
        }
    }

    /// HTTP status matching the public error code
    pub fn http_status(&self) -> u16 {
        if matches!(self, AssistantError::StoreError(StoreError::NotFound(_))) {
            return 404;
        }
        match self.to_error_body().code {
            ErrorCode::InvalidInput => 400,
            ErrorCode::BudgetExceeded => 422,
            ErrorCode::LlmError | ErrorCode::RetrievalError => 502,
            ErrorCode::ToolExecutionFailed | ErrorCode::InternalError => 500,
        }
    }

    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn llm_error<S: Into<String>>(message: S) -> Self {
        Self::LlmError {
            message: message.into(),
        }
    }

    pub fn retrieval_error<S: Into<String>>(message: S) -> Self {
        Self::RetrievalError {
            message: message.into(),
        }
    }

    pub fn tool_execution_failed<S: Into<String>>(message: S) -> Self {
        Self::ToolExecutionFailed {
            message: message.into(),
        }
    }

    pub fn budget_exceeded<S: Into<String>>(what: S, max: u32) -> Self {
        Self::BudgetExceeded {
            what: what.into(),
            max,
        }
    }

    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Mask secrets and sensitive paths, then bound the message length
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let mut sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .to_string();

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_ERROR_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for assistant operations
pub type AssistantResult<T> = Result<T, AssistantError>;
