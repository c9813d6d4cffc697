//! Configuration system for the Ask DAF assistant
//!
//! Loaded from a TOML file. Secrets are never stored in the file: every
//! credential is referenced by the name of an environment variable and
//! resolved at runtime.

use crate::rag::chunker::ChunkingStrategy;
use crate::rag::store::SearchMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main assistant configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantConfig {
    pub assistant: AssistantSection,
    pub llm: LlmSection,
    #[serde(default)]
    pub embedding: EmbeddingSection,
    #[serde(default)]
    pub rag: RagSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub finance: FinanceSection,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub tools: HashMap<String, ToolConfig>,
}

/// Assistant identity and conversation limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantSection {
    /// Assistant identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
    /// Organisation name injected into the system prompt
    #[serde(default)]
    pub organization: Option<String>,
    /// Preferred answer language ("fr" or "en")
    #[serde(default = "default_language")]
    pub language: String,
    /// Reporting currency
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_max_question_chars")]
    pub max_question_chars: usize,
    /// Messages kept per conversation
    #[serde(default = "default_history_messages")]
    pub history_messages: usize,
}

fn default_language() -> String {
    "fr".to_string()
}

fn default_currency() -> String {
    "EUR".to_string()
}

fn default_max_question_chars() -> usize {
    4000
}

fn default_history_messages() -> usize {
    20
}

/// LLM section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmSection {
    /// Provider name ("anthropic" or "openai")
    pub provider: String,
    pub model: String,
    /// Environment variable containing the API key
    pub api_key_env: String,
    /// Overrides the built-in DAF persona when set
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Embedding section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingSection {
    /// "openai" or "hashing"
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_embedding_provider() -> String {
    "hashing".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> usize {
    1536
}

fn default_embedding_batch_size() -> usize {
    100
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            api_key_env: None,
            batch_size: default_embedding_batch_size(),
            base_url: None,
        }
    }
}

/// Chunking and retrieval parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagSection {
    #[serde(default)]
    pub strategy: ChunkingStrategy,
    /// Maximum chunk size in estimated tokens
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in estimated tokens
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_max_chunks_per_document")]
    pub max_chunks_per_document: usize,
    #[serde(default = "default_context_token_budget")]
    pub context_token_budget: usize,
    #[serde(default)]
    pub search_mode: SearchMode,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    #[serde(default = "default_text_weight")]
    pub text_weight: f32,
}

fn default_chunk_size() -> usize {
    512
}

fn default_chunk_overlap() -> usize {
    50
}

fn default_top_k() -> usize {
    5
}

fn default_similarity_threshold() -> f32 {
    0.7
}

fn default_max_chunks_per_document() -> usize {
    3
}

fn default_context_token_budget() -> usize {
    3000
}

fn default_vector_weight() -> f32 {
    0.7
}

fn default_text_weight() -> f32 {
    0.3
}

impl Default for RagSection {
    fn default() -> Self {
        Self {
            strategy: ChunkingStrategy::default(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
            max_chunks_per_document: default_max_chunks_per_document(),
            context_token_budget: default_context_token_budget(),
            search_mode: SearchMode::default(),
            vector_weight: default_vector_weight(),
            text_weight: default_text_weight(),
        }
    }
}

/// Vector store backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgrest,
}

/// Vector store section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreSection {
    #[serde(default)]
    pub backend: StoreBackend,
    /// PostgREST base URL (e.g. https://xyz.supabase.co/rest/v1)
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_documents_table")]
    pub documents_table: String,
    #[serde(default = "default_chunks_table")]
    pub chunks_table: String,
    #[serde(default = "default_match_function")]
    pub match_function: String,
    #[serde(default = "default_hybrid_function")]
    pub hybrid_function: String,
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_documents_table() -> String {
    "documents".to_string()
}

fn default_chunks_table() -> String {
    "document_chunks".to_string()
}

fn default_match_function() -> String {
    "match_document_chunks".to_string()
}

fn default_hybrid_function() -> String {
    "hybrid_search".to_string()
}

fn default_store_timeout_ms() -> u64 {
    10_000
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            api_key_env: None,
            documents_table: default_documents_table(),
            chunks_table: default_chunks_table(),
            match_function: default_match_function(),
            hybrid_function: default_hybrid_function(),
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

/// Finance data section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FinanceSection {
    /// JSON file holding the invoice ledger
    #[serde(default)]
    pub ledger_path: Option<PathBuf>,
}

/// HTTP server section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Tool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ToolConfig {
    /// Simple form: tool_name = "identifier"
    Simple(String),
    /// Complex form: tool_name = { impl = "identifier", config = { ... } }
    Complex {
        #[serde(rename = "impl")]
        implementation: String,
        #[serde(default)]
        config: HashMap<String, serde_json::Value>,
    },
}

/// Budget configuration for the tool-calling loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetConfig {
    /// Maximum number of tool calls per question
    pub max_tool_calls: u32,
    /// Maximum number of LLM round trips per question
    pub max_iterations: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_tool_calls: 15,
            max_iterations: 8,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid assistant ID format: {0}")]
    InvalidAssistantId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AssistantConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AssistantConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_assistant_id(&self.assistant.id)?;
        self.rag.validate()?;

        if self.embedding.dimensions == 0 {
            return Err(ConfigError::InvalidConfig(
                "embedding.dimensions must be greater than zero".to_string(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "embedding.batch_size must be greater than zero".to_string(),
            ));
        }

        if self.store.backend == StoreBackend::Postgrest {
            let url = self.store.url.as_deref().ok_or_else(|| {
                ConfigError::InvalidConfig(
                    "postgrest store backend requires [store] url".to_string(),
                )
            })?;
            url::Url::parse(url).map_err(|e| {
                ConfigError::InvalidConfig(format!("store.url '{url}' is not a valid URL: {e}"))
            })?;
        }

        if self.budget.max_iterations == 0 {
            return Err(ConfigError::InvalidConfig(
                "budget.max_iterations must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Get LLM API key from environment variable
    pub fn get_llm_api_key(&self) -> Result<String, ConfigError> {
        Self::get_env_var_required(&self.llm.api_key_env)
    }

    /// Get embedding API key, falling back to the LLM key for OpenAI
    pub fn get_embedding_api_key(&self) -> Result<String, ConfigError> {
        match &self.embedding.api_key_env {
            Some(name) => Self::get_env_var_required(name),
            None if self.llm.provider == "openai" => self.get_llm_api_key(),
            None => Err(ConfigError::InvalidConfig(
                "embedding.api_key_env is required for the openai embedding provider".to_string(),
            )),
        }
    }

    /// Get vector store API key from environment variable
    pub fn get_store_api_key(&self) -> Option<String> {
        Self::get_env_var_optional(self.store.api_key_env.as_ref())
    }
}

impl RagSection {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "rag.chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::InvalidConfig(format!(
                "rag.chunk_overlap ({}) must be smaller than rag.chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::InvalidConfig(format!(
                "rag.similarity_threshold ({}) must be within [0, 1]",
                self.similarity_threshold
            )));
        }
        if self.vector_weight < 0.0 || self.text_weight < 0.0 {
            return Err(ConfigError::InvalidConfig(
                "rag hybrid weights must be non-negative".to_string(),
            ));
        }
        if self.vector_weight + self.text_weight == 0.0 {
            return Err(ConfigError::InvalidConfig(
                "rag hybrid weights cannot both be zero".to_string(),
            ));
        }
        if self.top_k == 0 {
            return Err(ConfigError::InvalidConfig(
                "rag.top_k must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Validate assistant ID format
fn validate_assistant_id(assistant_id: &str) -> Result<(), ConfigError> {
    let valid_chars = assistant_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if assistant_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidAssistantId(format!(
            "Assistant ID '{assistant_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
