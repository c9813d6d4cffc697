//! Mock implementations for testing
//!
//! A scripted [`MockLlmProvider`], a counting [`MockEmbedder`] and a
//! recording [`MockTool`], so the assistant loop and the RAG pipeline can be
//! exercised without network access.

use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, TokenUsage,
    ToolCall,
};
use crate::rag::embedding::{Embedder, EmbeddingError, HashingEmbedder};
use crate::tools::{Tool, ToolDescription, ToolError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One scripted model turn
#[derive(Debug, Clone)]
pub enum MockTurn {
    Text(String),
    ToolCalls(Vec<ToolCall>),
    Fail(LlmError),
}

impl MockTurn {
    pub fn text(content: impl Into<String>) -> Self {
        MockTurn::Text(content.into())
    }

    /// A turn requesting a single tool call
    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        let name = name.into();
        MockTurn::ToolCalls(vec![ToolCall {
            id: format!("call_{name}"),
            name,
            arguments,
        }])
    }
}

/// LLM provider that replays a script of turns and records every request.
///
/// Once the script is exhausted the last turn is repeated.
#[derive(Debug, Clone)]
pub struct MockLlmProvider {
    turns: Vec<MockTurn>,
    position: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    healthy: bool,
}

impl MockLlmProvider {
    pub fn new(turns: Vec<MockTurn>) -> Self {
        Self {
            turns,
            position: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            healthy: true,
        }
    }

    pub fn single_response(response: impl Into<String>) -> Self {
        Self::new(vec![MockTurn::text(response)])
    }

    pub fn with_failure() -> Self {
        Self {
            healthy: false,
            ..Self::new(vec![MockTurn::Fail(LlmError::RequestFailed(
                "Mock LLM failure".to_string(),
            ))])
        }
    }

    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }

    pub fn call_count(&self) -> usize {
        self.position.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn available_models(&self) -> Vec<String> {
        vec!["mock-model".to_string()]
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().await.push(request);
        let index = self.position.fetch_add(1, Ordering::SeqCst);

        let turn = self
            .turns
            .get(index)
            .or_else(|| self.turns.last())
            .cloned()
            .unwrap_or_else(|| MockTurn::text("Mock response"));

        let usage = TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        };
        match turn {
            MockTurn::Text(content) => Ok(CompletionResponse {
                content: Some(content),
                model: "mock-model".to_string(),
                usage,
                finish_reason: FinishReason::Stop,
                tool_calls: None,
                metadata: HashMap::new(),
            }),
            MockTurn::ToolCalls(calls) => Ok(CompletionResponse {
                content: None,
                model: "mock-model".to_string(),
                usage,
                finish_reason: FinishReason::ToolCalls,
                tool_calls: Some(calls),
                metadata: HashMap::new(),
            }),
            MockTurn::Fail(error) => Err(error),
        }
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        if self.healthy {
            Ok(())
        } else {
            Err(LlmError::RequestFailed("Mock health check failure".to_string()))
        }
    }
}

/// Deterministic embedder that counts calls and can be made to fail
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    inner: HashingEmbedder,
    calls: Arc<AtomicUsize>,
    should_fail: bool,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            inner: HashingEmbedder::new(dimensions),
            calls: Arc::new(AtomicUsize::new(0)),
            should_fail: false,
        }
    }

    pub fn with_failure(dimensions: usize) -> Self {
        Self {
            should_fail: true,
            ..Self::new(dimensions)
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn name(&self) -> &str {
        "mock"
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err(EmbeddingError::NetworkError("Mock embedding failure".to_string()));
        }
        Ok(texts.iter().map(|text| self.inner.embed_text(text)).collect())
    }
}

/// Tool returning a fixed result and recording its parameters
#[derive(Debug, Clone)]
pub struct MockTool {
    name: String,
    response: Value,
    should_fail: bool,
    calls: Arc<Mutex<Vec<Value>>>,
}

impl MockTool {
    pub fn new(name: impl Into<String>, response: Value) -> Self {
        Self {
            name: name.into(),
            response,
            should_fail: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_failure(name: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            ..Self::new(name, Value::Null)
        }
    }

    /// Shared handle to the recorded parameters
    pub fn calls(&self) -> Arc<Mutex<Vec<Value>>> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Tool for MockTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: self.name.clone(),
            description: format!("Mock tool {}", self.name),
            parameters: json!({"type": "object"}),
        }
    }

    async fn initialize(&mut self, _config: Option<&Value>) -> Result<(), ToolError> {
        Ok(())
    }

    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
        self.calls.lock().await.push(parameters.clone());
        if self.should_fail {
            return Err(ToolError::ExecutionError("Mock tool failure".to_string()));
        }
        Ok(self.response.clone())
    }
}
