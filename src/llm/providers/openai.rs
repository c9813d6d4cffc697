//! OpenAI Chat Completions provider
//!
//! Function tools go out as `tools[].function`, tool results come back as
//! `role: "tool"` messages, and structured output uses `response_format`.
//! Network failures and 5xx responses are retried with a short backoff.

use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, Message,
    MessageRole, ResponseFormat, TokenUsage, ToolCall, ToolChoice,
};
use crate::text::estimate_tokens;
use crate::tools::ToolDescription;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Delays before each retry of a retryable failure
const RETRY_DELAYS_MS: [u64; 3] = [100, 200, 300];

/// Requests estimated above this size are logged as likely to overflow
const LARGE_REQUEST_TOKENS: usize = 120_000;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::NotConfigured(
                "OpenAI API key is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn build_body(request: &CompletionRequest) -> ChatBody {
        ChatBody {
            model: request.model.clone(),
            messages: request.messages.iter().map(wire_message).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: request
                .tools
                .as_ref()
                .map(|descriptions| descriptions.iter().map(wire_tool).collect()),
            tool_choice: request.tool_choice.as_ref().map(wire_tool_choice),
            response_format: request.response_format.as_ref().map(wire_format),
        }
    }

    async fn post_chat(&self, body: &ChatBody) -> Result<ChatReply, LlmError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                LlmError::NetworkError(format!(
                    "{e} (connect: {}, timeout: {})",
                    e.is_connect(),
                    e.is_timeout()
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}

/// Map a non-success status to the error the retry loop and callers expect
fn status_error(status: StatusCode, body: &str) -> LlmError {
    let message = format!("OpenAI API error: {status} - {body}");
    match status.as_u16() {
        401 | 403 => LlmError::AuthenticationFailed(message),
        404 => LlmError::ModelNotFound(message),
        429 => LlmError::RateLimitExceeded(message),
        code if code >= 500 => LlmError::RequestFailed(message),
        _ => {
            if body.contains("maximum context length") {
                warn!("Conversation exceeds the model context window");
            }
            LlmError::ApiError(message)
        }
    }
}

fn is_retryable(error: &LlmError) -> bool {
    matches!(error, LlmError::NetworkError(_) | LlmError::RequestFailed(_))
}

fn wire_message(message: &Message) -> ChatMessage {
    let tool_calls: Option<Vec<ChatToolCall>> = message.tool_calls.as_ref().map(|calls| {
        calls
            .iter()
            .map(|call| ChatToolCall {
                id: call.id.clone(),
                kind: "function".to_string(),
                function: ChatFunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.to_string(),
                },
            })
            .collect()
    });

    // An assistant turn that only requests tools has null content
    let content = match (&message.role, message.content.is_empty(), &tool_calls) {
        (MessageRole::Assistant, true, Some(_)) => None,
        _ => Some(message.content.clone()),
    };

    ChatMessage {
        role: match message.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
        .to_string(),
        content,
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    }
}

fn wire_tool(description: &ToolDescription) -> ChatTool {
    ChatTool {
        kind: "function".to_string(),
        function: ChatFunction {
            name: description.name.clone(),
            description: description.description.clone(),
            parameters: description.parameters.clone(),
        },
    }
}

fn wire_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => Value::from("auto"),
        ToolChoice::None => Value::from("none"),
        ToolChoice::Required => Value::from("required"),
        ToolChoice::Tool(name) => serde_json::json!({"type": "function", "function": {"name": name}}),
    }
}

fn wire_format(format: &ResponseFormat) -> Value {
    match format {
        ResponseFormat::Text => serde_json::json!({"type": "text"}),
        ResponseFormat::Json => serde_json::json!({"type": "json_object"}),
        ResponseFormat::JsonSchema { json_schema } => {
            let mut definition = serde_json::json!({
                "name": json_schema.name,
                "schema": json_schema.schema,
            });
            if let Some(strict) = json_schema.strict {
                definition["strict"] = Value::Bool(strict);
            }
            serde_json::json!({"type": "json_schema", "json_schema": definition})
        }
    }
}

/// Tool calls with unparseable arguments are dropped; an empty argument
/// string means no arguments
fn parse_tool_calls(calls: Vec<ChatToolCall>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .filter_map(|call| {
            let raw = call.function.arguments.trim();
            let arguments = if raw.is_empty() {
                Value::Object(Default::default())
            } else {
                match serde_json::from_str(raw) {
                    Ok(value) => value,
                    Err(e) => {
                        error!(tool = %call.function.name, error = %e, "Discarding tool call with invalid arguments");
                        return None;
                    }
                }
            };
            Some(ToolCall {
                id: call.id,
                name: call.function.name,
                arguments,
            })
        })
        .collect()
}

fn finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("tool_calls") => FinishReason::ToolCalls,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Error,
    }
}

fn into_completion(
    reply: ChatReply,
    metadata: std::collections::HashMap<String, String>,
) -> Result<CompletionResponse, LlmError> {
    let Some(choice) = reply.choices.into_iter().next() else {
        return Err(LlmError::ApiError("No choices returned from OpenAI".to_string()));
    };

    let tool_calls = choice
        .message
        .tool_calls
        .map(parse_tool_calls)
        .filter(|calls| !calls.is_empty());

    Ok(CompletionResponse {
        content: choice.message.content,
        model: reply.model,
        usage: TokenUsage {
            prompt_tokens: reply.usage.prompt_tokens,
            completion_tokens: reply.usage.completion_tokens,
            total_tokens: reply.usage.total_tokens,
        },
        finish_reason: finish_reason(choice.finish_reason.as_deref()),
        tool_calls,
        metadata,
    })
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn available_models(&self) -> Vec<String> {
        ["gpt-4o", "gpt-4o-mini", "gpt-4.1", "gpt-4.1-mini", "gpt-4-turbo"]
            .iter()
            .map(|model| model.to_string())
            .collect()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = Self::build_body(&request);

        let estimated: usize = request
            .messages
            .iter()
            .map(|message| estimate_tokens(&message.content))
            .sum();
        debug!(
            model = %body.model,
            messages = body.messages.len(),
            tools = body.tools.as_ref().map_or(0, Vec::len),
            estimated_tokens = estimated,
            "Sending chat completion"
        );
        if estimated > LARGE_REQUEST_TOKENS {
            warn!(estimated_tokens = estimated, "Request may exceed the model context window");
        }

        let mut attempt = 0;
        let reply = loop {
            match self.post_chat(&body).await {
                Ok(reply) => break reply,
                Err(e) if is_retryable(&e) && attempt < RETRY_DELAYS_MS.len() => {
                    let delay = RETRY_DELAYS_MS[attempt];
                    attempt += 1;
                    warn!(attempt, delay_ms = delay, error = %e, "Chat completion failed, retrying");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => {
                    error!(attempts = attempt + 1, error = %e, "Chat completion failed");
                    return Err(e);
                }
            }
        };

        let response = into_completion(reply, request.metadata)?;
        debug!(
            total_tokens = response.usage.total_tokens,
            finish_reason = ?response.finish_reason,
            tool_calls = response.tool_calls.as_ref().map_or(0, Vec::len),
            "Chat completion received"
        );
        Ok(response)
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let response = self
            .client
            .get(format!("{}/models", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(status_error(status, "model listing failed"))
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatBody {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    kind: String,
    function: ChatFunction,
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: ChatFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: ChatUsage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
