//! Anthropic Messages provider
//!
//! Messages API integration. Tool calls travel as `tool_use` content blocks
//! and their results as `tool_result` blocks inside user turns.

use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, Message,
    MessageRole, ResponseFormat, TokenUsage, ToolCall, ToolChoice,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub version: String,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            timeout: Duration::from_secs(60),
            version: "2023-06-01".to_string(),
        }
    }
}

pub struct AnthropicProvider {
    config: AnthropicConfig,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::NotConfigured(
                "Anthropic API key is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Convert internal messages to Anthropic format.
    ///
    /// System messages are concatenated into the top-level `system` field.
    /// Consecutive turns with the same role are merged, which is how several
    /// tool results end up in a single user turn.
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_parts: Vec<String> = Vec::new();
        let mut anthropic_messages: Vec<AnthropicMessage> = Vec::new();

        for message in messages {
            let (role, blocks) = match message.role {
                MessageRole::System => {
                    system_parts.push(message.content.clone());
                    continue;
                }
                MessageRole::User => (
                    "user",
                    vec![AnthropicContentBlock::Text {
                        text: message.content.clone(),
                    }],
                ),
                MessageRole::Assistant => {
                    let mut blocks = Vec::new();
                    if !message.content.is_empty() {
                        blocks.push(AnthropicContentBlock::Text {
                            text: message.content.clone(),
                        });
                    }
                    for call in message.tool_calls.iter().flatten() {
                        blocks.push(AnthropicContentBlock::ToolUse {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            input: call.arguments.clone(),
                        });
                    }
                    ("assistant", blocks)
                }
                MessageRole::Tool => (
                    "user",
                    vec![AnthropicContentBlock::ToolResult {
                        tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                        content: message.content.clone(),
                    }],
                ),
            };

            if blocks.is_empty() {
                continue;
            }

            match anthropic_messages.last_mut() {
                Some(last) if last.role == role => last.content.extend(blocks),
                _ => anthropic_messages.push(AnthropicMessage {
                    role: role.to_string(),
                    content: blocks,
                }),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, anthropic_messages)
    }

    /// Anthropic has no schema-constrained output mode, so the schema is
    /// appended to the system prompt instead
    fn apply_response_format(system: Option<String>, format: Option<&ResponseFormat>) -> Option<String> {
        let instruction = match format {
            Some(ResponseFormat::Json) => {
                "Respond with a single valid JSON object and nothing else.".to_string()
            }
            Some(ResponseFormat::JsonSchema { json_schema }) => format!(
                "Respond with a single valid JSON object matching this JSON schema and nothing else:\n{}",
                json_schema.schema
            ),
            Some(ResponseFormat::Text) | None => return system,
        };

        Some(match system {
            Some(existing) => format!("{existing}\n\n{instruction}"),
            None => instruction,
        })
    }

    /// Convert Anthropic stop reason to internal format
    fn convert_finish_reason(reason: Option<&str>) -> FinishReason {
        match reason {
            Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
            Some("max_tokens") => FinishReason::Length,
            Some("tool_use") => FinishReason::ToolCalls,
            _ => FinishReason::Error,
        }
    }

    async fn post_messages(
        &self,
        request: &AnthropicCompletionRequest,
    ) -> Result<reqwest::Response, LlmError> {
        self.client
            .post(format!("{}/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.version)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn available_models(&self) -> Vec<String> {
        vec![
            "claude-sonnet-4-20250514".to_string(),
            "claude-opus-4-20250514".to_string(),
            "claude-3-7-sonnet-20250219".to_string(),
            "claude-3-5-sonnet-20241022".to_string(),
            "claude-3-5-haiku-20241022".to_string(),
        ]
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (system, messages) = Self::convert_messages(&request.messages);
        let system = Self::apply_response_format(system, request.response_format.as_ref());

        let tools = request.tools.as_ref().map(|descriptions| {
            descriptions
                .iter()
                .map(|d| AnthropicTool {
                    name: d.name.clone(),
                    description: d.description.clone(),
                    input_schema: d.parameters.clone(),
                })
                .collect()
        });

        let anthropic_request = AnthropicCompletionRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(4096),
            messages,
            system,
            temperature: request.temperature,
            tools,
            tool_choice: request
                .tools
                .as_ref()
                .and(request.tool_choice.as_ref())
                .map(anthropic_tool_choice),
        };

        debug!(
            "Anthropic request: {} messages, tools={}",
            anthropic_request.messages.len(),
            anthropic_request.tools.as_ref().map(|t| t.len()).unwrap_or(0)
        );

        let response = self.post_messages(&anthropic_request).await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = format!("Anthropic API error: {status} - {error_text}");
            return Err(match status.as_u16() {
                401 | 403 => LlmError::AuthenticationFailed(message),
                429 => LlmError::RateLimitExceeded(message),
                404 => LlmError::ModelNotFound(message),
                _ => LlmError::ApiError(message),
            });
        }

        let anthropic_response: AnthropicCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if anthropic_response.content.is_empty() {
            return Err(LlmError::ApiError(
                "No content returned from Anthropic".to_string(),
            ));
        }

        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();
        for block in anthropic_response.content {
            match block {
                AnthropicContentBlock::Text { text } => text_parts.push(text),
                AnthropicContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                }),
                AnthropicContentBlock::ToolResult { .. } | AnthropicContentBlock::Other => {}
            }
        }

        let usage = TokenUsage {
            prompt_tokens: anthropic_response.usage.input_tokens,
            completion_tokens: anthropic_response.usage.output_tokens,
            total_tokens: anthropic_response.usage.input_tokens
                + anthropic_response.usage.output_tokens,
        };

        Ok(CompletionResponse {
            content: if text_parts.is_empty() {
                None
            } else {
                Some(text_parts.join(""))
            },
            model: anthropic_response.model,
            usage,
            finish_reason: Self::convert_finish_reason(anthropic_response.stop_reason.as_deref()),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            metadata: request.metadata,
        })
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        // No dedicated health endpoint, a one-token request stands in for it
        let test_request = AnthropicCompletionRequest {
            model: "claude-3-5-haiku-20241022".to_string(),
            max_tokens: 1,
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: vec![AnthropicContentBlock::Text {
                    text: "Hi".to_string(),
                }],
            }],
            system: None,
            temperature: None,
            tools: None,
            tool_choice: None,
        };

        let response = self.post_messages(&test_request).await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(LlmError::AuthenticationFailed(
                "Anthropic API authentication failed".to_string(),
            ))
        }
    }
}

/// `tool_choice` object of the Messages API; `required` maps to `any`
fn anthropic_tool_choice(choice: &ToolChoice) -> serde_json::Value {
    match choice {
        ToolChoice::Auto => serde_json::json!({"type": "auto"}),
        ToolChoice::None => serde_json::json!({"type": "none"}),
        ToolChoice::Required => serde_json::json!({"type": "any"}),
        ToolChoice::Tool(name) => serde_json::json!({"type": "tool", "name": name}),
    }
}

#[derive(Debug, Serialize)]
struct AnthropicCompletionRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicCompletionResponse {
    content: Vec<AnthropicContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::JsonSchemaDefinition;
    use serde_json::json;

    #[test]
    fn test_anthropic_config_default() {
        let config = AnthropicConfig::default();
        assert_eq!(config.base_url, "https://api.anthropic.com/v1");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.version, "2023-06-01");
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn test_anthropic_provider_creation_without_api_key() {
        let result = AnthropicProvider::new(AnthropicConfig::default());
        assert!(matches!(result, Err(LlmError::NotConfigured(_))));
    }

    #[test]
    fn test_anthropic_provider_name() {
        let provider = AnthropicProvider::new(AnthropicConfig {
            api_key: "test-key".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(provider.name(), "anthropic");
        assert!(!provider.available_models().is_empty());
    }

    #[test]
    fn test_system_messages_are_extracted() {
        let messages = vec![
            Message::system("You are the DAF assistant"),
            Message::user("Bonjour"),
        ];

        let (system, converted) = AnthropicProvider::convert_messages(&messages);
        assert_eq!(system.as_deref(), Some("You are the DAF assistant"));
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].role, "user");
    }

    #[test]
    fn test_tool_results_are_merged_into_one_user_turn() {
        let calls = vec![
            ToolCall {
                id: "toolu_1".to_string(),
                name: "search_invoices".to_string(),
                arguments: json!({}),
            },
            ToolCall {
                id: "toolu_2".to_string(),
                name: "overdue_invoices".to_string(),
                arguments: json!({}),
            },
        ];
        let messages = vec![
            Message::user("Factures en retard ?"),
            Message::assistant_with_tool_calls("", calls),
            Message::tool_result("toolu_1", "[]"),
            Message::tool_result("toolu_2", "[]"),
        ];

        let (_, converted) = AnthropicProvider::convert_messages(&messages);
        assert_eq!(converted.len(), 3);
        assert_eq!(converted[1].role, "assistant");
        assert_eq!(converted[1].content.len(), 2);
        assert_eq!(converted[2].role, "user");
        assert_eq!(converted[2].content.len(), 2);

        let json = serde_json::to_value(&converted[2]).unwrap();
        assert_eq!(json["content"][0]["type"], "tool_result");
        assert_eq!(json["content"][1]["tool_use_id"], "toolu_2");
    }

    #[test]
    fn test_response_format_appends_schema_to_system() {
        let format = ResponseFormat::JsonSchema {
            json_schema: JsonSchemaDefinition {
                name: "Invoice".to_string(),
                strict: None,
                schema: json!({"type": "object"}),
            },
        };
        let system = AnthropicProvider::apply_response_format(Some("Base".to_string()), Some(&format));
        let system = system.unwrap();
        assert!(system.starts_with("Base"));
        assert!(system.contains("\"type\":\"object\""));

        assert_eq!(
            AnthropicProvider::apply_response_format(None, Some(&ResponseFormat::Text)),
            None
        );
    }

    #[test]
    fn test_finish_reason_conversion() {
        assert_eq!(
            AnthropicProvider::convert_finish_reason(Some("end_turn")),
            FinishReason::Stop
        );
        assert_eq!(
            AnthropicProvider::convert_finish_reason(Some("max_tokens")),
            FinishReason::Length
        );
        assert_eq!(
            AnthropicProvider::convert_finish_reason(Some("tool_use")),
            FinishReason::ToolCalls
        );
        assert_eq!(
            AnthropicProvider::convert_finish_reason(None),
            FinishReason::Error
        );
    }

    #[test]
    fn test_unknown_content_blocks_deserialize() {
        let block: AnthropicContentBlock =
            serde_json::from_value(json!({"type": "thinking", "thinking": "..."})).unwrap();
        assert!(matches!(block, AnthropicContentBlock::Other));
    }
}
