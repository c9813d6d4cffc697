//! Integration tests for the Anthropic provider
//!
//! Behavioral contracts against a mocked Messages API:
//! - headers, system prompt and usage mapping
//! - tool_use blocks in responses and tool_result blocks in requests
//! - JSON output instructions
//! - error mapping

use ask_daf::llm::provider::{
    CompletionRequest, FinishReason, JsonSchemaDefinition, LlmError, LlmProvider, Message,
    ResponseFormat, ToolCall, ToolChoice,
};
use ask_daf::llm::providers::anthropic::{AnthropicConfig, AnthropicProvider};
use ask_daf::tools::ToolDescription;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(base_url: &str) -> AnthropicConfig {
    AnthropicConfig {
        api_key: "test-anthropic-key".to_string(),
        base_url: base_url.to_string(),
        timeout: Duration::from_secs(5),
        version: "2023-06-01".to_string(),
    }
}

fn test_request() -> CompletionRequest {
    let mut request = CompletionRequest::new(
        "claude-sonnet-4-20250514",
        vec![
            Message::system("You are Ask DAF."),
            Message::user("Top 3 fournisseurs cette année ?"),
        ],
    );
    request.max_tokens = Some(500);
    request
}

fn text_message(text: &str) -> serde_json::Value {
    json!({
        "id": "msg_01",
        "type": "message",
        "role": "assistant",
        "model": "claude-sonnet-4-20250514",
        "content": [{"type": "text", "text": text}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 120, "output_tokens": 30}
    })
}

#[tokio::test]
async fn test_anthropic_provider_returns_completion() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "test-anthropic-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "model": "claude-sonnet-4-20250514",
            "max_tokens": 500,
            "system": "You are Ask DAF.",
            "messages": [{"role": "user", "content": [{"type": "text", "text": "Top 3 fournisseurs cette année ?"}]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_message(
            "Vos trois premiers fournisseurs sont Acme, Bureau Plus et Cloudly.",
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = AnthropicProvider::new(test_config(&mock_server.uri())).unwrap();
    let response = provider.complete(test_request()).await.unwrap();

    assert_eq!(
        response.content.as_deref(),
        Some("Vos trois premiers fournisseurs sont Acme, Bureau Plus et Cloudly.")
    );
    assert_eq!(response.finish_reason, FinishReason::Stop);
    assert_eq!(response.usage.prompt_tokens, 120);
    assert_eq!(response.usage.completion_tokens, 30);
    assert_eq!(response.usage.total_tokens, 150);
}

#[tokio::test]
async fn test_anthropic_provider_parses_tool_use_blocks() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_partial_json(json!({
            "tools": [{"name": "top_suppliers", "input_schema": {"type": "object"}}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "claude-sonnet-4-20250514",
            "content": [
                {"type": "text", "text": "Je consulte le classement."},
                {"type": "tool_use", "id": "toolu_01", "name": "top_suppliers", "input": {"limit": 3, "period": "this_year"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 200, "output_tokens": 40}
        })))
        .mount(&mock_server)
        .await;

    let provider = AnthropicProvider::new(test_config(&mock_server.uri())).unwrap();
    let mut request = test_request();
    request.tools = Some(vec![ToolDescription {
        name: "top_suppliers".to_string(),
        description: "Rank suppliers by spend".to_string(),
        parameters: json!({"type": "object", "properties": {"limit": {"type": "integer"}}}),
    }]);

    let response = provider.complete(request).await.unwrap();

    assert_eq!(response.finish_reason, FinishReason::ToolCalls);
    assert_eq!(response.content.as_deref(), Some("Je consulte le classement."));
    let calls = response.tool_calls.unwrap();
    assert_eq!(calls[0].id, "toolu_01");
    assert_eq!(calls[0].name, "top_suppliers");
    assert_eq!(calls[0].arguments["limit"], 3);
}

#[tokio::test]
async fn test_anthropic_provider_sends_tool_results_in_user_turn() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_partial_json(json!({
            "messages": [
                {"role": "user"},
                {"role": "assistant", "content": [{"type": "tool_use", "id": "toolu_01", "name": "top_suppliers"}]},
                {"role": "user", "content": [{"type": "tool_result", "tool_use_id": "toolu_01"}]}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_message("Acme arrive en tête.")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = AnthropicProvider::new(test_config(&mock_server.uri())).unwrap();
    let mut request = test_request();
    request.messages.push(Message::assistant_with_tool_calls(
        "",
        vec![ToolCall {
            id: "toolu_01".to_string(),
            name: "top_suppliers".to_string(),
            arguments: json!({"limit": 3}),
        }],
    ));
    request
        .messages
        .push(Message::tool_result("toolu_01", "[{\"supplier\":\"Acme\"}]"));

    let response = provider.complete(request).await.unwrap();
    assert_eq!(response.content.as_deref(), Some("Acme arrive en tête."));
}

#[tokio::test]
async fn test_anthropic_provider_keeps_tools_with_choice_none() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_partial_json(json!({
            "tools": [{"name": "top_suppliers"}],
            "tool_choice": {"type": "none"},
            "messages": [
                {"role": "user"},
                {"role": "assistant", "content": [{"type": "tool_use", "id": "toolu_01"}]},
                {"role": "user", "content": [{"type": "tool_result", "tool_use_id": "toolu_01"}]}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_message("Acme arrive en tête.")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = AnthropicProvider::new(test_config(&mock_server.uri())).unwrap();
    let mut request = test_request();
    request.tools = Some(vec![ToolDescription {
        name: "top_suppliers".to_string(),
        description: "Rank suppliers by spend".to_string(),
        parameters: json!({"type": "object", "properties": {"limit": {"type": "integer"}}}),
    }]);
    request.tool_choice = Some(ToolChoice::None);
    request.messages.push(Message::assistant_with_tool_calls(
        "",
        vec![ToolCall {
            id: "toolu_01".to_string(),
            name: "top_suppliers".to_string(),
            arguments: json!({"limit": 3}),
        }],
    ));
    request
        .messages
        .push(Message::tool_result("toolu_01", "[{\"supplier\":\"Acme\"}]"));

    let response = provider.complete(request).await.unwrap();
    assert_eq!(response.content.as_deref(), Some("Acme arrive en tête."));
}

#[tokio::test]
async fn test_anthropic_provider_omits_choice_without_tools() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_string_contains("tool_choice"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_message("Bonjour")))
        .mount(&mock_server)
        .await;

    let provider = AnthropicProvider::new(test_config(&mock_server.uri())).unwrap();
    let mut request = test_request();
    request.tool_choice = Some(ToolChoice::None);

    let response = provider.complete(request).await.unwrap();
    assert_eq!(response.content.as_deref(), Some("Bonjour"));
}

#[tokio::test]
async fn test_anthropic_provider_appends_json_schema_instruction() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_string_contains("matching this JSON schema"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(text_message("{\"invoice_number\":\"FA-9\"}")),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = AnthropicProvider::new(test_config(&mock_server.uri())).unwrap();
    let mut request = test_request();
    request.response_format = Some(ResponseFormat::JsonSchema {
        json_schema: JsonSchemaDefinition {
            name: "invoice_fields".to_string(),
            strict: None,
            schema: json!({"type": "object", "properties": {"invoice_number": {"type": "string"}}}),
        },
    });

    let response = provider.complete(request).await.unwrap();
    assert_eq!(
        response.content.as_deref(),
        Some("{\"invoice_number\":\"FA-9\"}")
    );
}

#[tokio::test]
async fn test_anthropic_provider_maps_errors() {
    let cases = [
        (401, "auth"),
        (429, "rate"),
        (404, "model"),
        (529, "api"),
    ];

    for (status, kind) in cases {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "type": "error",
                "error": {"type": "some_error", "message": "failure"}
            })))
            .mount(&mock_server)
            .await;

        let provider = AnthropicProvider::new(test_config(&mock_server.uri())).unwrap();
        let error = provider.complete(test_request()).await.unwrap_err();

        let matched = match kind {
            "auth" => matches!(error, LlmError::AuthenticationFailed(_)),
            "rate" => matches!(error, LlmError::RateLimitExceeded(_)),
            "model" => matches!(error, LlmError::ModelNotFound(_)),
            _ => matches!(error, LlmError::ApiError(_)),
        };
        assert!(matched, "status {status} mapped to {error:?}");
    }
}

#[tokio::test]
async fn test_anthropic_provider_rejects_empty_content() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "claude-sonnet-4-20250514",
            "content": [],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 0}
        })))
        .mount(&mock_server)
        .await;

    let provider = AnthropicProvider::new(test_config(&mock_server.uri())).unwrap();
    let result = provider.complete(test_request()).await;
    assert!(matches!(result, Err(LlmError::ApiError(_))));
}

#[tokio::test]
async fn test_anthropic_health_check() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_message("Hi")))
        .mount(&mock_server)
        .await;

    let provider = AnthropicProvider::new(test_config(&mock_server.uri())).unwrap();
    assert!(provider.health_check().await.is_ok());
}
