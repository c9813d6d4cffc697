//! End-to-end question answering
//!
//! The assistant wired with the real tool system, a RAG pipeline over the
//! hashing embedder and either a scripted provider or the OpenAI provider
//! against a mocked Chat Completions API.


use ask_daf::intent::Intent;
use ask_daf::llm::provider::{LlmError, LlmProvider, ToolChoice};
use ask_daf::llm::providers::openai::{OpenAiConfig, OpenAiProvider};
use ask_daf::testing::mocks::{MockLlmProvider, MockTurn};
use ask_daf::{AskDaf, AskRequest, AssistantError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{ingest_policy, rag_pipeline, test_config, tool_system};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn assistant_with(llm: Arc<dyn LlmProvider>, with_documents: bool) -> AskDaf {
    let config = test_config();
    let rag = if with_documents {
        let (rag, _) = rag_pipeline(&config);
        ingest_policy(&rag).await;
        Some(rag)
    } else {
        None
    };
    let tools = Arc::new(tool_system(rag.clone()).await);
    AskDaf::new(Arc::new(config), llm, tools, rag)
}

fn completion(message: serde_json::Value, finish_reason: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-e2e",
        "object": "chat.completion",
        "model": "gpt-4o",
        "choices": [{"index": 0, "message": message, "finish_reason": finish_reason}],
        "usage": {"prompt_tokens": 100, "completion_tokens": 20, "total_tokens": 120}
    })
}

#[tokio::test]
async fn test_spending_question_over_openai_wire() {
    let server = MockServer::start().await;

    // Second round trip: the tool result is in the conversation
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("tool_call_id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            json!({
                "role": "assistant",
                "content": "En mars 2024, les dépenses engagées s'élèvent à 2 400,00 € TTC, toutes chez Cloudly."
            }),
            "stop",
        )))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_spending",
                    "type": "function",
                    "function": {
                        "name": "spending_summary",
                        "arguments": "{\"period\": \"2024-03\", \"group_by\": \"supplier\"}"
                    }
                }]
            }),
            "tool_calls",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(OpenAiConfig {
        api_key: "test-api-key".to_string(),
        base_url: server.uri(),
        timeout: Duration::from_secs(5),
    })
    .unwrap();
    let daf = assistant_with(Arc::new(provider), false).await;

    let response = daf
        .ask(AskRequest::new("Combien avons-nous dépensé en mars 2024 ?"))
        .await
        .unwrap();

    assert_eq!(response.intent.intent, Intent::SpendingAnalysis);
    assert_eq!(response.tool_invocations.len(), 1);
    assert_eq!(response.tool_invocations[0].name, "spending_summary");
    assert!(response.tool_invocations[0].success);

    let report = response.validation.unwrap();
    assert!(report.is_valid, "{:?}", report.issues);
    assert!(response.answer.contains("2 400,00 €"));
    assert_eq!(response.usage.total_tokens, 240);
    assert!(!response.retried);
}

#[tokio::test]
async fn test_document_search_tool_results_are_citable() {
    let provider = Arc::new(MockLlmProvider::new(vec![
        MockTurn::tool_call("search_documents", json!({"query": "devis commande", "top_k": 3})),
        MockTurn::text("La politique achats impose des devis comparatifs [1]."),
    ]));
    let daf = assistant_with(provider.clone(), true).await;

    let response = daf
        .ask(AskRequest::new("Que prévoit la politique achats pour les devis ?"))
        .await
        .unwrap();

    assert_eq!(response.tool_invocations[0].name, "search_documents");
    assert!(!response.sources.is_empty());
    assert!(response
        .sources
        .iter()
        .all(|source| source.document_title == "Politique achats"));
    assert_eq!(response.citations.len(), 1);
    assert_eq!(response.citations[0].document_title, "Politique achats");

    // Passages handed to the model carry their source number
    let requests = provider.requests().await;
    let tool_message = requests[1].messages.last().unwrap();
    assert!(tool_message.content.contains("\"source\""));
}

#[tokio::test]
async fn test_llm_failure_mid_loop_is_reported_and_not_recorded() {
    let provider = Arc::new(MockLlmProvider::new(vec![
        MockTurn::tool_call("overdue_invoices", json!({})),
        MockTurn::Fail(LlmError::NetworkError("upstream timeout".to_string())),
    ]));
    let daf = assistant_with(provider, false).await;

    let result = daf
        .ask(AskRequest::new("Quelles factures sont en retard ?").in_conversation("conv-fail"))
        .await;

    match result {
        Err(error @ AssistantError::LlmError { .. }) => assert_eq!(error.http_status(), 502),
        other => panic!("expected an LLM error, got {other:?}"),
    }
    assert!(daf.conversations().history("conv-fail").await.is_empty());
}

#[tokio::test]
async fn test_iteration_budget_stops_endless_tool_calls() {
    let provider = Arc::new(MockLlmProvider::new(vec![MockTurn::tool_call(
        "cash_forecast",
        json!({"days": 30}),
    )]));
    let daf = assistant_with(provider.clone(), false).await;

    let result = daf
        .ask(AskRequest::new("Prévision de trésorerie sur 30 jours"))
        .await;

    assert!(matches!(result, Err(AssistantError::BudgetExceeded { max: 3, .. })));
    let requests = provider.requests().await;
    assert_eq!(requests.len(), 3);
    assert!(requests[0].tools.is_some());
    assert!(requests[2].tools.is_some());
    assert_eq!(requests[2].tool_choice, Some(ToolChoice::None));
}

#[tokio::test]
async fn test_conversation_follow_up_sees_previous_answer() {
    let provider = Arc::new(MockLlmProvider::new(vec![
        MockTurn::tool_call("overdue_invoices", json!({})),
        MockTurn::text("Vous avez 3 factures en retard pour 1 860,00 €."),
        MockTurn::tool_call("search_invoices", json!({"supplier": "Acme"})),
        MockTurn::text("Chez Acme Fournitures, la facture INV-2024-003 de 300,00 € est en retard."),
    ]));
    let daf = assistant_with(provider.clone(), false).await;

    let first = daf
        .ask(AskRequest::new("Quelles factures sont en retard ?"))
        .await
        .unwrap();
    let second = daf
        .ask(AskRequest::new("Et chez Acme ?").in_conversation(first.conversation_id.clone()))
        .await
        .unwrap();

    assert_eq!(second.conversation_id, first.conversation_id);
    assert!(second.validation.unwrap().is_valid);

    let requests = provider.requests().await;
    let follow_up = &requests[2];
    assert!(follow_up
        .messages
        .iter()
        .any(|message| message.content.contains("1 860,00 €")));
}
