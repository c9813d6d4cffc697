//! OpenAI embedder against a mocked `/embeddings` endpoint

use ask_daf::rag::embedding::{OpenAiEmbedder, OpenAiEmbedderConfig};
use ask_daf::rag::{Embedder, EmbeddingError};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn embedder(server: &MockServer, dimensions: usize, batch_size: usize) -> OpenAiEmbedder {
    OpenAiEmbedder::new(OpenAiEmbedderConfig {
        api_key: "sk-embed".to_string(),
        base_url: server.uri(),
        model: "text-embedding-3-small".to_string(),
        dimensions,
        batch_size,
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

#[tokio::test]
async fn test_embeddings_are_returned_in_input_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(header("Authorization", "Bearer sk-embed"))
        .and(body_partial_json(json!({
            "model": "text-embedding-3-small",
            "dimensions": 3,
            "input": ["facture", "devis"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                {"object": "embedding", "index": 1, "embedding": [0.0, 1.0, 0.0]},
                {"object": "embedding", "index": 0, "embedding": [1.0, 0.0, 0.0]}
            ],
            "model": "text-embedding-3-small"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let vectors = embedder(&server, 3, 100)
        .embed(&["facture".to_string(), "devis".to_string()])
        .await
        .unwrap();

    assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
}

#[tokio::test]
async fn test_inputs_are_sent_in_batches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"index": 0, "embedding": [1.0, 0.0]},
                {"index": 1, "embedding": [0.0, 1.0]}
            ]
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"index": 0, "embedding": [0.5, 0.5]}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let texts: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
    let vectors = embedder(&server, 2, 2).embed(&texts).await.unwrap();

    assert_eq!(vectors.len(), 3);
    assert_eq!(vectors[2], vec![0.5, 0.5]);
}

#[tokio::test]
async fn test_dimension_mismatch_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"index": 0, "embedding": [1.0, 0.0]}]
        })))
        .mount(&server)
        .await;

    let result = embedder(&server, 4, 10).embed_one("facture").await;
    assert!(matches!(
        result,
        Err(EmbeddingError::DimensionMismatch { expected: 4, actual: 2 })
    ));
}

#[tokio::test]
async fn test_http_errors_are_mapped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
        .mount(&server)
        .await;

    let result = embedder(&server, 2, 10).embed_one("facture").await;
    assert!(matches!(result, Err(EmbeddingError::AuthenticationFailed(_))));
}

#[tokio::test]
async fn test_missing_embeddings_are_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;

    let result = embedder(&server, 2, 10)
        .embed(&["a".to_string(), "b".to_string()])
        .await;
    assert!(matches!(result, Err(EmbeddingError::InvalidResponse(_))));
}
