//! HTTP API
//!
//! Health probes and metrics alongside the assistant endpoints: questions,
//! document ingestion and deletion, retrieval and invoice extraction. Errors
//! are returned as the sanitized [`ErrorBody`] with a matching status code.

use crate::assistant::{AskDaf, AskRequest};
use crate::error::{AssistantError, ErrorBody, ErrorCode};
use crate::idp::InvoiceExtractor;
use crate::observability::health::HealthMonitor;
use crate::observability::metrics::metrics;
use crate::rag::{DocumentInput, RagPipeline, SearchHit, SearchMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

const MAX_JSON_BYTES: u64 = 64 * 1024;
const MAX_DOCUMENT_BYTES: u64 = 10 * 1024 * 1024;

/// Shared handles for the route handlers
#[derive(Clone)]
pub struct AppState {
    pub assistant: Arc<AskDaf>,
    pub rag: Arc<RagPipeline>,
    pub extractor: Arc<InvoiceExtractor>,
    pub health: Arc<HealthMonitor>,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub mode: Option<SearchMode>,
    #[serde(default)]
    pub document_ids: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    query: String,
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
struct ApiDocumentationResponse {
    service: &'static str,
    version: &'static str,
    endpoints: BTreeMap<&'static str, &'static str>,
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn error_reply(error: &AssistantError) -> warp::reply::WithStatus<warp::reply::Json> {
    let status = StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    warp::reply::with_status(warp::reply::json(&error.to_error_body()), status)
}

fn json_reply<T: Serialize>(value: &T, status: StatusCode) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(value), status)
}

/// Every route, with CORS open and rejections rendered as error bodies
pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .then(|state: AppState| async move {
            let status = state.health.health_status().await;
            let code = if status.is_healthy() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            json_reply(&status, code)
        });

    let ready = warp::path("ready")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .then(|state: AppState| async move {
            let readiness = state.health.readiness().await;
            let code = if readiness.ready {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            json_reply(&readiness, code)
        });

    let live = warp::path("live")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .map(|state: AppState| warp::reply::json(&state.health.liveness()));

    let metrics_route = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&metrics().get_metrics()));

    let root = warp::path::end().and(warp::get()).map(|| {
        let endpoints = BTreeMap::from([
            ("GET /health", "Overall health with component checks"),
            ("GET /ready", "Readiness probe"),
            ("GET /live", "Liveness probe"),
            ("GET /metrics", "Metrics snapshot"),
            ("POST /ask", "Ask a finance question"),
            ("GET /documents", "List ingested documents"),
            ("POST /documents", "Ingest a document"),
            ("DELETE /documents/{id}", "Delete a document and its chunks"),
            ("POST /search", "Retrieve document passages"),
            ("POST /extract", "Extract invoice fields from text"),
        ]);
        warp::reply::json(&ApiDocumentationResponse {
            service: "ask-daf",
            version: env!("CARGO_PKG_VERSION"),
            endpoints,
        })
    });

    let ask = warp::path("ask")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_JSON_BYTES))
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .then(|request: AskRequest, state: AppState| async move {
            match state.assistant.ask(request).await {
                Ok(response) => json_reply(&response, StatusCode::OK),
                Err(e) => error_reply(&e),
            }
        });

    let list_documents = warp::path("documents")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .then(|state: AppState| async move {
            match state.rag.list_documents().await {
                Ok(documents) => json_reply(&documents, StatusCode::OK),
                Err(e) => error_reply(&e),
            }
        });

    let ingest = warp::path("documents")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_DOCUMENT_BYTES))
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .then(|input: DocumentInput, state: AppState| async move {
            match state.rag.ingest(input).await {
                Ok(report) => json_reply(&report, StatusCode::CREATED),
                Err(e) => error_reply(&e),
            }
        });

    let delete = warp::path!("documents" / String)
        .and(warp::delete())
        .and(with_state(state.clone()))
        .then(|document_id: String, state: AppState| async move {
            match state.rag.delete(&document_id).await {
                Ok(()) => json_reply(
                    &serde_json::json!({ "deleted": document_id }),
                    StatusCode::OK,
                ),
                Err(e) => error_reply(&e),
            }
        });

    let search = warp::path("search")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_JSON_BYTES))
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .then(|request: SearchRequest, state: AppState| async move {
            let mut options = state.rag.default_options().clone();
            if let Some(top_k) = request.top_k {
                options.top_k = top_k.clamp(1, 50);
            }
            if let Some(mode) = request.mode {
                options.search_mode = mode;
            }
            options.document_ids = request.document_ids;

            match state.rag.search(&request.query, &options).await {
                Ok(hits) => json_reply(
                    &SearchResponse {
                        query: request.query,
                        hits,
                    },
                    StatusCode::OK,
                ),
                Err(e) => error_reply(&e),
            }
        });

    let extract = warp::path("extract")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_DOCUMENT_BYTES))
        .and(warp::body::json())
        .and(with_state(state))
        .then(|request: ExtractRequest, state: AppState| async move {
            match state.extractor.extract(&request.text).await {
                Ok(invoice) => json_reply(&invoice, StatusCode::OK),
                Err(e) => error_reply(&AssistantError::from(e)),
            }
        });

    health
        .or(ready)
        .or(live)
        .or(metrics_route)
        .or(root)
        .or(ask)
        .or(list_documents)
        .or(ingest)
        .or(delete)
        .or(search)
        .or(extract)
        .with(
            warp::cors()
                .allow_any_origin()
                .allow_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
                .allow_headers(vec!["content-type"]),
        )
        .recover(handle_rejection)
}

async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid JSON body: {e}"))
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large".to_string())
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else if rejection.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Expected an application/json body".to_string(),
        )
    } else {
        warn!(?rejection, "Unhandled rejection");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    };

    let code = if status == StatusCode::INTERNAL_SERVER_ERROR {
        ErrorCode::InternalError
    } else {
        ErrorCode::InvalidInput
    };
    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorBody { code, message }),
        status,
    ))
}

/// Serve until `shutdown` resolves
pub async fn serve(state: AppState, addr: SocketAddr, shutdown: impl Future<Output = ()> + Send + 'static) {
    let (bound, server) = warp::serve(routes(state)).bind_with_graceful_shutdown(addr, shutdown);
    info!(address = %bound, "HTTP API listening");
    metrics().set_service_state("serving");
    server.await;
    metrics().set_service_state("stopped");
    info!("HTTP API stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finance::ledger::tests::sample_ledger;
    use crate::rag::{Embedder, HashingEmbedder, InMemoryStore, VectorStore};
    use crate::testing::mocks::MockLlmProvider;
    use crate::tools::{ToolContext, ToolSystem};
    use chrono::NaiveDate;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    async fn state(provider: MockLlmProvider) -> AppState {
        let config = Arc::new(crate::testing::test_config());
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(config.embedding.dimensions));
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::new(config.embedding.dimensions));
        let rag = Arc::new(RagPipeline::new(&config, embedder, Arc::clone(&store)));

        let context = ToolContext {
            ledger: Arc::new(sample_ledger()),
            rag: Some(Arc::clone(&rag)),
            today: NaiveDate::from_ymd_opt(2024, 3, 20),
        };
        let mut tools = ToolSystem::new(context);
        tools.initialize(&HashMap::new()).await.unwrap();

        let llm = Arc::new(provider);
        let assistant = AskDaf::new(config, llm.clone(), Arc::new(tools), Some(Arc::clone(&rag)));
        AppState {
            assistant: Arc::new(assistant),
            rag,
            extractor: Arc::new(InvoiceExtractor::heuristic_only()),
            health: Arc::new(HealthMonitor::new("ask-daf-test").with_store(store).with_llm(llm)),
        }
    }

    fn body<B: AsRef<[u8]>>(response: &warp::http::Response<B>) -> Value {
        serde_json::from_slice(response.body().as_ref()).unwrap()
    }

    #[tokio::test]
    async fn test_probes_and_root() {
        let api = routes(state(MockLlmProvider::single_response("ok")).await);

        let health = warp::test::request().path("/health").reply(&api).await;
        assert_eq!(health.status(), 200);
        assert_eq!(body(&health)["status"], "healthy");

        let ready = warp::test::request().path("/ready").reply(&api).await;
        assert_eq!(body(&ready)["ready"], true);

        let live = warp::test::request().path("/live").reply(&api).await;
        assert_eq!(body(&live)["alive"], true);

        let root = warp::test::request().path("/").reply(&api).await;
        assert!(body(&root)["endpoints"]["POST /ask"].is_string());

        let metrics = warp::test::request().path("/metrics").reply(&api).await;
        assert!(body(&metrics)["questions"].is_object());
    }

    #[tokio::test]
    async fn test_cors_headers_and_unknown_route() {
        let api = routes(state(MockLlmProvider::single_response("ok")).await);

        let health = warp::test::request()
            .path("/health")
            .header("origin", "https://daf.example.com")
            .reply(&api)
            .await;
        assert_eq!(health.status(), 200);
        assert_eq!(health.headers()["access-control-allow-origin"], "https://daf.example.com");

        let missing = warp::test::request().path("/nowhere").reply(&api).await;
        assert_eq!(missing.status(), 404);
        assert_eq!(body(&missing)["code"], "invalid_input");
    }

    #[tokio::test]
    async fn test_ask_greeting() {
        let api = routes(state(MockLlmProvider::single_response("unused")).await);
        let response = warp::test::request()
            .method("POST")
            .path("/ask")
            .json(&json!({"question": "Bonjour"}))
            .reply(&api)
            .await;

        assert_eq!(response.status(), 200);
        let payload = body(&response);
        assert_eq!(payload["intent"]["intent"], "greeting");
        assert!(payload["conversation_id"].is_string());
    }

    #[tokio::test]
    async fn test_ask_errors_use_error_body() {
        let api = routes(state(MockLlmProvider::single_response("unused")).await);

        let empty = warp::test::request()
            .method("POST")
            .path("/ask")
            .json(&json!({"question": ""}))
            .reply(&api)
            .await;
        assert_eq!(empty.status(), 400);
        assert_eq!(body(&empty)["code"], "invalid_input");

        let malformed = warp::test::request()
            .method("POST")
            .path("/ask")
            .header("content-type", "application/json")
            .body("{not json")
            .reply(&api)
            .await;
        assert_eq!(malformed.status(), 400);

        let failing = routes(state(MockLlmProvider::with_failure()).await);
        let llm_down = warp::test::request()
            .method("POST")
            .path("/ask")
            .json(&json!({"question": "Quelles factures sont en retard ?"}))
            .reply(&failing)
            .await;
        assert_eq!(llm_down.status(), 502);
        assert_eq!(body(&llm_down)["code"], "llm_error");
    }

    #[tokio::test]
    async fn test_document_lifecycle() {
        let api = routes(state(MockLlmProvider::single_response("ok")).await);

        let ingest = warp::test::request()
            .method("POST")
            .path("/documents")
            .json(&json!({
                "id": "cgv",
                "title": "Conditions générales",
                "content": "Les pénalités de retard sont exigibles dès le lendemain de l'échéance."
            }))
            .reply(&api)
            .await;
        assert_eq!(ingest.status(), 201);
        assert_eq!(body(&ingest)["document_id"], "cgv");

        let search = warp::test::request()
            .method("POST")
            .path("/search")
            .json(&json!({"query": "pénalités de retard échéance"}))
            .reply(&api)
            .await;
        assert_eq!(search.status(), 200);
        assert_eq!(body(&search)["hits"][0]["document_id"], "cgv");

        let delete = warp::test::request()
            .method("DELETE")
            .path("/documents/cgv")
            .reply(&api)
            .await;
        assert_eq!(delete.status(), 200);

        let missing = warp::test::request()
            .method("DELETE")
            .path("/documents/cgv")
            .reply(&api)
            .await;
        assert_eq!(missing.status(), 404);
    }

    #[tokio::test]
    async fn test_extract_endpoint() {
        let api = routes(state(MockLlmProvider::single_response("unused")).await);

        let response = warp::test::request()
            .method("POST")
            .path("/extract")
            .json(&json!({"text": "Facture n° FA-77\nDate de facture : 01/03/2024\nTotal HT : 100,00 €\nTVA : 20,00 €\nTotal TTC : 120,00 €"}))
            .reply(&api)
            .await;
        assert_eq!(response.status(), 200);
        let payload = body(&response);
        assert_eq!(payload["invoice_number"], "FA-77");
        assert_eq!(payload["amount_incl_tax"], 120.0);

        let empty = warp::test::request()
            .method("POST")
            .path("/extract")
            .json(&json!({"text": "  "}))
            .reply(&api)
            .await;
        assert_eq!(empty.status(), 400);
    }
}
