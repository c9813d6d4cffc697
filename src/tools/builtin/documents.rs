//! Retrieval over ingested documents

use super::config_u64;
use crate::rag::{RagPipeline, RetrievalOptions};
use crate::tools::{parameters_schema, parse_parameters, Tool, ToolContext, ToolDescription, ToolError};
use crate::text::truncate_chars;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const MAX_EXCERPT_CHARS: usize = 1500;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct SearchDocumentsParams {
    /// What to look for in contracts, policies and other documents
    query: String,
    /// Number of passages to return
    #[serde(default)]
    #[schemars(range(min = 1, max = 20))]
    top_k: Option<usize>,
}

/// Passages from ingested documents relevant to a query.
///
/// Results carry no citation number; the assistant assigns one to each
/// passage when it adds them to the answer's sources.
pub struct SearchDocumentsTool {
    rag: Arc<RagPipeline>,
    options: RetrievalOptions,
}

impl SearchDocumentsTool {
    pub fn new(context: ToolContext) -> Result<Self, ToolError> {
        let rag = context.rag.ok_or_else(|| {
            ToolError::InitializationError("document search needs a RAG pipeline".to_string())
        })?;
        let options = rag.default_options().clone();
        Ok(Self { rag, options })
    }
}

#[async_trait]
impl Tool for SearchDocumentsTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: "search_documents".to_string(),
            description: "Search the organisation's documents (contracts, policies, procedures, \
                          reports) and return the most relevant passages."
                .to_string(),
            parameters: parameters_schema::<SearchDocumentsParams>(),
        }
    }

    async fn initialize(&mut self, config: Option<&Value>) -> Result<(), ToolError> {
        if let Some(top_k) = config_u64(config, "top_k") {
            if top_k == 0 {
                return Err(ToolError::InitializationError(
                    "top_k must be at least 1".to_string(),
                ));
            }
            self.options.top_k = top_k as usize;
        }
        Ok(())
    }

    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
        let params: SearchDocumentsParams = parse_parameters(parameters)?;
        if params.query.trim().is_empty() {
            return Err(ToolError::ValidationError("query must not be empty".to_string()));
        }

        let mut options = self.options.clone();
        if let Some(top_k) = params.top_k {
            options.top_k = top_k;
        }

        let hits = self
            .rag
            .search(&params.query, &options)
            .await
            .map_err(|e| ToolError::ExecutionError(e.to_error_body().message))?;

        let results: Vec<Value> = hits
            .iter()
            .map(|hit| {
                json!({
                    "document_id": hit.document_id,
                    "document_title": hit.document_title.clone().unwrap_or_else(|| hit.document_id.clone()),
                    "chunk_index": hit.chunk_index,
                    "content": truncate_chars(&hit.content, MAX_EXCERPT_CHARS),
                    "score": hit.score,
                })
            })
            .collect();

        Ok(json!({
            "query": params.query,
            "results": results,
        }))
    }
}
