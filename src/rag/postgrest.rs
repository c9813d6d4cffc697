//! PostgREST-backed vector store
//!
//! Rows go to the documents and chunks tables through the REST interface.
//! Similarity and hybrid search invoke SQL functions by name through
//! `/rpc/<function>`; the functions themselves live in the database.

use crate::config::StoreSection;
use crate::rag::store::{
    DocumentRecord, HybridWeights, SearchHit, StoreError, StoredChunk, VectorStore,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// PostgREST store configuration
#[derive(Debug, Clone)]
pub struct PostgrestConfig {
    /// Base URL, e.g. `https://xyz.supabase.co/rest/v1`
    pub base_url: String,
    pub api_key: Option<String>,
    pub documents_table: String,
    pub chunks_table: String,
    pub match_function: String,
    pub hybrid_function: String,
    pub timeout: Duration,
}

impl PostgrestConfig {
    pub fn from_section(section: &StoreSection, api_key: Option<String>) -> Result<Self, StoreError> {
        let base_url = section
            .url
            .clone()
            .ok_or_else(|| StoreError::Unavailable("store url is not configured".to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            documents_table: section.documents_table.clone(),
            chunks_table: section.chunks_table.clone(),
            match_function: section.match_function.clone(),
            hybrid_function: section.hybrid_function.clone(),
            timeout: Duration::from_millis(section.timeout_ms),
        })
    }
}

pub struct PostgrestStore {
    config: PostgrestConfig,
    client: Client,
}

impl PostgrestStore {
    pub fn new(config: PostgrestConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.config.base_url, table)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rpc/{}", self.config.base_url, function)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder
                .header("apikey", key)
                .header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, StoreError> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::RequestFailed(format!("PostgREST error: {status} - {body}")))
    }

    async fn json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, StoreError> {
        response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))
    }

    fn into_hits(rows: Vec<RpcChunkRow>, hybrid: bool) -> Vec<SearchHit> {
        rows.into_iter()
            .map(|row| {
                let similarity = row.similarity.unwrap_or_default();
                let score = if hybrid {
                    row.combined_score.unwrap_or(similarity)
                } else {
                    similarity
                };
                SearchHit {
                    chunk_id: row.id,
                    document_id: row.document_id,
                    document_title: row.document_title,
                    chunk_index: row.chunk_index.unwrap_or_default(),
                    content: row.content,
                    similarity,
                    text_score: if hybrid { row.text_rank } else { None },
                    score,
                }
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
struct ChunkRow<'a> {
    id: &'a str,
    document_id: &'a str,
    chunk_index: usize,
    content: &'a str,
    token_count: usize,
    embedding: &'a [f32],
}

/// Row shape returned by the search functions. Columns beyond
/// `id`, `document_id` and `content` are optional.
#[derive(Debug, Deserialize)]
struct RpcChunkRow {
    id: String,
    document_id: String,
    content: String,
    #[serde(default)]
    chunk_index: Option<usize>,
    #[serde(default)]
    document_title: Option<String>,
    #[serde(default)]
    similarity: Option<f32>,
    #[serde(default)]
    text_rank: Option<f32>,
    #[serde(default)]
    combined_score: Option<f32>,
}

#[async_trait]
impl VectorStore for PostgrestStore {
    fn name(&self) -> &str {
        "postgrest"
    }

    async fn upsert_document(&self, document: &DocumentRecord) -> Result<(), StoreError> {
        let request = self
            .client
            .post(self.table_url(&self.config.documents_table))
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[document]);
        self.send(request).await?;
        Ok(())
    }

    async fn insert_chunks(&self, chunks: &[StoredChunk]) -> Result<(), StoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let rows: Vec<ChunkRow<'_>> = chunks
            .iter()
            .map(|chunk| ChunkRow {
                id: &chunk.id,
                document_id: &chunk.document_id,
                chunk_index: chunk.chunk_index,
                content: &chunk.content,
                token_count: chunk.token_count,
                embedding: &chunk.embedding,
            })
            .collect();

        debug!("Inserting {} chunks into {}", rows.len(), self.config.chunks_table);
        let request = self
            .client
            .post(self.table_url(&self.config.chunks_table))
            .header("Prefer", "return=minimal")
            .json(&rows);
        self.send(request).await?;
        Ok(())
    }

    async fn delete_chunks(&self, document_id: &str) -> Result<(), StoreError> {
        let request = self
            .client
            .delete(self.table_url(&self.config.chunks_table))
            .query(&[("document_id", format!("eq.{document_id}"))]);
        self.send(request).await?;
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), StoreError> {
        self.delete_chunks(document_id).await?;

        let request = self
            .client
            .delete(self.table_url(&self.config.documents_table))
            .query(&[("id", format!("eq.{document_id}"))])
            .header("Prefer", "return=representation");
        let deleted: Vec<serde_json::Value> = Self::json(self.send(request).await?).await?;

        if deleted.is_empty() {
            return Err(StoreError::NotFound(document_id.to_string()));
        }
        Ok(())
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentRecord>, StoreError> {
        let request = self
            .client
            .get(self.table_url(&self.config.documents_table))
            .query(&[
                ("id", format!("eq.{document_id}")),
                ("select", "*".to_string()),
            ]);
        let mut rows: Vec<DocumentRecord> = Self::json(self.send(request).await?).await?;
        Ok(rows.pop())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentRecord>, StoreError> {
        let request = self
            .client
            .get(self.table_url(&self.config.documents_table))
            .query(&[("select", "*"), ("order", "created_at.desc")]);
        Self::json(self.send(request).await?).await
    }

    async fn has_ready_documents(&self) -> Result<bool, StoreError> {
        let request = self
            .client
            .get(self.table_url(&self.config.documents_table))
            .query(&[("select", "id"), ("status", "eq.ready"), ("limit", "1")]);
        let rows: Vec<serde_json::Value> = Self::json(self.send(request).await?).await?;
        Ok(!rows.is_empty())
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let request = self
            .client
            .post(self.rpc_url(&self.config.match_function))
            .json(&json!({
                "query_embedding": embedding,
                "match_threshold": 0.0,
                "match_count": limit,
            }));
        let rows: Vec<RpcChunkRow> = Self::json(self.send(request).await?).await?;
        Ok(Self::into_hits(rows, false))
    }

    async fn hybrid_search(
        &self,
        query: &str,
        embedding: &[f32],
        limit: usize,
        weights: HybridWeights,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let request = self
            .client
            .post(self.rpc_url(&self.config.hybrid_function))
            .json(&json!({
                "query_text": query,
                "query_embedding": embedding,
                "match_count": limit,
                "vector_weight": weights.vector,
                "text_weight": weights.text,
            }));
        let rows: Vec<RpcChunkRow> = Self::json(self.send(request).await?).await?;
        Ok(Self::into_hits(rows, true))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let request = self
            .client
            .get(self.table_url(&self.config.documents_table))
            .query(&[("select", "id"), ("limit", "1")]);
        self.send(request).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_section_requires_url() {
        let section = StoreSection::default();
        assert!(matches!(
            PostgrestConfig::from_section(&section, None),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn test_config_from_section_trims_trailing_slash() {
        let section = StoreSection {
            url: Some("https://db.example.com/rest/v1/".to_string()),
            ..Default::default()
        };
        let config = PostgrestConfig::from_section(&section, Some("k".to_string())).unwrap();
        assert_eq!(config.base_url, "https://db.example.com/rest/v1");
        assert_eq!(config.match_function, "match_document_chunks");
        assert_eq!(config.timeout, Duration::from_millis(10_000));

        let store = PostgrestStore::new(config).unwrap();
        assert_eq!(
            store.rpc_url("hybrid_search"),
            "https://db.example.com/rest/v1/rpc/hybrid_search"
        );
    }

    #[test]
    fn test_rpc_rows_tolerate_missing_columns() {
        let rows: Vec<RpcChunkRow> = serde_json::from_value(json!([
            {"id": "c1", "document_id": "d1", "content": "texte", "similarity": 0.8}
        ]))
        .unwrap();
        let hits = PostgrestStore::into_hits(rows, true);
        assert_eq!(hits[0].score, 0.8);
        assert_eq!(hits[0].chunk_index, 0);
        assert!(hits[0].document_title.is_none());
    }
}
