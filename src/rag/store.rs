//! Vector store abstraction and the in-memory backend
//!
//! Documents and their embedded chunks live behind the `VectorStore` trait.
//! The in-memory store ranks chunks by cosine similarity and, in hybrid
//! mode, blends it with a BM25 full-text score normalised to `[0, 1]`.

use crate::rag::embedding::cosine_similarity;
use crate::text::tokenize;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio::sync::RwLock;

/// Vector store errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(String),
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Store request failed: {0}")]
    RequestFailed(String),
    #[error("Invalid store response: {0}")]
    InvalidResponse(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Retrieval mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Cosine similarity only
    Vector,
    /// Weighted blend of cosine similarity and full-text score
    #[default]
    Hybrid,
}

/// Weights of the hybrid score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridWeights {
    pub vector: f32,
    pub text: f32,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            vector: 0.7,
            text: 0.3,
        }
    }
}

/// Document lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Processing,
    Ready,
    Failed,
}

/// Stored document metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub source: Option<String>,
    pub status: DocumentStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub chunk_count: usize,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An embedded chunk ready for storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub token_count: usize,
    pub embedding: Vec<f32>,
}

/// A ranked chunk returned by a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    #[serde(default)]
    pub document_title: Option<String>,
    pub chunk_index: usize,
    pub content: String,
    /// Cosine similarity between query and chunk
    pub similarity: f32,
    /// Normalised full-text score, hybrid mode only
    #[serde(default)]
    pub text_score: Option<f32>,
    /// Ranking score (similarity in vector mode, blended in hybrid mode)
    pub score: f32,
}

/// Storage backend for documents and embedded chunks
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn name(&self) -> &str;

    /// Insert or replace document metadata
    async fn upsert_document(&self, document: &DocumentRecord) -> Result<(), StoreError>;

    async fn insert_chunks(&self, chunks: &[StoredChunk]) -> Result<(), StoreError>;

    /// Remove every chunk of a document, keeping the document itself
    async fn delete_chunks(&self, document_id: &str) -> Result<(), StoreError>;

    /// Remove a document and its chunks
    async fn delete_document(&self, document_id: &str) -> Result<(), StoreError>;

    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentRecord>, StoreError>;

    async fn list_documents(&self) -> Result<Vec<DocumentRecord>, StoreError>;

    /// True when at least one document can be retrieved from
    async fn has_ready_documents(&self) -> Result<bool, StoreError> {
        Ok(self
            .list_documents()
            .await?
            .iter()
            .any(|document| document.status == DocumentStatus::Ready))
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>, StoreError>;

    async fn hybrid_search(
        &self,
        query: &str,
        embedding: &[f32],
        limit: usize,
        weights: HybridWeights,
    ) -> Result<Vec<SearchHit>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Default)]
struct MemoryState {
    documents: HashMap<String, DocumentRecord>,
    chunks: Vec<StoredChunk>,
}

/// Process-local store
pub struct InMemoryStore {
    dimensions: usize,
    state: RwLock<MemoryState>,
}

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

impl InMemoryStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            state: RwLock::new(MemoryState::default()),
        }
    }

    fn check_dimensions(&self, embedding: &[f32]) -> Result<(), StoreError> {
        if embedding.len() == self.dimensions {
            Ok(())
        } else {
            Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: embedding.len(),
            })
        }
    }

    fn to_hit(state: &MemoryState, chunk: &StoredChunk, similarity: f32) -> SearchHit {
        SearchHit {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            document_title: state
                .documents
                .get(&chunk.document_id)
                .map(|doc| doc.title.clone()),
            chunk_index: chunk.chunk_index,
            content: chunk.content.clone(),
            similarity,
            text_score: None,
            score: similarity,
        }
    }
}

/// BM25 scores of every chunk for the query terms
fn bm25_scores(chunks: &[StoredChunk], query: &str) -> Vec<f32> {
    let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
    if chunks.is_empty() || query_terms.is_empty() {
        return vec![0.0; chunks.len()];
    }

    let documents: Vec<Vec<String>> = chunks.iter().map(|chunk| tokenize(&chunk.content)).collect();
    let total = documents.len() as f32;
    let average_length =
        (documents.iter().map(Vec::len).sum::<usize>() as f32 / total).max(1.0);

    let document_frequency: HashMap<&str, usize> = query_terms
        .iter()
        .map(|term| {
            let count = documents
                .iter()
                .filter(|tokens| tokens.iter().any(|token| token == term))
                .count();
            (term.as_str(), count)
        })
        .collect();

    documents
        .iter()
        .map(|tokens| {
            let length = tokens.len() as f32;
            query_terms
                .iter()
                .map(|term| {
                    let frequency = tokens.iter().filter(|token| *token == term).count() as f32;
                    if frequency == 0.0 {
                        return 0.0;
                    }
                    let df = document_frequency[term.as_str()] as f32;
                    let idf = ((total - df + 0.5) / (df + 0.5) + 1.0).ln();
                    idf * frequency * (BM25_K1 + 1.0)
                        / (frequency + BM25_K1 * (1.0 - BM25_B + BM25_B * length / average_length))
                })
                .sum()
        })
        .collect()
}

fn rank(mut hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    });
    hits.truncate(limit);
    hits
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert_document(&self, document: &DocumentRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .documents
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn insert_chunks(&self, chunks: &[StoredChunk]) -> Result<(), StoreError> {
        for chunk in chunks {
            self.check_dimensions(&chunk.embedding)?;
        }
        let mut state = self.state.write().await;
        state.chunks.extend_from_slice(chunks);
        Ok(())
    }

    async fn delete_chunks(&self, document_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.chunks.retain(|chunk| chunk.document_id != document_id);
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.documents.remove(document_id).is_none() {
            return Err(StoreError::NotFound(document_id.to_string()));
        }
        state.chunks.retain(|chunk| chunk.document_id != document_id);
        Ok(())
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentRecord>, StoreError> {
        Ok(self.state.read().await.documents.get(document_id).cloned())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentRecord>, StoreError> {
        let state = self.state.read().await;
        let mut documents: Vec<DocumentRecord> = state.documents.values().cloned().collect();
        documents.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(documents)
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        self.check_dimensions(embedding)?;
        let state = self.state.read().await;

        let hits = state
            .chunks
            .iter()
            .map(|chunk| {
                let similarity = cosine_similarity(embedding, &chunk.embedding);
                Self::to_hit(&state, chunk, similarity)
            })
            .collect();

        Ok(rank(hits, limit))
    }

    async fn hybrid_search(
        &self,
        query: &str,
        embedding: &[f32],
        limit: usize,
        weights: HybridWeights,
    ) -> Result<Vec<SearchHit>, StoreError> {
        self.check_dimensions(embedding)?;
        let state = self.state.read().await;

        let text_scores = bm25_scores(&state.chunks, query);
        let max_text_score = text_scores.iter().copied().fold(0.0f32, f32::max);

        let hits = state
            .chunks
            .iter()
            .zip(text_scores)
            .map(|(chunk, text_score)| {
                let similarity = cosine_similarity(embedding, &chunk.embedding);
                let normalized_text = if max_text_score > 0.0 {
                    text_score / max_text_score
                } else {
                    0.0
                };
                let mut hit = Self::to_hit(&state, chunk, similarity);
                hit.text_score = Some(normalized_text);
                hit.score = weights.vector * similarity + weights.text * normalized_text;
                hit
            })
            .collect();

        Ok(rank(hits, limit))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
