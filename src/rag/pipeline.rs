//! End-to-end document pipeline: ingest, query, delete

use crate::config::AssistantConfig;
use crate::error::{AssistantError, AssistantResult};
use crate::ingest_span;
use crate::observability::metrics::metrics;
use crate::rag::chunker::Chunker;
use crate::rag::citations::{BuiltContext, ContextBuilder, Source};
use crate::rag::embedding::Embedder;
use crate::rag::retriever::{RetrievalOptions, Retriever};
use crate::rag::store::{DocumentRecord, DocumentStatus, SearchHit, StoredChunk, VectorStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

/// A document submitted for ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInput {
    /// Reusing an existing id replaces that document
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Outcome of a successful ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub document_id: String,
    pub chunk_count: usize,
    pub token_count: usize,
    pub status: DocumentStatus,
}

/// Retrieved context for a question
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RagAnswerContext {
    pub context: String,
    pub sources: Vec<Source>,
    pub token_count: usize,
}

impl RagAnswerContext {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl From<BuiltContext> for RagAnswerContext {
    fn from(built: BuiltContext) -> Self {
        Self {
            context: built.text,
            sources: built.sources,
            token_count: built.token_count,
        }
    }
}

pub struct RagPipeline {
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    retriever: Retriever,
    context_builder: ContextBuilder,
    default_options: RetrievalOptions,
    batch_size: usize,
}

impl RagPipeline {
    pub fn new(
        config: &AssistantConfig,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            chunker: Chunker::from_config(&config.rag),
            retriever: Retriever::new(Arc::clone(&embedder), Arc::clone(&store)),
            context_builder: ContextBuilder::new(config.rag.context_token_budget),
            default_options: RetrievalOptions::from_config(&config.rag),
            batch_size: config.embedding.batch_size.max(1),
            embedder,
            store,
        }
    }

    pub fn default_options(&self) -> &RetrievalOptions {
        &self.default_options
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Chunk, embed and store a document.
    ///
    /// The document is recorded as `processing` first, then `ready` once its
    /// chunks are stored, or `failed` with the error message.
    pub async fn ingest(&self, input: DocumentInput) -> AssistantResult<IngestReport> {
        if input.content.trim().is_empty() {
            return Err(AssistantError::invalid_input("Document content is empty"));
        }
        if input.title.trim().is_empty() {
            return Err(AssistantError::invalid_input("Document title is empty"));
        }

        let document_id = input
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let span = ingest_span!(document_id = %document_id, title = %input.title);
        async {
            let now = Utc::now();
            let created_at = self
                .store
                .get_document(&document_id)
                .await?
                .map(|existing| existing.created_at)
                .unwrap_or(now);

            let mut record = DocumentRecord {
                id: document_id.clone(),
                title: input.title.clone(),
                source: input.source.clone(),
                status: DocumentStatus::Processing,
                error: None,
                chunk_count: 0,
                metadata: input.metadata.clone(),
                created_at,
                updated_at: now,
            };
            self.store.upsert_document(&record).await?;

            match self.store_chunks(&document_id, &input.content).await {
                Ok((chunk_count, token_count)) => {
                    record.status = DocumentStatus::Ready;
                    record.chunk_count = chunk_count;
                    record.updated_at = Utc::now();
                    self.store.upsert_document(&record).await?;

                    metrics().document_ingested(chunk_count);
                    info!("Ingested document into {} chunks", chunk_count);
                    Ok(IngestReport {
                        document_id: document_id.clone(),
                        chunk_count,
                        token_count,
                        status: DocumentStatus::Ready,
                    })
                }
                Err(e) => {
                    warn!("Document ingestion failed: {}", e);
                    metrics().ingest_failed();
                    // Chunks of an earlier version must not outlive a failed re-ingest
                    if let Err(store_error) = self.store.delete_chunks(&document_id).await {
                        warn!("Could not remove chunks of failed document: {}", store_error);
                    }
                    record.status = DocumentStatus::Failed;
                    record.error = Some(e.to_error_body().message);
                    record.updated_at = Utc::now();
                    if let Err(store_error) = self.store.upsert_document(&record).await {
                        warn!("Could not record failed status: {}", store_error);
                    }
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Replace the chunks of `document_id`, returning chunk and token counts
    async fn store_chunks(&self, document_id: &str, content: &str) -> AssistantResult<(usize, usize)> {
        let chunks = self.chunker.chunk(content);
        if chunks.is_empty() {
            return Err(AssistantError::invalid_input("Document content is empty"));
        }

        let mut stored = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.content.clone()).collect();
            let embeddings = self.embedder.embed(&texts).await?;
            if embeddings.len() != batch.len() {
                return Err(AssistantError::retrieval_error(format!(
                    "embedder returned {} vectors for {} chunks",
                    embeddings.len(),
                    batch.len()
                )));
            }

            stored.extend(batch.iter().zip(embeddings).map(|(chunk, embedding)| StoredChunk {
                id: format!("{document_id}:{}", chunk.index),
                document_id: document_id.to_string(),
                chunk_index: chunk.index,
                content: chunk.content.clone(),
                token_count: chunk.token_count,
                embedding,
            }));
        }

        self.store.delete_chunks(document_id).await?;
        self.store.insert_chunks(&stored).await?;

        let token_count = stored.iter().map(|chunk| chunk.token_count).sum();
        Ok((stored.len(), token_count))
    }

    /// Retrieve hits and fill missing document titles from the store
    pub async fn search(
        &self,
        question: &str,
        options: &RetrievalOptions,
    ) -> AssistantResult<Vec<SearchHit>> {
        let mut hits = self.retriever.retrieve(question, options).await?;

        let mut titles: HashMap<String, Option<String>> = HashMap::new();
        for hit in hits.iter_mut().filter(|hit| hit.document_title.is_none()) {
            if !titles.contains_key(&hit.document_id) {
                let title = self
                    .store
                    .get_document(&hit.document_id)
                    .await?
                    .map(|document| document.title);
                titles.insert(hit.document_id.clone(), title);
            }
            hit.document_title = titles.get(&hit.document_id).cloned().flatten();
        }

        Ok(hits)
    }

    /// Retrieve and render the context for `question`
    pub async fn query(
        &self,
        question: &str,
        options: &RetrievalOptions,
    ) -> AssistantResult<RagAnswerContext> {
        let hits = self.search(question, options).await?;
        Ok(self.context_builder.build(&hits).into())
    }

    pub async fn delete(&self, document_id: &str) -> AssistantResult<()> {
        self.store.delete_document(document_id).await?;
        info!(document_id = %document_id, "Deleted document");
        Ok(())
    }

    pub async fn list_documents(&self) -> AssistantResult<Vec<DocumentRecord>> {
        Ok(self.store.list_documents().await?)
    }

    /// True when at least one document is ready for retrieval
    pub async fn has_documents(&self) -> AssistantResult<bool> {
        Ok(self.store.has_ready_documents().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::embedding::HashingEmbedder;
    use crate::rag::store::InMemoryStore;
    use crate::testing::mocks::MockEmbedder;

    fn pipeline() -> RagPipeline {
        let config = crate::testing::test_config();
        let embedder: Arc<dyn Embedder> =
            Arc::new(HashingEmbedder::new(config.embedding.dimensions));
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::new(config.embedding.dimensions));
        RagPipeline::new(&config, embedder, store)
    }

    fn input(id: &str, content: &str) -> DocumentInput {
        DocumentInput {
            id: Some(id.to_string()),
            title: "Politique achats".to_string(),
            content: content.to_string(),
            source: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_ingest_rejects_empty_content() {
        let result = pipeline().ingest(input("d1", "   \n ")).await;
        assert!(matches!(result, Err(AssistantError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_ingest_marks_document_ready() {
        let pipeline = pipeline();
        let report = pipeline
            .ingest(input("d1", "Les fournisseurs sont payés à 45 jours fin de mois."))
            .await
            .unwrap();

        assert_eq!(report.document_id, "d1");
        assert_eq!(report.status, DocumentStatus::Ready);
        assert_eq!(report.chunk_count, 1);

        let stored = pipeline.store().get_document("d1").await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Ready);
        assert_eq!(stored.chunk_count, 1);
        assert!(pipeline.has_documents().await.unwrap());
    }

    #[tokio::test]
    async fn test_reingest_replaces_chunks() {
        let pipeline = pipeline();
        let long = "Première règle de validation des factures. ".repeat(20);
        let first = pipeline.ingest(input("d1", &long)).await.unwrap();
        assert!(first.chunk_count > 1);

        pipeline
            .ingest(input("d1", "Règle unique de validation des factures."))
            .await
            .unwrap();

        let hits = pipeline
            .search("validation des factures", &RetrievalOptions {
                similarity_threshold: 0.0,
                top_k: 10,
                max_chunks_per_document: 10,
                ..pipeline.default_options().clone()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "Règle unique de validation des factures.");
    }

    #[tokio::test]
    async fn test_failed_reingest_drops_previous_chunks() {
        let config = crate::testing::test_config();
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::new(config.embedding.dimensions));
        let healthy = RagPipeline::new(
            &config,
            Arc::new(HashingEmbedder::new(config.embedding.dimensions)),
            Arc::clone(&store),
        );
        let failing = RagPipeline::new(
            &config,
            Arc::new(MockEmbedder::with_failure(config.embedding.dimensions)),
            Arc::clone(&store),
        );

        healthy
            .ingest(input("d1", "Ancienne politique de paiement à 60 jours."))
            .await
            .unwrap();
        assert!(healthy.has_documents().await.unwrap());

        let result = failing
            .ingest(input("d1", "Nouvelle politique de paiement à 30 jours."))
            .await;
        assert!(result.is_err());

        let document = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(document.status, DocumentStatus::Failed);
        assert_eq!(document.chunk_count, 0);
        assert!(!healthy.has_documents().await.unwrap());

        let hits = healthy
            .search("politique de paiement", &RetrievalOptions {
                similarity_threshold: 0.0,
                ..healthy.default_options().clone()
            })
            .await
            .unwrap();
        assert!(hits.is_empty(), "{hits:?}");
    }

    #[tokio::test]
    async fn test_query_builds_numbered_context() {
        let pipeline = pipeline();
        pipeline
            .ingest(input("d1", "Le délai de paiement fournisseur est de 45 jours fin de mois."))
            .await
            .unwrap();

        let context = pipeline
            .query("délai de paiement fournisseur", pipeline.default_options())
            .await
            .unwrap();

        assert_eq!(context.sources.len(), 1);
        assert_eq!(context.sources[0].document_title, "Politique achats");
        assert!(context.context.starts_with("[1] Politique achats (chunk 0)"));
    }

    #[tokio::test]
    async fn test_delete_unknown_document() {
        let result = pipeline().delete("missing").await;
        assert!(matches!(result, Err(AssistantError::StoreError(_))));
    }
}
