//! Retrieval-augmented generation over organisational documents
//!
//! chunking → embedding → vector/hybrid storage → retrieval → citations

pub mod chunker;
pub mod citations;
pub mod embedding;
pub mod pipeline;
pub mod postgrest;
pub mod retriever;
pub mod store;

pub use chunker::{Chunk, Chunker, ChunkingStrategy};
pub use citations::{extract_citations, Citation, CitationReport, ContextBuilder, Source};
pub use embedding::{embedder_from_config, Embedder, EmbeddingError, HashingEmbedder, OpenAiEmbedder};
pub use pipeline::{DocumentInput, IngestReport, RagAnswerContext, RagPipeline};
pub use postgrest::{PostgrestConfig, PostgrestStore};
pub use retriever::{RetrievalOptions, Retriever};
pub use store::{
    DocumentRecord, DocumentStatus, HybridWeights, InMemoryStore, SearchHit, SearchMode,
    StoreError, StoredChunk, VectorStore,
};

use crate::config::{AssistantConfig, StoreBackend};
use std::sync::Arc;

/// Build the vector store selected by `[store]`
pub fn store_from_config(config: &AssistantConfig) -> Result<Arc<dyn VectorStore>, StoreError> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new(config.embedding.dimensions))),
        StoreBackend::Postgrest => {
            let postgrest = PostgrestConfig::from_section(&config.store, config.get_store_api_key())?;
            Ok(Arc::new(PostgrestStore::new(postgrest)?))
        }
    }
}
