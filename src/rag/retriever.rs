//! Query-time retrieval: embed, search, filter, diversify

use crate::config::RagSection;
use crate::error::{AssistantError, AssistantResult};
use crate::rag::embedding::Embedder;
use crate::rag::store::{HybridWeights, SearchHit, SearchMode, VectorStore};
use crate::retrieval_span;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, Instrument};

/// Per-query retrieval parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub max_chunks_per_document: usize,
    pub search_mode: SearchMode,
    pub weights: HybridWeights,
    /// Restrict results to these documents when set
    #[serde(default)]
    pub document_ids: Option<Vec<String>>,
}

impl RetrievalOptions {
    pub fn from_config(config: &RagSection) -> Self {
        Self {
            top_k: config.top_k,
            similarity_threshold: config.similarity_threshold,
            max_chunks_per_document: config.max_chunks_per_document,
            search_mode: config.search_mode,
            weights: HybridWeights {
                vector: config.vector_weight,
                text: config.text_weight,
            },
            document_ids: None,
        }
    }
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self::from_config(&RagSection::default())
    }
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Retrieve the best chunks for `query`.
    ///
    /// Fetches `top_k * 2` candidates, drops those whose cosine similarity is
    /// under the threshold, keeps at most `max_chunks_per_document` per
    /// document and returns the `top_k` best by score.
    pub async fn retrieve(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> AssistantResult<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AssistantError::invalid_input("Search query is empty"));
        }

        let span = retrieval_span!(
            query_chars = query.chars().count(),
            top_k = options.top_k,
            mode = ?options.search_mode
        );
        async {
            let embedding = self.embedder.embed_one(query).await?;
            let candidates = options.top_k.max(1) * 2;

            let hits = match options.search_mode {
                SearchMode::Vector => self.store.vector_search(&embedding, candidates).await?,
                SearchMode::Hybrid => {
                    self.store
                        .hybrid_search(query, &embedding, candidates, options.weights)
                        .await?
                }
            };
            let candidate_count = hits.len();

            let selected = select_hits(hits, options);
            debug!(
                "Retrieved {} of {} candidates ({:?} search)",
                selected.len(),
                candidate_count,
                options.search_mode
            );
            crate::observability::metrics::metrics().record_retrieval(selected.len());
            Ok(selected)
        }
        .instrument(span)
        .await
    }
}

/// Threshold, document filter, per-document cap and final top-k
pub fn select_hits(mut hits: Vec<SearchHit>, options: &RetrievalOptions) -> Vec<SearchHit> {
    hits.retain(|hit| hit.similarity >= options.similarity_threshold);
    if let Some(allowed) = &options.document_ids {
        hits.retain(|hit| allowed.contains(&hit.document_id));
    }

    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    });

    let mut per_document: HashMap<String, usize> = HashMap::new();
    hits.into_iter()
        .filter(|hit| {
            let count = per_document.entry(hit.document_id.clone()).or_insert(0);
            *count += 1;
            *count <= options.max_chunks_per_document.max(1)
        })
        .take(options.top_k)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(document_id: &str, chunk_index: usize, similarity: f32) -> SearchHit {
        SearchHit {
            chunk_id: format!("{document_id}-{chunk_index}"),
            document_id: document_id.to_string(),
            document_title: None,
            chunk_index,
            content: String::new(),
            similarity,
            text_score: None,
            score: similarity,
        }
    }

    fn options(top_k: usize, threshold: f32, per_document: usize) -> RetrievalOptions {
        RetrievalOptions {
            top_k,
            similarity_threshold: threshold,
            max_chunks_per_document: per_document,
            search_mode: SearchMode::Vector,
            weights: HybridWeights::default(),
            document_ids: None,
        }
    }

    #[test]
    fn test_threshold_filters_low_similarity() {
        let hits = vec![hit("a", 0, 0.9), hit("b", 0, 0.5)];
        let selected = select_hits(hits, &options(5, 0.7, 3));
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].document_id, "a");
    }

    #[test]
    fn test_per_document_cap() {
        let hits = vec![
            hit("a", 0, 0.95),
            hit("a", 1, 0.94),
            hit("a", 2, 0.93),
            hit("b", 0, 0.80),
        ];
        let selected = select_hits(hits, &options(5, 0.0, 2));
        let ids: Vec<(&str, usize)> = selected
            .iter()
            .map(|h| (h.document_id.as_str(), h.chunk_index))
            .collect();
        assert_eq!(ids, vec![("a", 0), ("a", 1), ("b", 0)]);
    }

    #[test]
    fn test_top_k_and_tie_breaking() {
        let hits = vec![hit("c", 0, 0.8), hit("b", 1, 0.8), hit("b", 0, 0.8)];
        let selected = select_hits(hits, &options(2, 0.0, 3));
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].document_id, "b");
        assert_eq!(selected[0].chunk_index, 0);
        assert_eq!(selected[1].chunk_index, 1);
    }

    #[test]
    fn test_document_filter() {
        let mut opts = options(5, 0.0, 3);
        opts.document_ids = Some(vec!["b".to_string()]);
        let selected = select_hits(vec![hit("a", 0, 0.9), hit("b", 0, 0.5)], &opts);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].document_id, "b");
    }
}
