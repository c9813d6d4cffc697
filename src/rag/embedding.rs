//! Text embedding backends
//!
//! `OpenAiEmbedder` calls the `/embeddings` endpoint in batches.
//! `HashingEmbedder` is a deterministic offline embedder based on feature
//! hashing of accent-folded unigrams and bigrams, used by the in-memory
//! backend and in tests.

use crate::config::{AssistantConfig, ConfigError};
use crate::text::tokenize;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Embedding errors
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    #[error("Embedder not configured: {0}")]
    NotConfigured(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Turns text into fixed-size vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Embed every text, preserving input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding returned".to_string()))
    }
}

/// Build the embedder selected by `[embedding]`
pub fn embedder_from_config(config: &AssistantConfig) -> Result<Arc<dyn Embedder>, ConfigError> {
    match config.embedding.provider.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.embedding.dimensions))),
        "openai" => {
            let api_key = config.get_embedding_api_key()?;
            let mut embedder_config = OpenAiEmbedderConfig {
                api_key,
                model: config.embedding.model.clone(),
                dimensions: config.embedding.dimensions,
                batch_size: config.embedding.batch_size,
                ..Default::default()
            };
            if let Some(base_url) = &config.embedding.base_url {
                embedder_config.base_url = base_url.clone();
            }
            OpenAiEmbedder::new(embedder_config)
                .map(|embedder| Arc::new(embedder) as Arc<dyn Embedder>)
                .map_err(|e| ConfigError::InvalidConfig(e.to_string()))
        }
        other => Err(ConfigError::InvalidConfig(format!(
            "unknown embedding provider '{other}' (expected 'openai' or 'hashing')"
        ))),
    }
}

/// OpenAI embedder configuration
#[derive(Debug, Clone)]
pub struct OpenAiEmbedderConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub timeout: Duration,
}

impl Default for OpenAiEmbedderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            batch_size: 100,
            timeout: Duration::from_secs(30),
        }
    }
}

/// OpenAI `/embeddings` client
pub struct OpenAiEmbedder {
    config: OpenAiEmbedderConfig,
    client: Client,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiEmbedderConfig) -> Result<Self, EmbeddingError> {
        if config.api_key.is_empty() {
            return Err(EmbeddingError::NotConfigured(
                "OpenAI API key is required for embeddings".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EmbeddingError::NetworkError(e.to_string()))?;

        Ok(Self {
            config: OpenAiEmbedderConfig {
                batch_size: config.batch_size.max(1),
                ..config
            },
            client,
        })
    }

    /// Only the text-embedding-3 family accepts a `dimensions` parameter
    fn requested_dimensions(&self) -> Option<usize> {
        self.config
            .model
            .starts_with("text-embedding-3")
            .then_some(self.config.dimensions)
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: batch,
            dimensions: self.requested_dimensions(),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbeddingError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("OpenAI embeddings error: {status} - {body}");
            return Err(match status.as_u16() {
                401 | 403 => EmbeddingError::AuthenticationFailed(message),
                429 => EmbeddingError::RateLimitExceeded(message),
                _ => EmbeddingError::ApiError(message),
            });
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        if parsed.data.len() != batch.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|item| item.index);
        parsed
            .data
            .into_iter()
            .map(|item| {
                if item.embedding.len() == self.config.dimensions {
                    Ok(item.embedding)
                } else {
                    Err(EmbeddingError::DimensionMismatch {
                        expected: self.config.dimensions,
                        actual: item.embedding.len(),
                    })
                }
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn name(&self) -> &str {
        "openai"
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size) {
            debug!(
                "Embedding batch of {} texts with {}",
                batch.len(),
                self.config.model
            );
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// Deterministic feature-hashing embedder
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

const BIGRAM_WEIGHT: f32 = 0.5;

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Embed a single text synchronously
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let tokens = tokenize(text);

        for token in &tokens {
            self.add_feature(&mut vector, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.add_feature(&mut vector, bigram.as_bytes(), BIGRAM_WEIGHT);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }

    fn add_feature(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = fnv1a(feature);
        let bucket = (hash % self.dimensions as u64) as usize;
        // The top bit picks the sign so colliding features tend to cancel
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

/// Cosine similarity; zero when either vector has no magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashing_embedder_is_deterministic_and_normalised() {
        let embedder = HashingEmbedder::new(128);
        let first = embedder.embed_text("Conditions générales de paiement");
        let second = embedder.embed_text("Conditions générales de paiement");

        assert_eq!(first, second);
        assert_eq!(first.len(), 128);
        let norm: f32 = first.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hashing_embedder_similarity_ordering() {
        let embedder = HashingEmbedder::new(512);
        let query = embedder.embed_text("délai de paiement fournisseur");
        let related = embedder.embed_text("Le délai de paiement fournisseur est de 30 jours");
        let unrelated = embedder.embed_text("Procédure de sauvegarde informatique hebdomadaire");

        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_accents_do_not_change_embedding() {
        let embedder = HashingEmbedder::new(64);
        assert_eq!(
            embedder.embed_text("trésorerie prévisionnelle"),
            embedder.embed_text("TRESORERIE previsionnelle")
        );
    }

    #[test]
    fn test_empty_text_embeds_to_zero_vector() {
        let embedder = HashingEmbedder::new(16);
        assert!(embedder.embed_text("  ").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_cosine_similarity_edge_cases() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_openai_embedder_requires_key() {
        let result = OpenAiEmbedder::new(OpenAiEmbedderConfig::default());
        assert!(matches!(result, Err(EmbeddingError::NotConfigured(_))));
    }

    #[test]
    fn test_requested_dimensions_only_for_v3_models() {
        let embedder = OpenAiEmbedder::new(OpenAiEmbedderConfig {
            api_key: "key".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(embedder.requested_dimensions(), Some(1536));

        let legacy = OpenAiEmbedder::new(OpenAiEmbedderConfig {
            api_key: "key".to_string(),
            model: "text-embedding-ada-002".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(legacy.requested_dimensions(), None);
    }

    #[tokio::test]
    async fn test_embed_one_uses_embed() {
        let embedder = HashingEmbedder::new(32);
        let vector = embedder.embed_one("facture").await.unwrap();
        assert_eq!(vector, embedder.embed_text("facture"));
    }
}
