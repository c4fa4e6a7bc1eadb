//! Embeddings
//!
//! The embedding capability behind an async trait, with two backends:
//! - `HashingEmbedder`: local feature hashing. Stable: the same text always
//!   produces the same vector regardless of what other documents exist.
//! - `OpenAiEmbedder`: any OpenAI-compatible `/embeddings` endpoint.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Default dimensionality of hashed embeddings
pub const DEFAULT_HASHING_DIM: usize = 384;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding provider misconfigured: {0}")]
    InvalidConfig(String),
    #[error("Embedding request failed: {0}")]
    Request(String),
    #[error("Embedding provider returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("Unexpected embedding response: {0}")]
    Parse(String),
}

impl Serialize for EmbeddingError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(e: reqwest::Error) -> Self {
        EmbeddingError::Request(e.to_string())
    }
}

/// Embedding vector
pub type Embedding = Vec<f32>;

/// Text -> vector. Deterministic for a fixed model and input.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;

    /// Embed several texts, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

// ============ FEATURE HASHING ============

/// FNV-1a (stable across Rust versions, unlike DefaultHasher).
fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in token.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Local embedder using the hashing trick: each lower-cased word is hashed to
/// a bucket (with a hash-derived sign), and the vector is L2-normalized.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIM)
    }
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Pure synchronous embedding.
    pub fn embed_text(&self, text: &str) -> Embedding {
        let mut tf = vec![0.0f32; self.dimensions];

        let tokens = text
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|t| !t.is_empty());

        for token in tokens {
            let hash = fnv1a(&token.to_lowercase());
            let idx = (hash % self.dimensions as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            tf[idx] += sign;
        }

        let norm: f32 = tf.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut tf {
                *x /= norm;
            }
        }
        tf
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        Ok(self.embed_text(text))
    }
}

// ============ OPENAI-COMPATIBLE ============

/// Embeddings client for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    max_retries: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        dimensions: Option<usize>,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self, EmbeddingError> {
        if api_key.trim().is_empty() {
            return Err(EmbeddingError::InvalidConfig("missing API key".to_string()));
        }
        if model.trim().is_empty() {
            return Err(EmbeddingError::InvalidConfig("missing model name".to_string()));
        }

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|_| EmbeddingError::InvalidConfig("invalid API key".to_string()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            dimensions,
            max_retries: max_retries.max(1),
        })
    }

    fn should_retry(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn retry_backoff(attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        Duration::from_millis(500 * (1 << capped))
    }

    async fn request(&self, inputs: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        let mut attempt = 0usize;
        loop {
            let body = EmbeddingRequest {
                model: &self.model,
                input: inputs,
                dimensions: self.dimensions,
            };

            let outcome = self.client.post(&self.endpoint).json(&body).send().await;
            let retryable = match outcome {
                Ok(resp) if resp.status().is_success() => {
                    let mut parsed: EmbeddingResponse = resp
                        .json()
                        .await
                        .map_err(|e| EmbeddingError::Parse(e.to_string()))?;
                    parsed.data.sort_by_key(|entry| entry.index);
                    if parsed.data.len() != inputs.len() {
                        return Err(EmbeddingError::Parse(format!(
                            "{} embeddings for {} inputs",
                            parsed.data.len(),
                            inputs.len()
                        )));
                    }
                    debug!(model = %self.model, count = inputs.len(), "Embedded batch");
                    return Ok(parsed.data.into_iter().map(|d| d.embedding).collect());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    if !Self::should_retry(status) || attempt + 1 >= self.max_retries {
                        return Err(EmbeddingError::Server {
                            status: status.as_u16(),
                            body,
                        });
                    }
                    status.to_string()
                }
                Err(e) => {
                    let transient = e.is_timeout() || e.is_connect() || e.is_request();
                    if !transient || attempt + 1 >= self.max_retries {
                        return Err(e.into());
                    }
                    e.to_string()
                }
            };

            attempt += 1;
            warn!(attempt = attempt, reason = %retryable, "Retrying embedding request");
            tokio::time::sleep(Self::retry_backoff(attempt)).await;
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Parse("empty response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}

// ============ DISTANCES ============

/// Calculate cosine similarity between two embeddings
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Squared Euclidean distance (Chroma's default `l2` space).
/// Mismatched lengths are infinitely far apart.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_embedding() {
        let embedder = HashingEmbedder::default();
        let embedding = embedder.embed_text("Hello world this is a test");
        assert_eq!(embedding.len(), DEFAULT_HASHING_DIM);
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_embedding_stability() {
        let embedder = HashingEmbedder::default();
        let emb1 = embedder.embed_text("The quick brown fox");
        let _ = embedder.embed_text("completely different words zebra giraffe quantum");
        let emb2 = embedder.embed_text("The quick brown fox");
        assert_eq!(emb1, emb2);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(8);
        assert_eq!(embedder.embed_text("  ... "), vec![0.0; 8]);
    }

    #[test]
    fn test_similar_text_is_closer() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed_text("annual leave policy");
        let near = embedder.embed_text("The annual leave policy grants 20 days");
        let far = embedder.embed_text("Quarterly revenue grew on marketing spend");
        assert!(squared_l2(&query, &near) < squared_l2(&query, &far));
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 0.001);
    }

    #[test]
    fn test_squared_l2() {
        assert_eq!(squared_l2(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
        assert!(squared_l2(&[0.0], &[1.0, 2.0]).is_infinite());
    }

    #[tokio::test]
    async fn test_embed_batch_preserves_order() {
        let embedder = HashingEmbedder::default();
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch[0], embedder.embed_text("alpha"));
        assert_eq!(batch[1], embedder.embed_text("beta"));
    }

    #[test]
    fn test_openai_requires_key() {
        let result = OpenAiEmbedder::new(
            " ",
            "https://api.openai.com/v1",
            "text-embedding-3-small",
            None,
            Duration::from_secs(5),
            3,
        );
        assert!(matches!(result, Err(EmbeddingError::InvalidConfig(_))));
    }
}
