//! Embedding provider
//!
//! TigerStyle: trait-based embedder with explicit dimension constraints.

use async_trait::async_trait;
use naiad_core::http::{HttpClient, HttpError, ReqwestHttpClient};
use naiad_dst::{FaultInjector, FaultType};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// all-MiniLM-L6-v2 and friends.
pub const EMBEDDING_DIM_384: usize = 384;
/// OpenAI text-embedding-3-small / ada-002.
pub const EMBEDDING_DIM_1536: usize = 1536;

/// Errors from embedding calls.
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("embedding response malformed: {reason}")]
    MalformedResponse { reason: String },

    #[error("fault injected: {operation}")]
    FaultInjected { operation: String },
}

impl EmbeddingError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            EmbeddingError::RequestFailed { .. } | EmbeddingError::FaultInjected { .. }
        )
    }
}

pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Trait for generating text embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Dimension of vectors produced by this embedder.
    fn dimension(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    /// Embed multiple texts. Default: one at a time.
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }
}

// =============================================================================
// Simulation provider
// =============================================================================

/// Deterministic embedder for testing.
///
/// Default behavior maps text to a normalized pseudo-random unit vector via
/// a content hash, so identical texts always land on the identical vector.
/// Tests that need controlled geometry (e.g. near-duplicate entities) pin
/// exact vectors per text with [`SimEmbeddingProvider::set_embedding`].
pub struct SimEmbeddingProvider {
    dimension: usize,
    overrides: Mutex<HashMap<String, Vec<f32>>>,
    faults: Option<Arc<FaultInjector>>,
}

impl SimEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        assert!(dimension > 0, "embedding dimension must be positive");
        Self {
            dimension,
            overrides: Mutex::new(HashMap::new()),
            faults: None,
        }
    }

    /// 384 dimensions, the typical small-model size.
    pub fn default_384() -> Self {
        Self::new(EMBEDDING_DIM_384)
    }

    /// Attach a fault injector (operation name: `embed`).
    pub fn with_faults(mut self, faults: Arc<FaultInjector>) -> Self {
        self.faults = Some(faults);
        self
    }

    /// Pin the vector returned for an exact text.
    pub fn set_embedding(&self, text: impl Into<String>, embedding: Vec<f32>) {
        assert_eq!(
            embedding.len(),
            self.dimension,
            "override dimension mismatch"
        );
        self.overrides.lock().unwrap().insert(text.into(), embedding);
    }

    fn hash_embedding(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];

        let mut seed: u64 = 0;
        for (i, &byte) in text.as_bytes().iter().enumerate() {
            seed = seed.wrapping_add(u64::from(byte) * (i as u64 + 1));
            seed = seed.wrapping_mul(31);
        }

        for (i, value) in embedding.iter_mut().enumerate() {
            let hash = seed.wrapping_add(i as u64).wrapping_mul(0x517cc1b727220a95);
            *value = ((hash as i64) as f32) / (i64::MAX as f32);
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

impl Default for SimEmbeddingProvider {
    fn default() -> Self {
        Self::default_384()
    }
}

#[async_trait]
impl EmbeddingProvider for SimEmbeddingProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        if let Some(faults) = &self.faults {
            if let Some(FaultType::EmbeddingFailure) = faults.should_inject("embed") {
                return Err(EmbeddingError::FaultInjected {
                    operation: "embed".to_string(),
                });
            }
        }

        if let Some(pinned) = self.overrides.lock().unwrap().get(text) {
            return Ok(pinned.clone());
        }

        Ok(self.hash_embedding(text))
    }
}

// =============================================================================
// HTTP provider (OpenAI-compatible)
// =============================================================================

/// OpenAI-compatible `/embeddings` provider.
pub struct HttpEmbeddingProvider {
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
    http: Arc<dyn HttpClient>,
}

impl HttpEmbeddingProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Self {
        assert!(dimension > 0, "embedding dimension must be positive");
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            dimension,
            http: Arc::new(ReqwestHttpClient::new()),
        }
    }

    /// Swap the HTTP client (testing, fault injection).
    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = http;
        self
    }

    async fn request(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({"model": self.model, "input": texts});

        let request = naiad_core::http::HttpRequest::post(url)
            .with_header("Authorization", format!("Bearer {}", self.api_key))
            .with_json_body(&body);

        let response = self.http.execute(request).await.map_err(|e| match e {
            HttpError::Timeout { timeout_ms } => EmbeddingError::RequestFailed {
                reason: format!("timed out after {timeout_ms}ms"),
            },
            other => EmbeddingError::RequestFailed {
                reason: other.to_string(),
            },
        })?;

        if !response.is_success() {
            return Err(EmbeddingError::RequestFailed {
                reason: format!("status {}: {}", response.status, response.body),
            });
        }

        let payload = response
            .json()
            .map_err(|e| EmbeddingError::MalformedResponse {
                reason: e.to_string(),
            })?;

        let data = payload["data"]
            .as_array()
            .ok_or_else(|| EmbeddingError::MalformedResponse {
                reason: "response missing data array".to_string(),
            })?;

        let mut vectors = Vec::with_capacity(data.len());
        for item in data {
            let raw = item["embedding"].as_array().ok_or_else(|| {
                EmbeddingError::MalformedResponse {
                    reason: "item missing embedding".to_string(),
                }
            })?;
            let vector: Vec<f32> = raw
                .iter()
                .filter_map(Value::as_f64)
                .map(|x| x as f32)
                .collect();
            if vector.len() != self.dimension {
                return Err(EmbeddingError::MalformedResponse {
                    reason: format!(
                        "expected dimension {}, got {}",
                        self.dimension,
                        vector.len()
                    ),
                });
            }
            vectors.push(vector);
        }

        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        let mut vectors = self.request(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::MalformedResponse {
                reason: "no embedding returned".to_string(),
            })
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use naiad_dst::{DeterministicRng, FaultConfig, FaultInjectorBuilder};

    #[tokio::test]
    async fn test_sim_embedder_deterministic() {
        let embedder = SimEmbeddingProvider::default_384();

        let a = embedder.embed("hello world").await.unwrap();
        let b = embedder.embed("hello world").await.unwrap();

        assert_eq!(a.len(), 384);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_sim_embedder_distinct_texts() {
        let embedder = SimEmbeddingProvider::default_384();

        let a = embedder.embed("hello").await.unwrap();
        let b = embedder.embed("world").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_sim_embedder_normalized() {
        let embedder = SimEmbeddingProvider::default_384();
        let v = embedder.embed("some text").await.unwrap();

        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm = {norm}");
    }

    #[tokio::test]
    async fn test_sim_embedder_override() {
        let embedder = SimEmbeddingProvider::new(2);
        embedder.set_embedding("pinned", vec![1.0, 0.0]);

        assert_eq!(embedder.embed("pinned").await.unwrap(), vec![1.0, 0.0]);
        assert_ne!(embedder.embed("other").await.unwrap(), vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_sim_embedder_batch_matches_single() {
        let embedder = SimEmbeddingProvider::default_384();
        let texts = ["one", "two", "three"];

        let batch = embedder.embed_batch(&texts).await.unwrap();
        for (i, text) in texts.iter().enumerate() {
            assert_eq!(batch[i], embedder.embed(text).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_sim_embedder_fault() {
        let faults = Arc::new(
            FaultInjectorBuilder::new(DeterministicRng::new(42))
                .with_fault(FaultConfig::new(FaultType::EmbeddingFailure, 1.0))
                .build(),
        );
        let embedder = SimEmbeddingProvider::default_384().with_faults(faults);

        let err = embedder.embed("text").await.unwrap_err();
        assert!(err.is_retriable());
    }

    #[test]
    #[should_panic(expected = "override dimension mismatch")]
    fn test_sim_embedder_override_dimension_checked() {
        let embedder = SimEmbeddingProvider::new(4);
        embedder.set_embedding("bad", vec![1.0]);
    }
}
