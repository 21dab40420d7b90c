use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use scribe_core::config::EmbeddingConfig;
use scribe_core::error::{Result, ScribeError};

const OPENAI_BASE: &str = "https://api.openai.com/v1";
const OLLAMA_BASE: &str = "http://localhost:11434/v1";

/// Inputs sent per `/embeddings` request. Ingesting a long file produces
/// many chunks and providers cap the batch size.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Turns texts into vectors for the similarity store.
pub trait EmbeddingProvider: Send + Sync + 'static {
    /// One vector per input text, in input order.
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>>;
    /// Length of every vector this provider returns. 0 means unchecked.
    fn dimensions(&self) -> usize;
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dims: usize,
    batch_size: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(base_url: &str, api_key: Option<&str>, model: &str, dims: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            api_key: api_key.map(String::from),
            model: model.to_string(),
            dims,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Build from the `[retrieval.embedding]` section.
    ///
    /// `provider` picks the default endpoint: `openai` uses the hosted API
    /// and falls back to `fallback_key`, `ollama` runs locally without a key.
    /// Any other provider must set `base_url`.
    pub fn from_config(config: &EmbeddingConfig, fallback_key: Option<&str>) -> Result<Self> {
        let provider = config.provider.to_ascii_lowercase();
        let (default_base, key) = match provider.as_str() {
            "openai" => (Some(OPENAI_BASE), config.api_key.as_deref().or(fallback_key)),
            "ollama" => (Some(OLLAMA_BASE), config.api_key.as_deref()),
            _ => (None, config.api_key.as_deref().or(fallback_key)),
        };
        let base = config.base_url.as_deref().or(default_base).ok_or_else(|| {
            ScribeError::Embedding(format!(
                "embedding provider '{}' needs a base_url",
                config.provider
            ))
        })?;
        Ok(Self::new(base, key, &config.model, config.dimensions).with_batch_size(config.batch_size))
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut req = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: batch,
        });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ScribeError::Embedding(format!("request failed: {}", e)))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ScribeError::Embedding(format!("HTTP {}: {}", status, body)));
        }

        let body: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| ScribeError::Embedding(format!("invalid embeddings response: {}", e)))?;
        ordered_vectors(body.data, batch.len(), self.dims)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Put vectors back in input order and check count and width.
fn ordered_vectors(mut data: Vec<EmbeddingData>, expected: usize, dims: usize) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(ScribeError::Embedding(format!(
            "expected {} vectors, got {}",
            expected,
            data.len()
        )));
    }
    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
    }
    if let Some(bad) = data.iter().find(|d| dims > 0 && d.embedding.len() != dims) {
        return Err(ScribeError::Embedding(format!(
            "expected {}-dimensional vectors, got {}",
            dims,
            bad.embedding.len()
        )));
    }
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
        let texts = texts.to_vec();
        Box::pin(async move {
            let mut vectors = Vec::with_capacity(texts.len());
            for (i, batch) in texts.chunks(self.batch_size).enumerate() {
                debug!(batch = i, inputs = batch.len(), model = %self.model, "Embedding batch");
                vectors.extend(self.embed_batch(batch).await?);
            }
            Ok(vectors)
        })
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Cosine similarity; vectors of different length score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (dot, aa, bb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, aa, bb), (x, y)| {
            (dot + x * y, aa + x * x, bb + y * y)
        });
    let denom = aa.sqrt() * bb.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(index: usize, embedding: Vec<f32>) -> EmbeddingData {
        EmbeddingData {
            index: Some(index),
            embedding,
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_ordered_vectors_sorts_by_index() {
        let out = ordered_vectors(vec![data(1, vec![1.0, 1.0]), data(0, vec![0.0, 0.0])], 2, 2).unwrap();
        assert_eq!(out, vec![vec![0.0, 0.0], vec![1.0, 1.0]]);
    }

    #[test]
    fn test_ordered_vectors_rejects_wrong_count_and_width() {
        assert!(ordered_vectors(vec![data(0, vec![1.0])], 2, 0).is_err());
        let err = ordered_vectors(vec![data(0, vec![1.0, 2.0, 3.0])], 1, 2).unwrap_err();
        assert!(err.to_string().contains("expected 2-dimensional"));
        // 0 dims skips the width check
        assert!(ordered_vectors(vec![data(0, vec![1.0, 2.0, 3.0])], 1, 0).is_ok());
    }

    #[test]
    fn test_from_config_openai_uses_fallback_key() {
        let provider = HttpEmbeddingProvider::from_config(&EmbeddingConfig::default(), Some("sk-x")).unwrap();
        assert_eq!(provider.endpoint, "https://api.openai.com/v1/embeddings");
        assert_eq!(provider.api_key.as_deref(), Some("sk-x"));
        assert_eq!(provider.dimensions(), 1536);
        assert_eq!(provider.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_from_config_ollama_is_local_and_keyless() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            model: "nomic-embed-text".into(),
            dimensions: 768,
            batch_size: 16,
            ..EmbeddingConfig::default()
        };
        let provider = HttpEmbeddingProvider::from_config(&config, Some("sk-x")).unwrap();
        assert_eq!(provider.endpoint, "http://localhost:11434/v1/embeddings");
        assert!(provider.api_key.is_none());
        assert_eq!(provider.batch_size, 16);
    }

    #[test]
    fn test_from_config_other_provider_needs_base_url() {
        let mut config = EmbeddingConfig {
            provider: "together".into(),
            ..EmbeddingConfig::default()
        };
        assert!(HttpEmbeddingProvider::from_config(&config, None).is_err());
        config.base_url = Some("https://api.together.xyz/v1/".into());
        let provider = HttpEmbeddingProvider::from_config(&config, None).unwrap();
        assert_eq!(provider.endpoint, "https://api.together.xyz/v1/embeddings");
    }

    #[test]
    fn test_batch_size_is_at_least_one() {
        let provider = HttpEmbeddingProvider::new(OPENAI_BASE, None, "m", 0).with_batch_size(0);
        assert_eq!(provider.batch_size, 1);
    }
}
