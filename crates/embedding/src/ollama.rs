use crate::error::{EmbeddingError, Result};
use crate::provider::{BatchEmbeddings, EmbeddingProvider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
}

/// Ollama `/api/embed` client, the reference HTTP implementation of the
/// embedding capability.
pub struct OllamaProvider {
    config: OllamaConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
}

impl OllamaProvider {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| EmbeddingError::Provider(format!("http client init: {err}")))?;
        Ok(Self { config, client })
    }

    async fn request_embeddings(&self, texts: &[String]) -> Result<BatchEmbeddings> {
        let url = format!("{}/api/embed", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                model: &self.config.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|err| EmbeddingError::Transient(format!("ollama request failed: {err}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(EmbeddingError::Transient(format!(
                "ollama returned {status}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Provider(format!(
                "ollama returned {status}: {body}"
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|err| EmbeddingError::InvalidResponse(err.to_string()))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "requested {} embeddings, received {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }
        for vector in &parsed.embeddings {
            if vector.len() != self.config.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.config.dimension,
                    actual: vector.len(),
                });
            }
        }

        Ok(BatchEmbeddings {
            vectors: parsed.embeddings,
            tokens_used: parsed.prompt_eval_count.unwrap_or(0),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn max_batch_size(&self) -> usize {
        16
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| EmbeddingError::Transient(format!("ollama unreachable: {err}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(EmbeddingError::Provider(format!(
                "ollama health check returned {}",
                response.status()
            )))
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut batch = self.request_embeddings(&[text.to_string()]).await?;
        batch
            .vectors
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding batch".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<BatchEmbeddings> {
        if texts.is_empty() {
            return Ok(BatchEmbeddings {
                vectors: Vec::new(),
                tokens_used: 0,
            });
        }
        self.request_embeddings(texts).await
    }
}
