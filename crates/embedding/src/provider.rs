use crate::error::Result;
use async_trait::async_trait;

/// Vectors for one batch plus the provider-reported token usage.
#[derive(Debug, Clone)]
pub struct BatchEmbeddings {
    pub vectors: Vec<Vec<f32>>,
    pub tokens_used: u64,
}

/// Capability set every embedding backend exposes. Implementations vary
/// (local stub, Ollama HTTP); callers only see this surface.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Largest batch the provider accepts in one call.
    fn max_batch_size(&self) -> usize {
        32
    }

    async fn health_check(&self) -> Result<()>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<BatchEmbeddings>;
}
