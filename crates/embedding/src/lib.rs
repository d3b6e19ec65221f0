mod error;
mod ollama;
mod pool;
mod provider;
mod stub;

pub use error::{EmbeddingError, Result};
pub use ollama::{OllamaConfig, OllamaProvider};
pub use pool::{BatchFailure, EmbedOutcome, EmbeddingWorkerPool, PoolConfig};
pub use provider::{BatchEmbeddings, EmbeddingProvider};
pub use stub::StubProvider;

use std::sync::Arc;

/// Build a provider from its configured name. Unknown names fail rather
/// than silently falling back.
pub fn provider_from_config(
    provider: &str,
    model: &str,
    dimension: usize,
    base_url: Option<&str>,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match provider {
        "stub" => Ok(Arc::new(StubProvider::new(model, dimension))),
        "ollama" => Ok(Arc::new(OllamaProvider::new(OllamaConfig {
            base_url: base_url.unwrap_or("http://localhost:11434").to_string(),
            model: model.to_string(),
            dimension,
        })?)),
        other => Err(EmbeddingError::Provider(format!(
            "unknown embedding provider '{other}'"
        ))),
    }
}
