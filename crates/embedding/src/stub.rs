use crate::error::Result;
use crate::provider::{BatchEmbeddings, EmbeddingProvider};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

/// Deterministic offline provider for tests and dry runs.
///
/// Texts embed as normalized bag-of-words vectors: each whitespace token
/// hashes to a dimension bucket, so texts sharing tokens score high cosine
/// similarity without any model.
pub struct StubProvider {
    model: String,
    dimension: usize,
    batch_calls: AtomicU64,
}

impl StubProvider {
    #[must_use]
    pub fn new(model: &str, dimension: usize) -> Self {
        Self {
            model: model.to_string(),
            dimension: dimension.max(1),
            batch_calls: AtomicU64::new(0),
        }
    }

    /// Number of `embed_batch` calls served; used by cache tests.
    #[must_use]
    pub fn batch_calls(&self) -> u64 {
        self.batch_calls.load(Ordering::Relaxed)
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.split_whitespace() {
            let token = token.trim_matches(|c: char| !c.is_alphanumeric());
            if token.is_empty() {
                continue;
            }
            let digest = Sha256::digest(token.to_ascii_lowercase().as_bytes());
            let bucket =
                u64::from_le_bytes(digest[0..8].try_into().unwrap()) as usize % self.dimension;
            vector[bucket] += 1.0;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        } else {
            // Empty/symbol-only text still needs a non-zero vector.
            vector[0] = 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<BatchEmbeddings> {
        self.batch_calls.fetch_add(1, Ordering::Relaxed);
        let tokens_used = texts
            .iter()
            .map(|t| t.split_whitespace().count() as u64)
            .sum();
        Ok(BatchEmbeddings {
            vectors: texts.iter().map(|t| self.embed_text(t)).collect(),
            tokens_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        dot
    }

    #[tokio::test]
    async fn embedding_is_deterministic() {
        let provider = StubProvider::new("stub-64d", 64);
        let a = provider.embed("fn parse(input: &str)").await.unwrap();
        let b = provider.embed("fn parse(input: &str)").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn shared_tokens_raise_similarity() {
        let provider = StubProvider::new("stub-64d", 64);
        let doc = provider.embed("def f(): pass").await.unwrap();
        let query = provider.embed("def f").await.unwrap();
        let unrelated = provider.embed("completely different words").await.unwrap();
        assert!(cosine(&doc, &query) >= 0.5);
        assert!(cosine(&doc, &query) > cosine(&doc, &unrelated));
    }

    #[tokio::test]
    async fn empty_text_is_non_zero() {
        let provider = StubProvider::new("stub-8d", 8);
        let v = provider.embed("").await.unwrap();
        assert!(v.iter().any(|x| *x != 0.0));
    }

    #[tokio::test]
    async fn batch_reports_token_usage() {
        let provider = StubProvider::new("stub-8d", 8);
        let out = provider
            .embed_batch(&["one two".to_string(), "three".to_string()])
            .await
            .unwrap();
        assert_eq!(out.vectors.len(), 2);
        assert_eq!(out.tokens_used, 3);
        assert_eq!(provider.batch_calls(), 1);
    }
}
