use crate::error::{EmbeddingError, Result};
use crate::provider::EmbeddingProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE_MS: u64 = 100;
const BACKOFF_CAP_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Worker count; bounded by provider concurrency.
    pub concurrency: usize,
    /// Texts per provider call; clamped to the provider's batch limit.
    pub batch_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            batch_size: 32,
        }
    }
}

/// A batch that exhausted its retries.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub batch_index: usize,
    pub first_text_index: usize,
    pub text_count: usize,
    pub error: String,
}

/// Result of embedding a slice of texts. `embeddings[i]` aligns with input
/// index `i`; entries stay `None` for failed or cancelled batches.
#[derive(Debug)]
pub struct EmbedOutcome {
    pub embeddings: Vec<Option<Vec<f32>>>,
    pub tokens_used: u64,
    pub failed_batches: Vec<BatchFailure>,
    pub cancelled: bool,
}

impl EmbedOutcome {
    #[must_use]
    pub fn completed(&self) -> usize {
        self.embeddings.iter().filter(|e| e.is_some()).count()
    }
}

struct BatchJob {
    batch_index: usize,
    first_text_index: usize,
    texts: Vec<String>,
}

enum BatchResult {
    Done {
        batch_index: usize,
        first_text_index: usize,
        vectors: Vec<Vec<f32>>,
        tokens_used: u64,
    },
    Failed(BatchFailure),
}

/// Parallel batch embedder: shards texts into provider-sized batches and
/// dispatches them to a bounded set of workers. Transient provider errors
/// retry with jittered geometric backoff; persistent failures mark the
/// batch failed while other batches proceed. Cancellation is observed
/// between batches; results already collected remain valid.
pub struct EmbeddingWorkerPool {
    provider: Arc<dyn EmbeddingProvider>,
    config: PoolConfig,
}

impl EmbeddingWorkerPool {
    #[must_use]
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: PoolConfig) -> Self {
        Self { provider, config }
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub async fn embed_batches(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
        on_progress: impl Fn(usize, usize) + Send + Sync,
    ) -> Result<EmbedOutcome> {
        let total = texts.len();
        let mut outcome = EmbedOutcome {
            embeddings: vec![None; total],
            tokens_used: 0,
            failed_batches: Vec::new(),
            cancelled: false,
        };
        if total == 0 {
            return Ok(outcome);
        }

        let batch_size = self
            .config
            .batch_size
            .clamp(1, self.provider.max_batch_size().max(1));
        let jobs: Vec<BatchJob> = texts
            .chunks(batch_size)
            .enumerate()
            .map(|(batch_index, chunk)| BatchJob {
                batch_index,
                first_text_index: batch_index * batch_size,
                texts: chunk.to_vec(),
            })
            .collect();
        let job_count = jobs.len();

        let workers = self.config.concurrency.clamp(1, job_count);
        let (job_tx, job_rx) = mpsc::channel::<BatchJob>(job_count);
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<BatchResult>(job_count);

        for job in jobs {
            job_tx
                .send(job)
                .await
                .map_err(|_| EmbeddingError::Cancelled)?;
        }
        drop(job_tx);

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let provider = Arc::clone(&self.provider);
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        log::debug!("Embedding worker {worker_id} stopping on cancel");
                        break;
                    }
                    let job = {
                        let mut rx = job_rx.lock().await;
                        rx.recv().await
                    };
                    let Some(job) = job else { break };
                    let result = embed_with_retry(&*provider, job, &cancel).await;
                    if result_tx.send(result).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        let mut completed_texts = 0usize;
        while let Some(result) = result_rx.recv().await {
            match result {
                BatchResult::Done {
                    first_text_index,
                    vectors,
                    tokens_used,
                    ..
                } => {
                    completed_texts += vectors.len();
                    for (offset, vector) in vectors.into_iter().enumerate() {
                        outcome.embeddings[first_text_index + offset] = Some(vector);
                    }
                    outcome.tokens_used += tokens_used;
                }
                BatchResult::Failed(failure) => {
                    log::warn!(
                        "Embedding batch {} failed after retries: {}",
                        failure.batch_index,
                        failure.error
                    );
                    outcome.failed_batches.push(failure);
                }
            }
            on_progress(completed_texts, total);
        }

        for handle in handles {
            let _ = handle.await;
        }

        outcome.cancelled = cancel.is_cancelled();
        Ok(outcome)
    }
}

async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    job: BatchJob,
    cancel: &CancellationToken,
) -> BatchResult {
    let mut jitter_state = 0x5EED_0000u64 ^ job.batch_index as u64;
    let mut last_error = String::new();

    for attempt in 0..MAX_ATTEMPTS {
        if cancel.is_cancelled() {
            last_error = "cancelled".to_string();
            break;
        }

        match provider.embed_batch(&job.texts).await {
            Ok(batch) if batch.vectors.len() == job.texts.len() => {
                return BatchResult::Done {
                    batch_index: job.batch_index,
                    first_text_index: job.first_text_index,
                    vectors: batch.vectors,
                    tokens_used: batch.tokens_used,
                };
            }
            Ok(batch) => {
                last_error = format!(
                    "provider returned {} vectors for {} texts",
                    batch.vectors.len(),
                    job.texts.len()
                );
                break;
            }
            Err(err) if err.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                let delay = backoff_delay(attempt, &mut jitter_state);
                log::debug!(
                    "Batch {} attempt {} failed ({err}); retrying in {delay:?}",
                    job.batch_index,
                    attempt + 1
                );
                last_error = err.to_string();
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => {
                last_error = err.to_string();
                break;
            }
        }
    }

    BatchResult::Failed(BatchFailure {
        batch_index: job.batch_index,
        first_text_index: job.first_text_index,
        text_count: job.texts.len(),
        error: last_error,
    })
}

fn backoff_delay(attempt: u32, jitter_state: &mut u64) -> Duration {
    let base = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(16));
    let capped = base.min(BACKOFF_CAP_MS);
    // ±50% jitter from a deterministic stream.
    *jitter_state = jitter_state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *jitter_state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    let roll = (z ^ (z >> 31)) % 100;
    let jittered = capped / 2 + capped * roll / 200;
    Duration::from_millis(jittered.max(1))
}
