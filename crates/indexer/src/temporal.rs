use crate::config::ProjectConfig;
use crate::error::{IndexerError, Result};
use crate::git::{CommitInfo, GitRepo};
use crate::indexer::ProgressFn;
use crate::layout::ProjectLayout;
use crate::progress::{Fingerprint, TemporalProgress};
use crate::stats::IndexStats;
use crate::walker::FileWalker;
use cidx_chunker::{language_for_path, Chunker, ChunkerConfig};
use cidx_embedding::{EmbeddingProvider, EmbeddingWorkerPool, PoolConfig};
use cidx_protocol::ProgressEvent;
use cidx_vector_store::{keys, CollectionConfig, CollectionStore, Payload, Point};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Which commits a temporal run covers.
#[derive(Debug, Clone)]
pub enum CommitSelection {
    All,
    Since(String),
    List(Vec<String>),
}

/// Payload `type` of a primary (embedded) temporal point.
pub const TEMPORAL_PRIMARY_TYPE: &str = "file_chunk";
/// Payload `type` of a reference point for a repeated blob.
pub const TEMPORAL_REF_TYPE: &str = "blob_ref";

struct BlobWork {
    blob_hash: String,
    path: String,
    chunks: Vec<cidx_chunker::TextChunk>,
    language: Option<String>,
}

/// Indexes git blobs across commit history. Blobs are keyed by hash: each
/// unique blob is embedded exactly once over the collection's lifetime;
/// later occurrences get a reference point carrying the commit context.
/// A commit joins `completed_commits` only after all of its new blobs are
/// persisted.
pub struct TemporalIndexer {
    layout: ProjectLayout,
    config: ProjectConfig,
    provider: Arc<dyn EmbeddingProvider>,
    chunker: Chunker,
    git: GitRepo,
}

impl TemporalIndexer {
    pub fn new(
        layout: ProjectLayout,
        config: ProjectConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let chunker = Chunker::new(ChunkerConfig {
            chunk_size_chars: config.chunk_size_chars,
            overlap_chars: config.overlap_chars,
        })?;
        let git = GitRepo::new(layout.root());
        Ok(Self {
            layout,
            config,
            provider,
            chunker,
            git,
        })
    }

    #[must_use]
    pub fn collection_dir(&self) -> PathBuf {
        self.layout
            .temporal_collection_dir(self.provider.name(), self.provider.model())
    }

    pub async fn load_progress(&self) -> Result<TemporalProgress> {
        TemporalProgress::load(&self.layout.temporal_progress_path())
    }

    /// Index the selected commits in chronological order.
    pub async fn index_commits(
        &self,
        selection: CommitSelection,
        progress_fn: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<IndexStats> {
        let started = Instant::now();
        let mut stats = IndexStats::new();

        if !self.git.is_repo().await {
            return Err(IndexerError::Git(format!(
                "{} is not a git repository",
                self.layout.root().display()
            )));
        }

        let fingerprint = Fingerprint {
            provider: self.provider.name().to_string(),
            model: self.provider.model().to_string(),
            dimension: self.provider.dimension(),
        };
        let progress_path = self.layout.temporal_progress_path();
        let mut progress = TemporalProgress::load(&progress_path)?;
        if let Some(existing) = &progress.fingerprint {
            if existing != &fingerprint {
                return Err(IndexerError::FingerprintMismatch(format!(
                    "{} -> {}",
                    existing.describe(),
                    fingerprint.describe()
                )));
            }
        } else {
            progress.fingerprint = Some(fingerprint.clone());
        }

        let commits = self.select_commits(&selection).await?;
        let todo: Vec<CommitInfo> = commits
            .into_iter()
            .filter(|commit| !progress.is_commit_completed(&commit.hash))
            .collect();
        progress.total_commits = progress.completed_commits.len() as u64 + todo.len() as u64;

        progress_fn(ProgressEvent::status(format!(
            "Temporal indexing: {} commits to process",
            todo.len()
        )));

        let collection = {
            let dir = self.collection_dir();
            let config = CollectionConfig {
                dim: self.provider.dimension(),
                bits: 64,
                provider: self.provider.name().to_string(),
                model: self.provider.model().to_string(),
            };
            tokio::task::spawn_blocking(move || CollectionStore::create(&dir, &config))
                .await
                .map_err(|err| IndexerError::Other(format!("join collection open: {err}")))??
        };
        let collection = Arc::new(Mutex::new(collection));

        let walker = FileWalker::new(self.layout.root(), &self.config)?;
        let pool = EmbeddingWorkerPool::new(
            Arc::clone(&self.provider),
            PoolConfig {
                concurrency: self.config.workers,
                batch_size: self.provider.max_batch_size(),
            },
        );

        let total = progress.total_commits;
        let mut done = progress.completed_commits.len() as u64;
        let session_base = done;
        let session_started = Instant::now();

        for commit in &todo {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }

            let outcome = self
                .index_one_commit(&collection, &walker, &pool, commit, &mut progress, cancel)
                .await?;
            let Some(outcome) = outcome else {
                stats.cancelled = true;
                break;
            };

            if outcome.fully_persisted {
                progress.mark_commit_completed(&commit.hash);
            } else {
                // Some blob failed to embed; leave the commit incomplete so
                // the next session retries it.
                stats.failed_files += 1;
                log::warn!(
                    "Commit {} left incomplete; it will be retried",
                    short_hash(&commit.hash)
                );
            }
            progress.files_processed += outcome.new_blobs;
            progress.save(&progress_path)?;
            stats.files += outcome.new_blobs;
            done += 1;

            let elapsed = session_started.elapsed().as_secs_f64().max(0.001);
            let rate = (done.saturating_sub(session_base)) as f64 / elapsed;
            progress_fn(ProgressEvent::progress(
                done,
                total,
                short_hash(&commit.hash),
                format!("{done}/{total} commits | {rate:.1} commits/s"),
            ));
        }

        if let Ok(branch) = self.git.current_branch().await {
            progress.indexed_branches.insert(branch);
        }
        progress.save(&progress_path)?;

        stats.time_ms = started.elapsed().as_millis() as u64;
        log::info!(
            "Temporal session finished for {}: {} commits done, {} blobs embedded",
            self.layout.root().display(),
            done,
            stats.files
        );
        Ok(stats)
    }

    /// Index commits of `branch` that are not yet completed. Used by the
    /// refs watcher for both new commits and branch-switch catch-up.
    pub async fn catch_up_branch(
        &self,
        branch: &str,
        progress_fn: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<IndexStats> {
        let progress = self.load_progress().await?;
        let reachable = self.git.rev_list(branch).await?;
        let mut new_commits: Vec<String> = reachable
            .into_iter()
            .filter(|hash| !progress.completed_commits.contains(hash))
            .collect();
        // rev-list is newest-first; index oldest-first.
        new_commits.reverse();

        if new_commits.is_empty() {
            return Ok(IndexStats::new());
        }
        log::info!(
            "Catching up {} new commits on branch {branch}",
            new_commits.len()
        );
        self.index_commits(CommitSelection::List(new_commits), progress_fn, cancel)
            .await
    }

    async fn select_commits(&self, selection: &CommitSelection) -> Result<Vec<CommitInfo>> {
        match selection {
            CommitSelection::All => self.git.log_commits("HEAD", None).await,
            CommitSelection::Since(when) => self.git.log_commits("HEAD", Some(when)).await,
            CommitSelection::List(hashes) => {
                let mut commits = Vec::with_capacity(hashes.len());
                for hash in hashes {
                    commits.push(self.git.commit_info(hash).await?);
                }
                Ok(commits)
            }
        }
    }

    /// Process one commit's tree. Returns `None` when cancelled
    /// mid-commit.
    async fn index_one_commit(
        &self,
        collection: &Arc<Mutex<CollectionStore>>,
        walker: &FileWalker,
        pool: &EmbeddingWorkerPool,
        commit: &CommitInfo,
        progress: &mut TemporalProgress,
        cancel: &CancellationToken,
    ) -> Result<Option<CommitOutcome>> {
        let blobs = self.git.commit_blobs(&commit.hash).await?;

        let mut new_work: Vec<BlobWork> = Vec::new();
        let mut repeats: Vec<(String, String)> = Vec::new();
        let mut seen_in_commit: std::collections::HashSet<String> =
            std::collections::HashSet::new();

        for (blob_hash, path) in blobs {
            if !walker.is_included(&path) {
                continue;
            }
            if progress.is_blob_known(&blob_hash) || !seen_in_commit.insert(blob_hash.clone()) {
                repeats.push((blob_hash, path));
                continue;
            }
            let content = match self.git.read_blob(&blob_hash).await {
                Ok(content) => content,
                Err(err) => {
                    log::debug!("Skipping unreadable blob {blob_hash} at {path}: {err}");
                    continue;
                }
            };
            if content.is_empty() {
                continue;
            }
            let chunks = match self.chunker.chunk_str(&content) {
                Ok(chunks) => chunks,
                Err(err) => {
                    log::warn!("Chunking failed for blob {blob_hash} at {path}: {err}");
                    continue;
                }
            };
            new_work.push(BlobWork {
                blob_hash,
                path: path.clone(),
                language: language_for_path(&path).map(str::to_string),
                chunks,
            });
        }

        if cancel.is_cancelled() {
            return Ok(None);
        }

        // Embed all new chunks of this commit in one pool pass.
        let texts: Vec<String> = new_work
            .iter()
            .flat_map(|work| work.chunks.iter().map(|c| c.content.clone()))
            .collect();
        let outcome = pool.embed_batches(&texts, cancel, |_, _| {}).await?;
        if outcome.cancelled {
            return Ok(None);
        }

        let mut points = Vec::new();
        let mut cursor = 0usize;
        let mut embedded_blobs = 0u64;
        let mut fully_persisted = true;
        for work in &new_work {
            let span = cursor..cursor + work.chunks.len();
            cursor = span.end;
            let vectors: Option<Vec<Vec<f32>>> =
                outcome.embeddings[span].iter().map(Clone::clone).collect();
            let Some(vectors) = vectors else {
                log::warn!(
                    "Embedding failed for blob {} at {}; will retry next session",
                    work.blob_hash,
                    work.path
                );
                fully_persisted = false;
                continue;
            };

            let mut primary_id: Option<String> = None;
            for (chunk, vector) in work.chunks.iter().zip(vectors.into_iter()) {
                let id = cidx_vector_store::point_id(
                    &format!("blob:{}", work.blob_hash),
                    chunk.byte_start,
                    chunk.byte_end,
                    &chunk.content,
                );
                primary_id.get_or_insert_with(|| id.clone());

                let mut payload = Payload::new();
                payload.insert(keys::FILE_PATH, work.path.clone());
                payload.insert(keys::CONTENT, chunk.content.clone());
                if let Some(language) = &work.language {
                    payload.insert(keys::LANGUAGE, language.clone());
                }
                payload.insert(keys::LINE_START, chunk.line_start as u64);
                payload.insert(keys::LINE_END, chunk.line_end as u64);
                payload.insert(keys::CHUNK_INDEX, chunk.chunk_index as u64);
                payload.insert(keys::TYPE, TEMPORAL_PRIMARY_TYPE);
                payload.insert(keys::BLOB_HASH, work.blob_hash.clone());
                payload.insert(keys::COMMIT_HASH, commit.hash.clone());
                payload.insert(keys::COMMIT_DATE, commit.date.clone());
                payload.insert(keys::AUTHOR_NAME, commit.author_name.clone());
                payload.insert(keys::AUTHOR_EMAIL, commit.author_email.clone());
                points.push(Point {
                    id,
                    vector,
                    payload,
                });
            }

            if let Some(primary_id) = primary_id {
                progress.record_primary(&work.blob_hash, &primary_id);
                embedded_blobs += 1;
            }
        }

        // Reference points for blobs that are already embedded: same vector
        // as the primary so commit-scoped queries can resolve them, typed
        // so regular temporal search excludes them.
        for (blob_hash, path) in repeats {
            let Some(primary_id) = progress.blob_points.get(&blob_hash).cloned() else {
                continue;
            };
            let primary = {
                let collection = Arc::clone(collection);
                let primary_id = primary_id.clone();
                tokio::task::spawn_blocking(move || {
                    collection
                        .lock()
                        .expect("collection lock poisoned")
                        .get_point(&primary_id)
                })
                .await
                .map_err(|err| IndexerError::Other(format!("join primary read: {err}")))?
            };
            let Ok(primary) = primary else {
                continue;
            };

            let mut payload = Payload::new();
            payload.insert(keys::FILE_PATH, path.clone());
            payload.insert(keys::TYPE, TEMPORAL_REF_TYPE);
            payload.insert(keys::BLOB_HASH, blob_hash.clone());
            payload.insert(keys::COMMIT_HASH, commit.hash.clone());
            payload.insert(keys::COMMIT_DATE, commit.date.clone());
            payload.insert("primary_point_id", primary_id.as_str());
            points.push(Point {
                id: cidx_vector_store::point_id(
                    &format!("ref:{}:{}", commit.hash, path),
                    0,
                    0,
                    &blob_hash,
                ),
                vector: primary.vector,
                payload,
            });
        }

        if !points.is_empty() {
            let collection = Arc::clone(collection);
            tokio::task::spawn_blocking(move || {
                collection
                    .lock()
                    .expect("collection lock poisoned")
                    .upsert_points(points)
            })
            .await
            .map_err(|err| IndexerError::Other(format!("join temporal persist: {err}")))??;
        }

        Ok(Some(CommitOutcome {
            new_blobs: embedded_blobs,
            fully_persisted,
        }))
    }
}

struct CommitOutcome {
    new_blobs: u64,
    fully_persisted: bool,
}

fn short_hash(hash: &str) -> String {
    hash.chars().take(12).collect()
}
