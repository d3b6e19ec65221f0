use crate::config::ProjectConfig;
use crate::error::{IndexerError, Result};
use crate::git::GitRepo;
use crate::index_lock::acquire_index_write_lock;
use crate::layout::ProjectLayout;
use crate::messages::{OperationMessages, ThreadCountSource};
use crate::progress::{Fingerprint, OperationKind, ProgressiveMetadata};
use crate::slots::{SlotStatus, SlotTracker};
use crate::stats::IndexStats;
use cidx_chunker::{language_for_path, Chunker, ChunkerConfig, TextChunk};
use cidx_embedding::{EmbeddingProvider, EmbeddingWorkerPool, PoolConfig};
use cidx_fts::{FtsDocument, FtsIndex};
use cidx_protocol::ProgressEvent;
use cidx_vector_store::{keys, CollectionConfig, CollectionStore, Payload, Point};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub type ProgressFn = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Options for one indexing run.
#[derive(Debug, Clone, Copy)]
pub struct IndexerOptions {
    pub mode: OperationKind,
    pub thread_source: ThreadCountSource,
}

impl IndexerOptions {
    #[must_use]
    pub const fn new(mode: OperationKind) -> Self {
        Self {
            mode,
            thread_source: ThreadCountSource::ConfigFile,
        }
    }
}

enum FileOutcome {
    Chunked {
        chunks: Vec<TextChunk>,
        language: Option<String>,
    },
    Skipped,
    Failed(String),
}

struct FileWork {
    rel: String,
    slot: Option<usize>,
    mtime: u64,
    outcome: FileOutcome,
}

/// Orchestrates walk → chunk → embed → persist for one project, with
/// resumable progress and clear / reconcile / incremental / resume modes.
pub struct ProjectIndexer {
    layout: ProjectLayout,
    config: ProjectConfig,
    provider: Arc<dyn EmbeddingProvider>,
    tracker: Arc<SlotTracker>,
    chunker: Arc<Chunker>,
}

impl ProjectIndexer {
    pub fn new(
        layout: ProjectLayout,
        config: ProjectConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let chunker = Chunker::new(ChunkerConfig {
            chunk_size_chars: config.chunk_size_chars,
            overlap_chars: config.overlap_chars,
        })?;
        // One display slot per worker, no extras.
        let tracker = Arc::new(SlotTracker::new(config.workers));
        Ok(Self {
            layout,
            config,
            provider,
            tracker,
            chunker: Arc::new(chunker),
        })
    }

    #[must_use]
    pub fn tracker(&self) -> Arc<SlotTracker> {
        Arc::clone(&self.tracker)
    }

    #[must_use]
    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            provider: self.provider.name().to_string(),
            model: self.provider.model().to_string(),
            dimension: self.provider.dimension(),
        }
    }

    fn collection_dir(&self) -> PathBuf {
        self.layout
            .semantic_collection_dir(self.provider.name(), self.provider.model())
    }

    /// Run one indexing session. Cancellation drains the in-flight batch,
    /// commits the FTS index, persists progressive metadata, and returns
    /// with `stats.cancelled` set.
    pub async fn index(
        &self,
        options: IndexerOptions,
        progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<IndexStats> {
        let started = Instant::now();
        let mut stats = IndexStats::new();
        let mut messages = OperationMessages::new();
        let _lock = acquire_index_write_lock(&self.layout).await?;

        let fingerprint = self.fingerprint();
        let collection_dir = self.collection_dir();
        let collection_name = collection_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut metadata =
            self.prepare_session(options.mode, &fingerprint, &collection_name, &mut messages, &progress)?;

        progress(ProgressEvent::status(OperationMessages::operation_start(
            options.mode,
            metadata.completed_count(),
        )));
        progress(ProgressEvent::status(OperationMessages::thread_count(
            self.config.workers,
            options.thread_source,
            self.provider.name(),
        )));

        let collection = {
            let dir = collection_dir.clone();
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
        let fts = Arc::new(FtsIndex::open_or_create(&self.layout.fts_dir())?);

        let walker = crate::walker::FileWalker::new(self.layout.root(), &self.config)?;
        let files = tokio::task::spawn_blocking(move || walker.walk())
            .await
            .map_err(|err| IndexerError::Other(format!("join walk: {err}")))??;

        // Reconcile: diff disk against the stored payload set and prime the
        // session with unchanged files.
        let mut stale_points: HashMap<String, Vec<String>> = HashMap::new();
        if options.mode == OperationKind::Reconcile {
            self.reconcile_diff(&collection, &fts, &files, &mut metadata, &mut stats, &mut stale_points)
                .await?;
        }

        metadata.total_files = files.len() as u64;
        metadata.save(&self.layout.progress_path())?;

        let files_todo: Vec<PathBuf> = files
            .iter()
            .filter(|file| match options.mode {
                OperationKind::Clear => true,
                OperationKind::Reconcile
                | OperationKind::Incremental
                | OperationKind::Resume => {
                    !metadata.is_completed(&file.to_string_lossy())
                }
            })
            .cloned()
            .collect();

        progress(ProgressEvent::status(OperationMessages::progress_start(
            files_todo.len() as u64,
            options.mode,
        )));

        if files.is_empty() {
            // Empty repository: a valid, empty collection and a clean exit.
            fts.commit()?;
            metadata.save(&self.layout.progress_path())?;
            stats.time_ms = started.elapsed().as_millis() as u64;
            return Ok(stats);
        }

        let git = GitRepo::new(self.layout.root());
        let git_branch = if git.is_repo().await {
            git.current_branch().await.ok()
        } else {
            None
        };

        let pool = EmbeddingWorkerPool::new(
            Arc::clone(&self.provider),
            PoolConfig {
                concurrency: self.config.workers,
                batch_size: self.provider.max_batch_size(),
            },
        );

        let total = metadata.total_files;
        let mut completed = metadata.completed_count();
        let session_started = Instant::now();
        let session_base = completed;

        for batch in files_todo.chunks(self.config.batch_files.max(1)) {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }

            let work = self.read_and_chunk_batch(batch).await;
            let embedded = self
                .embed_batch(&pool, &work, cancel, &mut stats)
                .await?;

            // Serial persist: points + FTS + progress, in file order.
            for (file, points) in work.iter().zip(embedded.into_iter()) {
                match (&file.outcome, points) {
                    (FileOutcome::Chunked { chunks, language }, Some(points)) => {
                        if let Some(slot) = file.slot {
                            self.tracker
                                .update_status(slot, SlotStatus::Persisting, None);
                        }
                        let persist_result = self
                            .persist_file(
                                &collection,
                                &fts,
                                file,
                                chunks,
                                language.as_deref(),
                                points,
                                git_branch.as_deref(),
                                &mut stale_points,
                            )
                            .await;
                        match persist_result {
                            Ok(point_count) => {
                                stats.add_file(language.as_deref());
                                stats.chunks += chunks.len() as u64;
                                stats.points += point_count;
                                metadata.mark_completed(&file.rel);
                                completed += 1;
                                if let Some(slot) = file.slot {
                                    self.tracker
                                        .update_status(slot, SlotStatus::Complete, None);
                                }
                                progress(ProgressEvent::progress(
                                    completed,
                                    total,
                                    file.rel.clone(),
                                    format_rate_info(
                                        completed,
                                        total,
                                        session_base,
                                        session_started,
                                    ),
                                ));
                            }
                            Err(err) => {
                                // Disk-level failures surface immediately;
                                // completed state is already on disk.
                                metadata.save(&self.layout.progress_path())?;
                                return Err(err);
                            }
                        }
                    }
                    (FileOutcome::Chunked { .. }, None) => {
                        stats.failed_files += 1;
                        metadata.mark_failed(&file.rel, "embedding batch failed");
                        if let Some(slot) = file.slot {
                            self.tracker.update_status(slot, SlotStatus::Failed, None);
                        }
                    }
                    (FileOutcome::Skipped, _) => {
                        stats.skipped_files += 1;
                        metadata.mark_completed(&file.rel);
                        completed += 1;
                    }
                    (FileOutcome::Failed(reason), _) => {
                        stats.failed_files += 1;
                        metadata.mark_failed(&file.rel, reason);
                        if let Some(slot) = file.slot {
                            self.tracker.update_status(slot, SlotStatus::Failed, None);
                        }
                    }
                }
                if let Some(slot) = file.slot {
                    self.tracker.release(slot);
                }
            }

            metadata.save(&self.layout.progress_path())?;
        }

        fts.commit()?;
        metadata.save(&self.layout.progress_path())?;

        stats.time_ms = started.elapsed().as_millis() as u64;
        if stats.cancelled {
            progress(ProgressEvent::status(format!(
                "Indexing cancelled - {completed}/{total} files committed"
            )));
        } else {
            progress(ProgressEvent::status(format!(
                "Indexing complete - {} files, {} chunks in {} ms",
                stats.files, stats.chunks, stats.time_ms
            )));
        }
        log::info!(
            "Indexing session finished for {}: {:?}",
            self.layout.root().display(),
            stats
        );
        Ok(stats)
    }

    /// Clear-mode teardown plus progressive-metadata session setup with the
    /// fingerprint gate.
    fn prepare_session(
        &self,
        mode: OperationKind,
        fingerprint: &Fingerprint,
        collection_name: &str,
        messages: &mut OperationMessages,
        progress: &ProgressFn,
    ) -> Result<ProgressiveMetadata> {
        let progress_path = self.layout.progress_path();

        if mode == OperationKind::Clear {
            let collection_dir = self.collection_dir();
            let documents_before = CollectionStore::open(&collection_dir)
                .map(|store| store.count_points())
                .unwrap_or(0);
            CollectionStore::destroy(&collection_dir)?;
            if self.layout.fts_dir().exists() {
                std::fs::remove_dir_all(self.layout.fts_dir())?;
            }
            let _ = std::fs::remove_file(&progress_path);
            if let Some(message) = messages.collection_cleared(collection_name, documents_before)
            {
                progress(ProgressEvent::status(message));
            }
            return Ok(ProgressiveMetadata::new(mode, fingerprint.clone()));
        }

        match ProgressiveMetadata::load(&progress_path)? {
            Some(mut existing)
                if matches!(mode, OperationKind::Incremental | OperationKind::Resume) =>
            {
                existing.check_fingerprint(fingerprint)?;
                existing.operation = mode;
                Ok(existing)
            }
            Some(existing) => {
                // Reconcile starts a fresh session but still refuses to mix
                // embedding spaces.
                existing.check_fingerprint(fingerprint)?;
                Ok(ProgressiveMetadata::new(mode, fingerprint.clone()))
            }
            None => Ok(ProgressiveMetadata::new(mode, fingerprint.clone())),
        }
    }

    async fn reconcile_diff(
        &self,
        collection: &Arc<Mutex<CollectionStore>>,
        fts: &Arc<FtsIndex>,
        files: &[PathBuf],
        metadata: &mut ProgressiveMetadata,
        stats: &mut IndexStats,
        stale_points: &mut HashMap<String, Vec<String>>,
    ) -> Result<()> {
        let stored = {
            let collection = Arc::clone(collection);
            tokio::task::spawn_blocking(move || {
                collection
                    .lock()
                    .expect("collection lock poisoned")
                    .iter_points()
            })
            .await
            .map_err(|err| IndexerError::Other(format!("join reconcile scan: {err}")))??
        };

        // path -> (ids, stored mtime)
        let mut by_path: HashMap<String, (Vec<String>, Option<u64>)> = HashMap::new();
        for point in stored {
            let Some(path) = point.payload.path_or_file_path() else {
                continue;
            };
            let entry = by_path.entry(path.to_string()).or_default();
            entry.0.push(point.id.clone());
            entry.1 = entry.1.or_else(|| point.payload.get_u64(keys::FILE_MTIME));
        }

        let on_disk: std::collections::HashSet<String> = files
            .iter()
            .map(|f| f.to_string_lossy().into_owned())
            .collect();

        let mut removed_ids = Vec::new();
        for (path, (ids, stored_mtime)) in &by_path {
            if !on_disk.contains(path) {
                removed_ids.extend(ids.iter().cloned());
                fts.delete_for_path(path)?;
                stats.deleted_files += 1;
                continue;
            }
            let current_mtime = file_mtime(&self.layout.root().join(path));
            if stored_mtime.is_some() && *stored_mtime == current_mtime {
                metadata.mark_completed(path);
            } else {
                // Changed file: stale points are replaced when the file is
                // re-persisted.
                stale_points.insert(path.clone(), ids.clone());
            }
        }

        if !removed_ids.is_empty() {
            let collection = Arc::clone(collection);
            tokio::task::spawn_blocking(move || {
                collection
                    .lock()
                    .expect("collection lock poisoned")
                    .delete_points(&removed_ids)
            })
            .await
            .map_err(|err| IndexerError::Other(format!("join reconcile delete: {err}")))??;
        }
        Ok(())
    }

    /// Stage 1: read + hash + chunk, parallel in waves bounded by the
    /// worker count. Each in-flight file owns a display slot.
    async fn read_and_chunk_batch(&self, batch: &[PathBuf]) -> Vec<FileWork> {
        let mut work = Vec::with_capacity(batch.len());
        for wave in batch.chunks(self.config.workers.max(1)) {
            let mut handles = Vec::with_capacity(wave.len());
            for rel in wave {
                let rel = rel.to_string_lossy().into_owned();
                let abs = self.layout.root().join(&rel);
                let tracker = Arc::clone(&self.tracker);
                let chunker = Arc::clone(&self.chunker);
                handles.push(tokio::spawn(async move {
                    let size = tokio::fs::metadata(&abs)
                        .await
                        .map(|m| m.len())
                        .unwrap_or(0);
                    let slot = tracker.try_acquire(rel.clone(), size);
                    if let Some(slot) = slot {
                        tracker.update_status(slot, SlotStatus::Hashing, None);
                    }

                    let mtime = file_mtime(&abs).unwrap_or(0);
                    let content = match tokio::fs::read_to_string(&abs).await {
                        Ok(content) => content,
                        Err(err) => {
                            return FileWork {
                                rel,
                                slot,
                                mtime,
                                outcome: FileOutcome::Failed(err.to_string()),
                            }
                        }
                    };
                    if content.is_empty() {
                        return FileWork {
                            rel,
                            slot,
                            mtime,
                            outcome: FileOutcome::Skipped,
                        };
                    }

                    if let Some(slot) = slot {
                        tracker.update_status(slot, SlotStatus::Chunking, None);
                    }
                    match chunker.chunk_str(&content) {
                        Ok(chunks) => {
                            let language = language_for_path(&rel).map(str::to_string);
                            FileWork {
                                rel,
                                slot,
                                mtime,
                                outcome: FileOutcome::Chunked { chunks, language },
                            }
                        }
                        Err(err) => FileWork {
                            rel,
                            slot,
                            mtime,
                            outcome: FileOutcome::Failed(err.to_string()),
                        },
                    }
                }));
            }
            for handle in handles {
                match handle.await {
                    Ok(item) => work.push(item),
                    Err(err) => log::warn!("File task panicked: {err}"),
                }
            }
        }
        work
    }

    /// Stage 2: embed every chunk of the batch through the worker pool.
    /// Returns, per file, the embedded vectors aligned with its chunks, or
    /// `None` when any of its chunks landed in a failed batch.
    async fn embed_batch(
        &self,
        pool: &EmbeddingWorkerPool,
        work: &[FileWork],
        cancel: &CancellationToken,
        stats: &mut IndexStats,
    ) -> Result<Vec<Option<Vec<Vec<f32>>>>> {
        let mut texts = Vec::new();
        let mut spans = Vec::with_capacity(work.len());
        for file in work {
            match &file.outcome {
                FileOutcome::Chunked { chunks, .. } => {
                    let start = texts.len();
                    texts.extend(chunks.iter().map(|c| c.content.clone()));
                    spans.push(Some(start..texts.len()));
                    if let Some(slot) = file.slot {
                        self.tracker
                            .update_status(slot, SlotStatus::Vectorizing, None);
                    }
                }
                _ => spans.push(None),
            }
        }

        if texts.is_empty() {
            return Ok(work.iter().map(|_| None).collect());
        }

        let outcome = pool.embed_batches(&texts, cancel, |_, _| {}).await?;
        stats.tokens_used += outcome.tokens_used;

        let mut results = Vec::with_capacity(work.len());
        for span in spans {
            match span {
                Some(range) => {
                    let vectors: Option<Vec<Vec<f32>>> = outcome.embeddings[range]
                        .iter()
                        .map(|v| v.clone())
                        .collect();
                    results.push(vectors);
                }
                None => results.push(None),
            }
        }
        Ok(results)
    }

    /// Stage 3 for one file: replace stale points, upsert new points, feed
    /// the FTS index.
    #[allow(clippy::too_many_arguments)]
    async fn persist_file(
        &self,
        collection: &Arc<Mutex<CollectionStore>>,
        fts: &Arc<FtsIndex>,
        file: &FileWork,
        chunks: &[TextChunk],
        language: Option<&str>,
        vectors: Vec<Vec<f32>>,
        git_branch: Option<&str>,
        stale_points: &mut HashMap<String, Vec<String>>,
    ) -> Result<u64> {
        let mut points = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors.into_iter()) {
            let mut payload = Payload::new();
            payload.insert(keys::PATH, file.rel.clone());
            payload.insert(keys::CONTENT, chunk.content.clone());
            if let Some(language) = language {
                payload.insert(keys::LANGUAGE, language);
            }
            payload.insert(keys::LINE_START, chunk.line_start as u64);
            payload.insert(keys::LINE_END, chunk.line_end as u64);
            payload.insert(keys::CHUNK_INDEX, chunk.chunk_index as u64);
            payload.insert(keys::FILE_MTIME, file.mtime);
            payload.insert(keys::TYPE, "file_chunk");
            if let Some(branch) = git_branch {
                payload.insert(keys::GIT_BRANCH, branch);
            }
            points.push(Point {
                id: cidx_vector_store::point_id(
                    &file.rel,
                    chunk.byte_start,
                    chunk.byte_end,
                    &chunk.content,
                ),
                vector,
                payload,
            });
        }

        let stale = stale_points.remove(&file.rel);
        let point_count = points.len() as u64;
        {
            let collection = Arc::clone(collection);
            tokio::task::spawn_blocking(move || -> Result<()> {
                let mut store = collection.lock().expect("collection lock poisoned");
                if let Some(stale_ids) = stale {
                    store.delete_points(&stale_ids)?;
                }
                store.upsert_points(points)?;
                Ok(())
            })
            .await
            .map_err(|err| IndexerError::Other(format!("join persist: {err}")))??;
        }

        fts.delete_for_path(&file.rel)?;
        for chunk in chunks {
            fts.add_document(&FtsDocument {
                path: file.rel.clone(),
                content: chunk.content.clone(),
                language: language.map(str::to_string),
                line_start: chunk.line_start as u64,
                line_end: chunk.line_end as u64,
            })?;
        }

        Ok(point_count)
    }
}

fn file_mtime(path: &std::path::Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .and_then(|meta| meta.modified().ok())
        .and_then(|modified| modified.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs())
}

fn format_rate_info(
    completed: u64,
    total: u64,
    session_base: u64,
    session_started: Instant,
) -> String {
    let elapsed = session_started.elapsed().as_secs_f64().max(0.001);
    let rate = (completed.saturating_sub(session_base)) as f64 / elapsed;
    format!("{completed}/{total} files | {rate:.1} files/s")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cidx_embedding::{EmbeddingProvider as _, StubProvider};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    fn stub_config() -> ProjectConfig {
        let mut config = ProjectConfig::default();
        config.embedding.provider = "stub".to_string();
        config.embedding.model = "stub-64d".to_string();
        config.embedding.dimension = 64;
        config.workers = 2;
        config.batch_files = 4;
        config
    }

    fn indexer_for(root: &std::path::Path) -> ProjectIndexer {
        let config = stub_config();
        let provider = Arc::new(StubProvider::new("stub-64d", 64));
        ProjectIndexer::new(ProjectLayout::new(root), config, provider).unwrap()
    }

    fn collect_events() -> (ProgressFn, Arc<StdMutex<Vec<ProgressEvent>>>) {
        let events: Arc<StdMutex<Vec<ProgressEvent>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback: ProgressFn = Arc::new(move |event| {
            sink.lock().unwrap().push(event);
        });
        (callback, events)
    }

    async fn run(indexer: &ProjectIndexer, mode: OperationKind) -> IndexStats {
        let (progress, _) = collect_events();
        indexer
            .index(
                IndexerOptions::new(mode),
                progress,
                &CancellationToken::new(),
            )
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn empty_to_full_indexing() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.py"), "def f(): pass\n").unwrap();

        let indexer = indexer_for(tmp.path());
        let stats = run(&indexer, OperationKind::Clear).await;
        assert_eq!(stats.files, 1);
        assert_eq!(stats.points, 1);

        let collection =
            CollectionStore::open(&indexer.collection_dir()).unwrap();
        assert_eq!(collection.count_points(), 1);

        let metadata = ProgressiveMetadata::load(&indexer.layout().progress_path())
            .unwrap()
            .unwrap();
        assert!(metadata.is_completed("a.py"));

        // Semantic search finds the indexed definition.
        let provider = StubProvider::new("stub-64d", 64);
        let query = provider.embed("def f").await.unwrap();
        let hits = collection
            .search(&query, 5, None, cidx_vector_store::SearchOptions::default())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score >= 0.5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn incremental_rerun_adds_nothing() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.rs"), "fn a() {}\n").unwrap();
        std::fs::write(tmp.path().join("b.rs"), "fn b() {}\n").unwrap();

        let indexer = indexer_for(tmp.path());
        let first = run(&indexer, OperationKind::Clear).await;
        assert_eq!(first.files, 2);

        let second = run(&indexer, OperationKind::Incremental).await;
        assert_eq!(second.files, 0);

        let collection = CollectionStore::open(&indexer.collection_dir()).unwrap();
        assert_eq!(collection.count_points(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reconcile_after_clear_index_is_a_noop() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.rs"), "fn a() {}\n").unwrap();
        std::fs::write(tmp.path().join("b.rs"), "fn b() {}\n").unwrap();

        let indexer = indexer_for(tmp.path());
        run(&indexer, OperationKind::Clear).await;
        let before: Vec<String> = CollectionStore::open(&indexer.collection_dir())
            .unwrap()
            .list_ids()
            .unwrap();

        run(&indexer, OperationKind::Reconcile).await;
        let after: Vec<String> = CollectionStore::open(&indexer.collection_dir())
            .unwrap()
            .list_ids()
            .unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reconcile_deletes_removed_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("keep.rs"), "fn keep() {}\n").unwrap();
        std::fs::write(tmp.path().join("gone.rs"), "fn gone() {}\n").unwrap();

        let indexer = indexer_for(tmp.path());
        run(&indexer, OperationKind::Clear).await;
        std::fs::remove_file(tmp.path().join("gone.rs")).unwrap();

        let stats = run(&indexer, OperationKind::Reconcile).await;
        assert_eq!(stats.deleted_files, 1);

        let collection = CollectionStore::open(&indexer.collection_dir()).unwrap();
        assert_eq!(collection.count_points(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn zero_byte_files_are_skipped() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("empty.rs"), "").unwrap();
        std::fs::write(tmp.path().join("full.rs"), "fn f() {}\n").unwrap();

        let indexer = indexer_for(tmp.path());
        let stats = run(&indexer, OperationKind::Clear).await;
        assert_eq!(stats.files, 1);
        assert_eq!(stats.skipped_files, 1);

        let collection = CollectionStore::open(&indexer.collection_dir()).unwrap();
        assert_eq!(collection.count_points(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn empty_repository_is_a_noop() {
        let tmp = TempDir::new().unwrap();
        let indexer = indexer_for(tmp.path());
        let stats = run(&indexer, OperationKind::Clear).await;
        assert_eq!(stats.files, 0);
        let collection = CollectionStore::open(&indexer.collection_dir()).unwrap();
        assert_eq!(collection.count_points(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fingerprint_change_rejects_resume() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.rs"), "fn a() {}\n").unwrap();

        let indexer = indexer_for(tmp.path());
        run(&indexer, OperationKind::Clear).await;

        // Same project, different model: the session must be refused.
        let mut config = stub_config();
        config.embedding.model = "stub-32d".to_string();
        config.embedding.dimension = 32;
        let other = ProjectIndexer::new(
            ProjectLayout::new(tmp.path()),
            config,
            Arc::new(StubProvider::new("stub-32d", 32)),
        )
        .unwrap();

        let (progress, _) = collect_events();
        let err = other
            .index(
                IndexerOptions::new(OperationKind::Resume),
                progress,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::FingerprintMismatch(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn resume_continues_from_completed_count() {
        let tmp = TempDir::new().unwrap();
        for i in 0..6 {
            std::fs::write(
                tmp.path().join(format!("f{i}.rs")),
                format!("fn f{i}() {{}}\n"),
            )
            .unwrap();
        }

        let indexer = indexer_for(tmp.path());
        run(&indexer, OperationKind::Clear).await;

        // Simulate a crash after three files: rewrite metadata keeping only
        // half the completed set.
        let path = indexer.layout().progress_path();
        let mut metadata = ProgressiveMetadata::load(&path).unwrap().unwrap();
        let keep: Vec<String> = metadata.completed_files.iter().take(3).cloned().collect();
        metadata.completed_files = keep.into_iter().collect();
        metadata.save(&path).unwrap();

        let (progress, events) = collect_events();
        indexer
            .index(
                IndexerOptions::new(OperationKind::Resume),
                progress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let events = events.lock().unwrap();
        let first_progress = events.iter().find(|e| !e.is_status()).unwrap();
        assert_eq!(first_progress.current, 4);
        assert_eq!(first_progress.total, 6);
        assert!(first_progress.rate().is_some());

        let collection = CollectionStore::open(&indexer.collection_dir()).unwrap();
        assert_eq!(collection.count_points(), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancelled_run_commits_partial_state() {
        let tmp = TempDir::new().unwrap();
        for i in 0..8 {
            std::fs::write(
                tmp.path().join(format!("f{i}.rs")),
                format!("fn f{i}() {{}}\n"),
            )
            .unwrap();
        }

        let indexer = indexer_for(tmp.path());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (progress, _) = collect_events();
        let stats = indexer
            .index(IndexerOptions::new(OperationKind::Clear), progress, &cancel)
            .await
            .unwrap();
        assert!(stats.cancelled);

        // Metadata exists and is loadable even though nothing completed.
        let metadata = ProgressiveMetadata::load(&indexer.layout().progress_path())
            .unwrap()
            .unwrap();
        assert_eq!(metadata.operation, OperationKind::Clear);
    }
}
