use crate::error::{DaemonError, Result};
use crate::sessions::{SessionRegistry, SessionSettings};
use cidx_embedding::{provider_from_config, EmbeddingProvider};
use cidx_indexer::{
    CommitSelection, IndexStats, IndexerOptions, OperationKind, ProgressFn, ProjectConfig,
    ProjectIndexer, ProjectLayout, TemporalIndexer, TemporalProgress,
};
use cidx_protocol::ProgressEvent;
use cidx_query::{CacheConfig, QueryEngine, QueryEngineConfig, QueryRequest, QueryResponse};
use cidx_vector_store::CollectionStore;
use lru::LruCache;
use serde_json::json;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

const QUERY_CACHE_ENTRIES: usize = 128;

#[derive(Clone)]
pub struct ServiceConfig {
    pub layout: ProjectLayout,
    pub config: ProjectConfig,
    pub sessions: SessionSettings,
}

/// Outcome of an index request.
pub enum IndexStart {
    /// Indexing started; the receiver resolves when the run finishes.
    Started(oneshot::Receiver<std::result::Result<IndexStats, String>>),
    /// Another indexing thread is already running for this project.
    AlreadyRunning,
}

#[derive(Default)]
struct IndexingSlot {
    handle: Option<tokio::task::JoinHandle<()>>,
    cancel: Option<CancellationToken>,
}

/// Long-lived per-project service: owns the warm query engine, the MCP
/// session registry, and the single indexing thread.
pub struct DaemonService {
    layout: ProjectLayout,
    config: ProjectConfig,
    provider: Arc<dyn EmbeddingProvider>,
    engine: QueryEngine,
    sessions: SessionRegistry,
    indexing: Mutex<IndexingSlot>,
    query_cache: Mutex<LruCache<String, QueryResponse>>,
}

impl DaemonService {
    pub fn new(service_config: ServiceConfig) -> Result<Arc<Self>> {
        let ServiceConfig {
            layout,
            config,
            sessions,
        } = service_config;

        let embedding = &config.embedding;
        let provider = provider_from_config(
            &embedding.provider,
            &embedding.model,
            embedding.dimension,
            embedding.base_url.as_deref(),
        )
        .map_err(|err| DaemonError::Protocol(err.to_string()))?;

        let engine = QueryEngine::new(
            QueryEngineConfig {
                root: layout.root().to_path_buf(),
                semantic_collection: layout
                    .semantic_collection_dir(&embedding.provider, &embedding.model),
                temporal_collection: layout
                    .temporal_collection_dir(&embedding.provider, &embedding.model),
                fts_dir: layout.fts_dir(),
                cache: CacheConfig::default(),
            },
            Arc::clone(&provider),
        );

        Ok(Arc::new(Self {
            layout,
            config,
            provider,
            engine,
            sessions: SessionRegistry::new(sessions),
            indexing: Mutex::new(IndexingSlot::default()),
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_ENTRIES).expect("non-zero cache size"),
            )),
        }))
    }

    #[must_use]
    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    #[must_use]
    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    /// Start an indexing run, enforcing the one-indexer-per-project
    /// invariant. The lock spans the whole check-and-start sequence: the
    /// alive check, the spawn, and the handle store happen under one
    /// guard, so two concurrent calls can never both start.
    pub fn start_indexing(
        self: &Arc<Self>,
        mode: OperationKind,
        temporal: bool,
        progress: mpsc::Sender<ProgressEvent>,
    ) -> IndexStart {
        let mut slot = self.indexing.lock().expect("indexing slot poisoned");

        if slot.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return IndexStart::AlreadyRunning;
        }

        let (done_tx, done_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let cancel_for_task = cancel.clone();
        let service = Arc::clone(self);
        let progress_fn = wrap_progress(progress);

        let handle = tokio::spawn(async move {
            let result = service
                .run_indexing(mode, temporal, progress_fn, cancel_for_task)
                .await;
            let outcome = match result {
                Ok(stats) => Ok(stats),
                Err(err) => {
                    log::error!("Indexing run failed: {err}");
                    Err(err.to_string())
                }
            };
            let _ = done_tx.send(outcome);

            // The finished thread clears its own handle under the same
            // lock that start checks.
            let mut slot = service.indexing.lock().expect("indexing slot poisoned");
            slot.handle = None;
            slot.cancel = None;
            drop(slot);
            service.invalidate_query_caches();
        });

        slot.handle = Some(handle);
        slot.cancel = Some(cancel);
        IndexStart::Started(done_rx)
    }

    async fn run_indexing(
        &self,
        mode: OperationKind,
        temporal: bool,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> std::result::Result<IndexStats, DaemonError> {
        let indexer = ProjectIndexer::new(
            self.layout.clone(),
            self.config.clone(),
            Arc::clone(&self.provider),
        )?;
        let mut stats = indexer
            .index(IndexerOptions::new(mode), Arc::clone(&progress), &cancel)
            .await?;

        if temporal && self.config.temporal_enabled && !cancel.is_cancelled() {
            let temporal_indexer = TemporalIndexer::new(
                self.layout.clone(),
                self.config.clone(),
                Arc::clone(&self.provider),
            )?;
            let temporal_stats = temporal_indexer
                .index_commits(CommitSelection::All, progress, &cancel)
                .await?;
            stats.merge(&temporal_stats);
        }

        Ok(stats)
    }

    #[must_use]
    pub fn is_indexing(&self) -> bool {
        self.indexing
            .lock()
            .expect("indexing slot poisoned")
            .handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Signal the running indexer, if any, to drain and commit.
    pub fn cancel_indexing(&self) {
        let slot = self.indexing.lock().expect("indexing slot poisoned");
        if let Some(cancel) = &slot.cancel {
            cancel.cancel();
        }
    }

    /// Execute a query of the given kind with a warm result cache.
    pub async fn query(&self, kind: &str, request: QueryRequest) -> Result<QueryResponse> {
        let cache_key = format!("{kind}:{}", serde_json::to_string(&request)?);
        if let Some(cached) = self
            .query_cache
            .lock()
            .expect("query cache poisoned")
            .get(&cache_key)
            .cloned()
        {
            log::debug!("Query cache hit for {kind}");
            return Ok(cached);
        }

        let response = match kind {
            "semantic" => self.engine.semantic(&request).await?,
            "fts" => self.engine.fts(&request).await?,
            "hybrid" => self.engine.hybrid(&request).await?,
            "temporal" => self.engine.temporal(&request).await?,
            other => {
                return Err(DaemonError::Protocol(format!(
                    "unknown query kind '{other}'"
                )))
            }
        };

        self.query_cache
            .lock()
            .expect("query cache poisoned")
            .put(cache_key, response.clone());
        Ok(response)
    }

    /// Drop warm caches: query results and payload-cache handles.
    pub fn clear_cache(&self) {
        self.engine.clear_cache();
        self.query_cache.lock().expect("query cache poisoned").clear();
        log::info!("Daemon caches cleared");
    }

    fn invalidate_query_caches(&self) {
        self.query_cache.lock().expect("query cache poisoned").clear();
    }

    /// Aggregate status for the CLI and the index-status API.
    pub fn status(&self) -> serde_json::Value {
        let embedding = &self.config.embedding;
        let semantic_dir = self
            .layout
            .semantic_collection_dir(&embedding.provider, &embedding.model);
        let temporal_dir = self
            .layout
            .temporal_collection_dir(&embedding.provider, &embedding.model);
        let fts_dir = self.layout.fts_dir();

        let semantic = match CollectionStore::open(&semantic_dir) {
            Ok(store) => json!({
                "exists": true,
                "last_updated": store.meta().created_at.clone(),
                "document_count": store.count_points(),
                "size_bytes": dir_size(&semantic_dir),
            }),
            Err(_) => json!({"exists": false, "document_count": 0, "size_bytes": 0}),
        };

        let fts_exists = cidx_fts::FtsIndex::meta_exists(&fts_dir);
        let fts = json!({
            "exists": fts_exists,
            "document_count": cidx_fts::doc_count_in_dir(&fts_dir).unwrap_or(0),
            "size_bytes": dir_size(&fts_dir),
        });

        let temporal_progress =
            TemporalProgress::load(&self.layout.temporal_progress_path()).unwrap_or_default();
        let temporal_exists = temporal_dir.join("collection_meta.json").exists();
        let temporal = json!({
            "exists": temporal_exists,
            "completed_commits": temporal_progress.completed_commits.len(),
            "files_processed": temporal_progress.files_processed,
            "indexed_branches": temporal_progress.indexed_branches,
            "size_bytes": dir_size(&temporal_dir),
        });

        // SCIP artifacts are consumed opaque; only presence is reported.
        let scip_path = self.layout.meta_dir().join("scip").join("index.scip");
        let scip = json!({
            "exists": scip_path.exists(),
            "size_bytes": scip_path.metadata().map(|m| m.len()).unwrap_or(0),
        });

        let temporal_status = temporal_format_status(temporal_exists, &temporal_progress);

        json!({
            "project": self.layout.root().display().to_string(),
            "provider": embedding.provider,
            "model": embedding.model,
            "indexing": self.is_indexing(),
            "sessions": self.sessions.len(),
            "semantic": semantic,
            "fts": fts,
            "temporal": temporal,
            "scip": scip,
            "temporal_status": temporal_status,
        })
    }
}

/// v1 temporal layouts predate durable blob tracking and cannot be
/// upgraded in place; the migration path is a clear reindex.
fn temporal_format_status(
    collection_exists: bool,
    progress: &TemporalProgress,
) -> serde_json::Value {
    if !collection_exists {
        return json!({
            "format": "none",
            "file_count": 0,
            "needs_reindex": false,
            "message": "no temporal index",
        });
    }
    if progress.fingerprint.is_none() {
        return json!({
            "format": "v1",
            "file_count": progress.files_processed,
            "needs_reindex": true,
            "message": "legacy temporal index; run `cidx index --clear --temporal` to rebuild",
        });
    }
    json!({
        "format": "v2",
        "file_count": progress.files_processed,
        "needs_reindex": false,
        "message": "temporal index up to date",
    })
}

/// Wrap the client-side progress channel as the indexer callback. Events
/// already carry plain strings (RPC-safe); a gone or slow consumer is
/// logged and ignored so it can never take down the indexing thread.
fn wrap_progress(tx: mpsc::Sender<ProgressEvent>) -> ProgressFn {
    Arc::new(move |event: ProgressEvent| {
        if let Err(err) = tx.try_send(event) {
            log::debug!("Dropping progress event (consumer unavailable): {err}");
        }
    })
}

fn dir_size(dir: &Path) -> u64 {
    fn walk(dir: &Path, total: &mut u64) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(&path, total);
            } else if let Ok(meta) = entry.metadata() {
                *total += meta.len();
            }
        }
    }
    let mut total = 0;
    walk(dir, &mut total);
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn stub_service(root: &Path) -> Arc<DaemonService> {
        let mut config = ProjectConfig::default();
        config.embedding.provider = "stub".to_string();
        config.embedding.model = "stub-64d".to_string();
        config.embedding.dimension = 64;
        config.workers = 2;
        DaemonService::new(ServiceConfig {
            layout: ProjectLayout::new(root),
            config,
            sessions: SessionSettings::default(),
        })
        .unwrap()
    }

    fn progress_sink() -> mpsc::Sender<ProgressEvent> {
        let (tx, mut rx) = mpsc::channel(256);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        tx
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn duplicate_indexer_is_rejected() {
        let tmp = TempDir::new().unwrap();
        for i in 0..20 {
            std::fs::write(
                tmp.path().join(format!("f{i}.rs")),
                format!("fn f{i}() {{ /* body {i} */ }}\n"),
            )
            .unwrap();
        }
        let service = stub_service(tmp.path());

        let first = service.start_indexing(OperationKind::Clear, false, progress_sink());
        let second = service.start_indexing(OperationKind::Incremental, false, progress_sink());

        let (started, already): (Vec<bool>, Vec<bool>) = match (&first, &second) {
            (IndexStart::Started(_), IndexStart::AlreadyRunning) => (vec![true], vec![true]),
            (IndexStart::AlreadyRunning, IndexStart::Started(_)) => (vec![true], vec![true]),
            _ => (vec![], vec![]),
        };
        assert_eq!(started.len(), 1, "exactly one call must start");
        assert_eq!(already.len(), 1, "exactly one call must be rejected");

        // The started run completes and clears its handle.
        for start in [first, second] {
            if let IndexStart::Started(done) = start {
                let outcome = done.await.unwrap();
                assert!(outcome.is_ok());
            }
        }
        assert!(!service.is_indexing());

        // A later call can start again.
        match service.start_indexing(OperationKind::Incremental, false, progress_sink()) {
            IndexStart::Started(done) => {
                done.await.unwrap().unwrap();
            }
            IndexStart::AlreadyRunning => panic!("no indexer should be running"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn query_round_trip_through_service() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("auth.rs"), "fn verify_token(token: &str) {}\n").unwrap();
        let service = stub_service(tmp.path());

        match service.start_indexing(OperationKind::Clear, false, progress_sink()) {
            IndexStart::Started(done) => {
                done.await.unwrap().unwrap();
            }
            IndexStart::AlreadyRunning => panic!("unexpected concurrent indexer"),
        }

        let response = service
            .query("semantic", QueryRequest::new("verify token", 5))
            .await
            .unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].path, "auth.rs");

        // Second identical query hits the warm cache.
        let cached = service
            .query("semantic", QueryRequest::new("verify token", 5))
            .await
            .unwrap();
        assert_eq!(cached.results.len(), 1);

        let fts = service
            .query("fts", QueryRequest::new("verify_token", 5))
            .await
            .unwrap();
        assert_eq!(fts.results.len(), 1);

        let hybrid = service
            .query("hybrid", QueryRequest::new("verify token", 5))
            .await
            .unwrap();
        assert!(!hybrid.results.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn status_reports_index_surfaces() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.rs"), "fn a() {}\n").unwrap();
        let service = stub_service(tmp.path());

        let before = service.status();
        assert_eq!(before["semantic"]["exists"], serde_json::json!(false));
        assert_eq!(before["temporal_status"]["format"], serde_json::json!("none"));

        match service.start_indexing(OperationKind::Clear, false, progress_sink()) {
            IndexStart::Started(done) => {
                done.await.unwrap().unwrap();
            }
            IndexStart::AlreadyRunning => panic!("unexpected concurrent indexer"),
        }

        let after = service.status();
        assert_eq!(after["semantic"]["exists"], serde_json::json!(true));
        assert_eq!(after["semantic"]["document_count"], serde_json::json!(1));
        assert_eq!(after["fts"]["exists"], serde_json::json!(true));
        assert_eq!(after["indexing"], serde_json::json!(false));
    }
}
