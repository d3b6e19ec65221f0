use cidx_embedding::{EmbeddingProvider, StubProvider};
use cidx_indexer::{
    FileWalker, IndexerOptions, OperationKind, ProgressiveMetadata, ProjectConfig,
    ProjectIndexer, ProjectLayout,
};
use cidx_protocol::ProgressEvent;
use cidx_vector_store::{keys, CollectionStore, SearchOptions};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const DIM: usize = 64;

fn project_config() -> ProjectConfig {
    let mut config = ProjectConfig::default();
    config.embedding.provider = "stub".to_string();
    config.embedding.model = "stub-64d".to_string();
    config.embedding.dimension = DIM;
    config.workers = 2;
    config.batch_files = 4;
    config
}

fn indexer(root: &Path, config: ProjectConfig) -> ProjectIndexer {
    ProjectIndexer::new(
        ProjectLayout::new(root),
        config,
        Arc::new(StubProvider::new("stub-64d", DIM)),
    )
    .unwrap()
}

async fn run(indexer: &ProjectIndexer, mode: OperationKind) -> Vec<ProgressEvent> {
    let events: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    indexer
        .index(
            IndexerOptions::new(mode),
            Arc::new(move |event| sink.lock().unwrap().push(event)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    let collected = events.lock().unwrap().clone();
    collected
}

fn collection_dir(root: &Path) -> std::path::PathBuf {
    ProjectLayout::new(root).semantic_collection_dir("stub", "stub-64d")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn index_then_search_then_modify_then_reconcile() {
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir_all(tmp.path().join("src")).unwrap();
    std::fs::write(
        tmp.path().join("src/auth.rs"),
        "fn verify_token(token: &str) -> bool { token.len() > 8 }\n",
    )
    .unwrap();
    std::fs::write(
        tmp.path().join("src/db.rs"),
        "fn open_pool(url: &str) -> Pool { Pool::connect(url) }\n",
    )
    .unwrap();

    let indexer = indexer(tmp.path(), project_config());
    let events = run(&indexer, OperationKind::Clear).await;

    // Setup messages come through as zero-total events, progress with
    // counters and a parsable rate.
    assert!(events.iter().any(|e| e.is_status()));
    let progress: Vec<&ProgressEvent> = events.iter().filter(|e| !e.is_status()).collect();
    assert_eq!(progress.len(), 2);
    assert!(progress.iter().all(|e| e.total == 2));
    assert!(progress.last().unwrap().rate().is_some());

    // Search lands on the right chunk.
    let store = CollectionStore::open(&collection_dir(tmp.path())).unwrap();
    assert_eq!(store.count_points(), 2);
    let provider = StubProvider::new("stub-64d", DIM);
    let query = provider.embed("verify token").await.unwrap();
    let hits = store
        .search(&query, 5, None, SearchOptions::default())
        .unwrap();
    assert_eq!(hits[0].payload.get_str(keys::PATH), Some("src/auth.rs"));

    // Modify one file, delete the other; reconcile converges the
    // collection to the disk state.
    std::fs::write(
        tmp.path().join("src/auth.rs"),
        "fn verify_token(token: &str) -> bool { token.len() > 16 }\n",
    )
    .unwrap();
    // Ensure the mtime moves even on coarse-grained filesystems.
    filetime_touch(&tmp.path().join("src/auth.rs"));
    std::fs::remove_file(tmp.path().join("src/db.rs")).unwrap();

    run(&indexer, OperationKind::Reconcile).await;
    let store = CollectionStore::open(&collection_dir(tmp.path())).unwrap();
    let points = store.iter_points().unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].payload.get_str(keys::PATH), Some("src/auth.rs"));
    assert!(points[0]
        .payload
        .get_str(keys::CONTENT)
        .unwrap()
        .contains("16"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn override_filters_shape_the_walk() {
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir_all(tmp.path().join("gen")).unwrap();
    std::fs::write(tmp.path().join("keep.rs"), "fn keep() {}\n").unwrap();
    std::fs::write(tmp.path().join("gen/out.rs"), "fn generated() {}\n").unwrap();
    std::fs::write(tmp.path().join("notes.cbl"), "COBOL SOURCE\n").unwrap();

    let mut config = project_config();
    config.overrides.add_exclude_dirs = vec!["gen".to_string()];
    config.overrides.add_extensions = vec!["cbl".to_string()];

    let walker = FileWalker::new(tmp.path(), &config).unwrap();
    let files: Vec<String> = walker
        .walk()
        .unwrap()
        .into_iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    assert_eq!(files, vec!["keep.rs".to_string(), "notes.cbl".to_string()]);

    let indexer = indexer(tmp.path(), config);
    run(&indexer, OperationKind::Clear).await;
    let store = CollectionStore::open(&collection_dir(tmp.path())).unwrap();
    assert_eq!(store.count_points(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interrupted_session_resumes_where_it_left_off() {
    let tmp = TempDir::new().unwrap();
    for i in 0..10 {
        std::fs::write(
            tmp.path().join(format!("f{i}.rs")),
            format!("fn f{i}() {{ let value = {i}; }}\n"),
        )
        .unwrap();
    }

    let indexer = indexer(tmp.path(), project_config());
    run(&indexer, OperationKind::Clear).await;

    // Simulate a crash that lost the last seven files' completion marks.
    let layout = ProjectLayout::new(tmp.path());
    let mut metadata = ProgressiveMetadata::load(&layout.progress_path())
        .unwrap()
        .unwrap();
    let keep: Vec<String> = metadata.completed_files.iter().take(3).cloned().collect();
    metadata.completed_files = keep.into_iter().collect();
    metadata.save(&layout.progress_path()).unwrap();

    let events = run(&indexer, OperationKind::Resume).await;
    let first = events.iter().find(|e| !e.is_status()).unwrap();
    assert_eq!(first.current, 4);
    assert_eq!(first.total, 10);

    // The resume message names the prior completion count.
    assert!(events
        .iter()
        .any(|e| e.is_status() && e.info.contains("3 files already processed")));

    let store = CollectionStore::open(&collection_dir(tmp.path())).unwrap();
    assert_eq!(store.count_points(), 10);
}

/// Bump a file's mtime by a second so change detection cannot miss it.
fn filetime_touch(path: &Path) {
    let metadata = std::fs::metadata(path).unwrap();
    let modified = metadata.modified().unwrap() + std::time::Duration::from_secs(2);
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(modified).unwrap();
}
