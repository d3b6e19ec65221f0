use crate::display::{print_results, EventDisplay, SlotDisplay};
use anyhow::{anyhow, bail, Context, Result};
use cidx_daemon::{run_server, DaemonClient, DaemonService, ServiceConfig, SessionSettings};
use cidx_embedding::provider_from_config;
use cidx_indexer::{
    CommitSelection, IndexerOptions, OperationKind, ProgressFn, ProjectConfig, ProjectIndexer,
    ProjectLayout, RefsEvent, RefsWatcher, TemporalIndexer,
};
use cidx_protocol::{exit_codes, Method};
use cidx_query::{QueryFilters, QueryRequest, QueryResponse, TimeRange};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub fn init(root: &Path, force: bool) -> Result<i32> {
    let layout = ProjectLayout::new(root);
    let config_path = layout.config_path();
    if config_path.exists() && !force {
        bail!(
            "{} already exists; use --force to overwrite",
            config_path.display()
        );
    }
    let config = ProjectConfig::default();
    config.save(&layout)?;
    println!("Initialized {}", config_path.display());
    Ok(exit_codes::SUCCESS)
}

pub async fn start(root: &Path, foreground: bool) -> Result<i32> {
    if foreground {
        return run_daemon(root).await;
    }
    let layout = ProjectLayout::new(root);
    DaemonClient::connect_or_start(&layout).await?;
    println!("Daemon running for {}", root.display());
    Ok(exit_codes::SUCCESS)
}

async fn run_daemon(root: &Path) -> Result<i32> {
    let layout = ProjectLayout::new(root);
    let config = ProjectConfig::load(&layout)
        .with_context(|| format!("no project config under {}; run `cidx init`", root.display()))?;

    let service = DaemonService::new(ServiceConfig {
        layout,
        config,
        sessions: SessionSettings::default(),
    })?;
    let evictor = service.sessions().start_evictor();
    let cache_evictor = service
        .engine()
        .cache()
        .start_evictor(Duration::from_secs(60));

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received; shutting down daemon");
            cancel_on_signal.cancel();
        }
    });

    run_server(service, cancel).await?;
    cache_evictor.stop().await;
    evictor.stop().await;
    Ok(exit_codes::SUCCESS)
}

pub async fn stop(root: &Path) -> Result<i32> {
    let layout = ProjectLayout::new(root);
    match DaemonClient::connect(&layout.socket_path()).await {
        Ok(mut client) => {
            client.shutdown().await?;
            println!("Daemon stopped.");
            Ok(exit_codes::SUCCESS)
        }
        Err(_) => {
            println!("Daemon is not running.");
            Ok(exit_codes::SUCCESS)
        }
    }
}

pub struct IndexArgs {
    pub clear: bool,
    pub reconcile: bool,
    pub resume: bool,
    pub temporal: bool,
    pub local: bool,
}

impl IndexArgs {
    fn mode(&self) -> OperationKind {
        if self.clear {
            OperationKind::Clear
        } else if self.reconcile {
            OperationKind::Reconcile
        } else if self.resume {
            OperationKind::Resume
        } else {
            OperationKind::Incremental
        }
    }
}

pub async fn index(root: &Path, args: &IndexArgs, quiet: bool) -> Result<i32> {
    if args.local {
        return index_local(root, args, quiet).await;
    }

    let layout = ProjectLayout::new(root);
    let mut client = DaemonClient::connect_or_start(&layout).await?;
    let display = Arc::new(Mutex::new(EventDisplay::new(quiet)));
    let display_for_events = Arc::clone(&display);

    let params = serde_json::json!({
        "mode": args.mode(),
        "temporal": args.temporal,
    });
    let call = client.call(Method::Index, params, None, move |event| {
        display_for_events
            .lock()
            .expect("display poisoned")
            .handle(&event);
    });

    tokio::select! {
        result = call => {
            display.lock().expect("display poisoned").finish();
            let result = result?;
            match result["status"].as_str() {
                Some("already_running") => {
                    println!("An indexing run is already in progress for this project.");
                }
                _ => {
                    if !quiet {
                        println!("Indexing finished.");
                    }
                }
            }
            Ok(exit_codes::SUCCESS)
        }
        _ = tokio::signal::ctrl_c() => {
            // Dropping the connection tells the daemon to drain and commit.
            display.lock().expect("display poisoned").finish();
            eprintln!("Interrupted; daemon is committing partial state.");
            Ok(exit_codes::FAILURE)
        }
    }
}

/// Run the indexer in-process, with the per-slot display fed from the
/// tracker. Used when the daemon is bypassed deliberately.
async fn index_local(root: &Path, args: &IndexArgs, quiet: bool) -> Result<i32> {
    let layout = ProjectLayout::new(root);
    let config = ProjectConfig::load(&layout)
        .with_context(|| format!("no project config under {}; run `cidx init`", root.display()))?;
    let embedding = config.embedding.clone();
    let provider = provider_from_config(
        &embedding.provider,
        &embedding.model,
        embedding.dimension,
        embedding.base_url.as_deref(),
    )?;

    let indexer = ProjectIndexer::new(layout.clone(), config.clone(), Arc::clone(&provider))?;
    let slot_display = if quiet {
        None
    } else {
        Some(SlotDisplay::start(indexer.tracker()))
    };

    let display = Arc::new(Mutex::new(EventDisplay::new(quiet)));
    let display_for_events = Arc::clone(&display);
    let progress: ProgressFn = Arc::new(move |event| {
        display_for_events
            .lock()
            .expect("display poisoned")
            .handle(&event);
    });

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_on_signal.cancel();
        }
    });

    let stats = indexer
        .index(IndexerOptions::new(args.mode()), Arc::clone(&progress), &cancel)
        .await?;

    if args.temporal && config.temporal_enabled && !cancel.is_cancelled() {
        let temporal = TemporalIndexer::new(layout, config, provider)?;
        temporal
            .index_commits(CommitSelection::All, progress, &cancel)
            .await?;
    }

    if let Some(slot_display) = slot_display {
        slot_display.stop().await;
    }
    display.lock().expect("display poisoned").finish();

    if stats.cancelled {
        eprintln!("Indexing interrupted; partial state committed.");
        return Ok(exit_codes::FAILURE);
    }
    if !quiet {
        println!(
            "Indexed {} files ({} chunks, {} failed) in {} ms",
            stats.files, stats.chunks, stats.failed_files, stats.time_ms
        );
    }
    Ok(exit_codes::SUCCESS)
}

#[allow(clippy::struct_excessive_bools)]
pub struct QueryArgs {
    pub query: String,
    pub kind: String,
    pub limit: usize,
    pub min_score: Option<f32>,
    pub language: Option<String>,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    pub include_extensions: Vec<String>,
    pub exclude_extensions: Vec<String>,
    pub case_sensitive: bool,
    pub regex: bool,
    pub at_commit: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
}

impl QueryArgs {
    fn request(&self) -> Result<QueryRequest> {
        let time_range = match (&self.since, &self.until) {
            (None, None) => None,
            (since, until) => Some(TimeRange {
                start: since
                    .clone()
                    .unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string()),
                end: until
                    .clone()
                    .unwrap_or_else(|| "9999-12-31T23:59:59Z".to_string()),
            }),
        };
        Ok(QueryRequest {
            query: self.query.clone(),
            limit: self.limit,
            min_score: self.min_score,
            filters: QueryFilters {
                include_extensions: self.include_extensions.clone(),
                exclude_extensions: self.exclude_extensions.clone(),
                include_paths: self.include_paths.clone(),
                exclude_paths: self.exclude_paths.clone(),
                language: self.language.clone(),
                at_commit: self.at_commit.clone(),
                time_range,
                case_sensitive: self.case_sensitive,
                regex: self.regex,
            },
        })
    }
}

pub async fn query(root: &Path, args: &QueryArgs, quiet: bool) -> Result<i32> {
    if !matches!(args.kind.as_str(), "semantic" | "fts" | "hybrid" | "temporal") {
        bail!("unknown query kind '{}'", args.kind);
    }
    let layout = ProjectLayout::new(root);
    let mut client = DaemonClient::connect_or_start(&layout).await?;

    let request = args.request()?;
    let mut params = serde_json::to_value(&request)?;
    params["kind"] = serde_json::Value::String(args.kind.clone());

    let raw = client.call(Method::Query, params, None, |_| {}).await?;
    let response: QueryResponse = serde_json::from_value(raw)?;

    print_results(&response.results, quiet);
    if !quiet {
        println!(
            "{} results in {} ms",
            response.results.len(),
            response.timing_ms
        );
    }
    Ok(exit_codes::SUCCESS)
}

pub async fn status(root: &Path) -> Result<i32> {
    let layout = ProjectLayout::new(root);
    let mut client = DaemonClient::connect_or_start(&layout).await?;
    let status = client
        .call(Method::Status, serde_json::json!({}), None, |_| {})
        .await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(exit_codes::SUCCESS)
}

pub async fn watch(root: &Path, branch: Option<String>, quiet: bool) -> Result<i32> {
    let layout = ProjectLayout::new(root);
    let config = ProjectConfig::load(&layout)
        .with_context(|| format!("no project config under {}; run `cidx init`", root.display()))?;
    let embedding = config.embedding.clone();
    let provider = provider_from_config(
        &embedding.provider,
        &embedding.model,
        embedding.dimension,
        embedding.base_url.as_deref(),
    )?;
    let temporal = TemporalIndexer::new(layout.clone(), config, provider)?;

    let git = cidx_indexer::GitRepo::new(root);
    let mut branch = match branch {
        Some(branch) => branch,
        None => git
            .current_branch()
            .await
            .map_err(|err| anyhow!("cannot resolve current branch: {err}"))?,
    };

    let display = Arc::new(Mutex::new(EventDisplay::new(quiet)));
    let progress: ProgressFn = {
        let display = Arc::clone(&display);
        Arc::new(move |event| {
            display.lock().expect("display poisoned").handle(&event);
        })
    };

    let cancel = CancellationToken::new();

    // Catch up before watching so the in-memory commit set is current.
    temporal
        .catch_up_branch(&branch, Arc::clone(&progress), &cancel)
        .await?;

    let mut watcher = RefsWatcher::start(root, &branch, cancel.clone()).await?;
    if !quiet {
        println!("Watching branch '{branch}' for new commits (Ctrl-C to stop).");
    }

    let mut last_interrupt: Option<Instant> = None;
    loop {
        let mut switch_to: Option<String> = None;
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if signal.is_err() {
                    break;
                }
                if last_interrupt.is_some_and(|at| at.elapsed() < Duration::from_secs(1)) {
                    eprintln!("Forced exit.");
                    std::process::exit(exit_codes::FAILURE);
                }
                last_interrupt = Some(Instant::now());
                eprintln!("Stopping watch (press Ctrl-C again to force).");
                cancel.cancel();
            }
            event = watcher.recv() => {
                let Some(event) = event else { break };
                match event {
                    RefsEvent::NewCommits { branch: changed } => {
                        log::info!("New commits detected on {changed}");
                        temporal
                            .catch_up_branch(&changed, Arc::clone(&progress), &cancel)
                            .await?;
                        invalidate_daemon_caches(&layout).await;
                    }
                    RefsEvent::BranchSwitched { from, to } => {
                        log::info!("Branch switched {from} -> {to}; catching up");
                        temporal
                            .catch_up_branch(&to, Arc::clone(&progress), &cancel)
                            .await?;
                        invalidate_daemon_caches(&layout).await;
                        switch_to = Some(to);
                    }
                }
            }
        }
        if let Some(to) = switch_to {
            // Re-point the ref watch at the new branch.
            branch = to;
            watcher = RefsWatcher::start(root, &branch, cancel.clone()).await?;
        }
    }

    display.lock().expect("display poisoned").finish();
    Ok(exit_codes::SUCCESS)
}

/// Temporal data changed under the daemon; drop its warm caches.
async fn invalidate_daemon_caches(layout: &ProjectLayout) {
    if let Ok(mut client) = DaemonClient::connect(&layout.socket_path()).await {
        if let Err(err) = client
            .call(Method::ClearCache, serde_json::json!({}), None, |_| {})
            .await
        {
            log::debug!("Cache invalidation skipped: {err}");
        }
    }
}

pub fn fix_config(root: &Path) -> Result<i32> {
    let layout = ProjectLayout::new(root);
    let mut config = match ProjectConfig::load(&layout) {
        Ok(config) => config,
        Err(err) => {
            log::warn!("Config unreadable ({err}); rewriting defaults");
            ProjectConfig::default()
        }
    };
    let fixes = config.normalize();
    config.save(&layout)?;
    if fixes.is_empty() {
        println!("Config OK; nothing to fix.");
    } else {
        for fix in &fixes {
            println!("fixed: {fix}");
        }
        println!("Applied {} fixes to {}", fixes.len(), layout.config_path().display());
    }
    Ok(exit_codes::SUCCESS)
}

pub async fn uninstall(root: &Path, force: bool) -> Result<i32> {
    let layout = ProjectLayout::new(root);
    let meta_dir = layout.meta_dir();
    if !meta_dir.exists() {
        println!("Nothing to uninstall under {}", root.display());
        return Ok(exit_codes::SUCCESS);
    }

    if !force {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Remove {} and all index data?",
                meta_dir.display()
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(exit_codes::FAILURE);
        }
    }

    // Stop the daemon first so nothing holds the files we delete.
    if let Ok(mut client) = DaemonClient::connect(&layout.socket_path()).await {
        let _ = client.shutdown().await;
    }
    std::fs::remove_dir_all(&meta_dir)?;
    println!("Removed {}", meta_dir.display());
    Ok(exit_codes::SUCCESS)
}
