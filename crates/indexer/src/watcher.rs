use crate::error::{IndexerError, Result};
use crate::git::GitRepo;
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Changes observed on a repository's git refs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefsEvent {
    /// The watched branch ref moved: new commits may be reachable.
    NewCommits { branch: String },
    /// `.git/HEAD` changed to a different branch.
    BranchSwitched { from: String, to: String },
}

/// Watches `.git/refs/heads/<branch>` for commits and `.git/HEAD` for
/// branch switches via inotify, falling back to 5-second polling when the
/// platform or filesystem cannot deliver notifications.
#[derive(Debug)]
pub struct RefsWatcher {
    events: mpsc::Receiver<RefsEvent>,
    _inotify: Option<RecommendedWatcher>,
}

impl RefsWatcher {
    /// Start watching. The watcher runs until `cancel` fires; events are
    /// consumed via [`RefsWatcher::recv`].
    pub async fn start(root: &Path, branch: &str, cancel: CancellationToken) -> Result<Self> {
        let git = GitRepo::new(root);
        if !git.is_repo().await {
            return Err(IndexerError::Git(format!(
                "{} is not a git repository",
                root.display()
            )));
        }

        let ref_path = git.branch_ref_path(branch);
        let head_path = git.head_path();
        let (event_tx, events) = mpsc::channel(64);

        let inotify = match Self::try_inotify(&ref_path, &head_path) {
            Ok((watcher, mut raw_rx)) => {
                let tx = event_tx.clone();
                let branch = branch.to_string();
                let state_paths = (ref_path.clone(), head_path.clone());
                let cancel_inotify = cancel.clone();
                tokio::spawn(async move {
                    let mut state = RefState::read(&state_paths.0, &state_paths.1);
                    loop {
                        tokio::select! {
                            () = cancel_inotify.cancelled() => break,
                            event = raw_rx.recv() => {
                                if event.is_none() {
                                    break;
                                }
                                emit_changes(
                                    &mut state,
                                    &state_paths.0,
                                    &state_paths.1,
                                    &branch,
                                    &tx,
                                )
                                .await;
                            }
                        }
                    }
                });
                Some(watcher)
            }
            Err(err) => {
                log::warn!(
                    "inotify unavailable for {} ({err}); falling back to {}s polling",
                    root.display(),
                    POLL_INTERVAL.as_secs()
                );
                let tx = event_tx.clone();
                let branch = branch.to_string();
                let cancel_poll = cancel.clone();
                let (ref_path, head_path) = (ref_path.clone(), head_path.clone());
                tokio::spawn(async move {
                    let mut state = RefState::read(&ref_path, &head_path);
                    let mut ticker = tokio::time::interval(POLL_INTERVAL);
                    loop {
                        tokio::select! {
                            () = cancel_poll.cancelled() => break,
                            _ = ticker.tick() => {
                                emit_changes(&mut state, &ref_path, &head_path, &branch, &tx)
                                    .await;
                            }
                        }
                    }
                });
                None
            }
        };

        Ok(Self {
            events,
            _inotify: inotify,
        })
    }

    pub async fn recv(&mut self) -> Option<RefsEvent> {
        self.events.recv().await
    }

    fn try_inotify(
        ref_path: &Path,
        head_path: &Path,
    ) -> std::result::Result<
        (RecommendedWatcher, mpsc::Receiver<notify::Result<Event>>),
        notify::Error,
    > {
        let (tx, rx) = mpsc::channel(64);
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.blocking_send(res);
            },
            NotifyConfig::default(),
        )?;
        // Watch the containing directories: ref files are replaced by
        // rename, which drops watches on the files themselves.
        let ref_dir = ref_path.parent().map(Path::to_path_buf).unwrap_or_default();
        let head_dir = head_path.parent().map(Path::to_path_buf).unwrap_or_default();
        watcher.watch(&ref_dir, RecursiveMode::NonRecursive)?;
        if head_dir != ref_dir {
            watcher.watch(&head_dir, RecursiveMode::NonRecursive)?;
        }
        Ok((watcher, rx))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RefState {
    ref_content: Option<String>,
    head_content: Option<String>,
}

impl RefState {
    fn read(ref_path: &Path, head_path: &Path) -> Self {
        Self {
            ref_content: read_trimmed(ref_path),
            head_content: read_trimmed(head_path),
        }
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|raw| raw.trim().to_string())
}

/// Parse the branch out of a symbolic HEAD line like
/// `ref: refs/heads/main`.
fn branch_of_head(head_content: &str) -> Option<String> {
    head_content
        .strip_prefix("ref:")
        .map(str::trim)
        .and_then(|r| r.strip_prefix("refs/heads/"))
        .map(str::to_string)
}

async fn emit_changes(
    state: &mut RefState,
    ref_path: &PathBuf,
    head_path: &PathBuf,
    branch: &str,
    tx: &mpsc::Sender<RefsEvent>,
) {
    let next = RefState::read(ref_path, head_path);

    if next.head_content != state.head_content {
        let from = state
            .head_content
            .as_deref()
            .and_then(branch_of_head)
            .unwrap_or_default();
        if let Some(to) = next.head_content.as_deref().and_then(branch_of_head) {
            if to != from {
                let _ = tx
                    .send(RefsEvent::BranchSwitched {
                        from,
                        to,
                    })
                    .await;
            }
        }
    }

    if next.ref_content != state.ref_content && next.ref_content.is_some() {
        let _ = tx
            .send(RefsEvent::NewCommits {
                branch: branch.to_string(),
            })
            .await;
    }

    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn head_parsing_extracts_branch() {
        assert_eq!(
            branch_of_head("ref: refs/heads/main"),
            Some("main".to_string())
        );
        assert_eq!(
            branch_of_head("ref: refs/heads/feature/x"),
            Some("feature/x".to_string())
        );
        // Detached HEAD holds a bare hash.
        assert_eq!(branch_of_head("a1b2c3d4"), None);
    }

    #[tokio::test]
    async fn emit_detects_new_commits_and_branch_switch() {
        let tmp = tempfile::TempDir::new().unwrap();
        let git_dir = tmp.path().join(".git/refs/heads");
        std::fs::create_dir_all(&git_dir).unwrap();
        let ref_path = git_dir.join("main");
        let head_path = tmp.path().join(".git/HEAD");
        std::fs::write(&ref_path, "aaaa\n").unwrap();
        std::fs::write(&head_path, "ref: refs/heads/main\n").unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let mut state = RefState::read(&ref_path, &head_path);

        // A commit moves the ref.
        std::fs::write(&ref_path, "bbbb\n").unwrap();
        emit_changes(&mut state, &ref_path, &head_path, "main", &tx).await;
        assert_eq!(
            rx.recv().await,
            Some(RefsEvent::NewCommits {
                branch: "main".to_string()
            })
        );

        // A branch switch rewrites HEAD.
        std::fs::write(&head_path, "ref: refs/heads/dev\n").unwrap();
        emit_changes(&mut state, &ref_path, &head_path, "main", &tx).await;
        assert_eq!(
            rx.recv().await,
            Some(RefsEvent::BranchSwitched {
                from: "main".to_string(),
                to: "dev".to_string()
            })
        );

        // No change, no event.
        emit_changes(&mut state, &ref_path, &head_path, "main", &tx).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn non_repo_cannot_be_watched() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = RefsWatcher::start(tmp.path(), "main", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::Git(_)));
    }
}
