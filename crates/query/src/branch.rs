use cidx_vector_store::{keys, Payload};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Git-branch-aware result filter.
///
/// A result passes when (i) its file exists in the current branch's
/// working tree, or (ii) its recorded commit is reachable from HEAD. When
/// git is unavailable every result passes.
pub struct BranchContext {
    root: PathBuf,
    available: bool,
    branch: Option<String>,
    reachable: HashSet<String>,
}

impl BranchContext {
    /// Resolve the current branch and its reachable commit set.
    pub async fn resolve(root: &Path) -> Self {
        let Some(branch) = git_output(root, &["rev-parse", "--abbrev-ref", "HEAD"]).await else {
            log::debug!(
                "git unavailable under {}; branch filtering disabled",
                root.display()
            );
            return Self::unavailable(root);
        };

        let reachable = match git_output(root, &["rev-list", "HEAD"]).await {
            Some(out) => out.lines().map(str::to_string).collect(),
            None => HashSet::new(),
        };

        Self {
            root: root.to_path_buf(),
            available: true,
            branch: Some(branch.trim().to_string()),
            reachable,
        }
    }

    #[must_use]
    pub fn unavailable(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            available: false,
            branch: None,
            reachable: HashSet::new(),
        }
    }

    #[must_use]
    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.available
    }

    #[must_use]
    pub fn allows(&self, payload: &Payload) -> bool {
        if !self.available {
            return true;
        }
        if let Some(path) = payload.path_or_file_path() {
            if self.root.join(path).exists() {
                return true;
            }
        }
        if let Some(commit) = payload.get_str(keys::COMMIT_HASH) {
            return self.reachable.contains(commit);
        }
        false
    }
}

/// Blob hashes present in one commit's tree; used by `at_commit` filters.
pub(crate) async fn commit_blob_set(root: &Path, commit: &str) -> Option<HashSet<String>> {
    let out = git_output(root, &["ls-tree", "-r", commit]).await?;
    let mut blobs = HashSet::new();
    for line in out.lines() {
        let Some((meta, _path)) = line.split_once('\t') else {
            continue;
        };
        let mut fields = meta.split_whitespace();
        let (Some(_mode), Some(kind), Some(hash)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if kind == "blob" {
            blobs.insert(hash.to_string());
        }
    }
    Some(blobs)
}

pub(crate) async fn git_output(root: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(args)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_repo_passes_everything() {
        let tmp = tempfile::TempDir::new().unwrap();
        let context = BranchContext::resolve(tmp.path()).await;
        // Outside a repo, `rev-parse` fails and filtering is disabled.
        assert!(!context.is_available());

        let mut payload = Payload::new();
        payload.insert(keys::PATH, "anything.rs");
        assert!(context.allows(&payload));
    }

    #[tokio::test]
    async fn working_tree_files_pass_when_available() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("present.rs"), "fn a() {}").unwrap();

        let context = BranchContext {
            root: tmp.path().to_path_buf(),
            available: true,
            branch: Some("main".to_string()),
            reachable: HashSet::from(["abc123".to_string()]),
        };

        let mut present = Payload::new();
        present.insert(keys::PATH, "present.rs");
        assert!(context.allows(&present));

        let mut gone = Payload::new();
        gone.insert(keys::PATH, "deleted.rs");
        assert!(!context.allows(&gone));

        // A deleted file whose commit is still reachable passes.
        let mut reachable = Payload::new();
        reachable.insert(keys::FILE_PATH, "deleted.rs");
        reachable.insert(keys::COMMIT_HASH, "abc123");
        assert!(context.allows(&reachable));

        let mut unreachable = Payload::new();
        unreachable.insert(keys::FILE_PATH, "deleted.rs");
        unreachable.insert(keys::COMMIT_HASH, "zzz999");
        assert!(!context.allows(&unreachable));
    }
}
