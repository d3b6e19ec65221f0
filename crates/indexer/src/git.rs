use crate::error::{IndexerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// One commit as selected for temporal indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub date: String,
    pub author_name: String,
    pub author_email: String,
}

/// Thin wrapper over the `git` binary for the plumbing the indexer needs:
/// commit listing, tree listing, and blob reads.
#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True when `root` is inside a git work tree.
    pub async fn is_repo(&self) -> bool {
        self.run(&["rev-parse", "--is-inside-work-tree"])
            .await
            .map(|out| out.trim() == "true")
            .unwrap_or(false)
    }

    pub async fn current_branch(&self) -> Result<String> {
        let out = self.run(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        Ok(out.trim().to_string())
    }

    pub async fn head_commit(&self) -> Result<String> {
        let out = self.run(&["rev-parse", "HEAD"]).await?;
        Ok(out.trim().to_string())
    }

    /// Commits reachable from `rev`, oldest first, with author metadata.
    pub async fn log_commits(&self, rev: &str, since: Option<&str>) -> Result<Vec<CommitInfo>> {
        let since_arg = since.map(|since| format!("--since={since}"));
        let mut args = vec![
            "log",
            "--reverse",
            "--date=iso-strict",
            "--format=%H%x1f%ad%x1f%an%x1f%ae",
        ];
        if let Some(since_arg) = since_arg.as_deref() {
            args.push(since_arg);
        }
        args.push(rev);
        let out = self.run(&args).await?;

        let mut commits = Vec::new();
        for line in out.lines() {
            let mut parts = line.split('\u{1f}');
            let (Some(hash), Some(date), Some(name), Some(email)) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            commits.push(CommitInfo {
                hash: hash.to_string(),
                date: date.to_string(),
                author_name: name.to_string(),
                author_email: email.to_string(),
            });
        }
        Ok(commits)
    }

    /// Metadata for a single commit.
    pub async fn commit_info(&self, hash: &str) -> Result<CommitInfo> {
        let out = self
            .run(&[
                "log",
                "-1",
                "--date=iso-strict",
                "--format=%H%x1f%ad%x1f%an%x1f%ae",
                hash,
            ])
            .await?;
        let line = out.lines().next().unwrap_or_default();
        let mut parts = line.split('\u{1f}');
        let (Some(hash), Some(date), Some(name), Some(email)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(IndexerError::Git(format!("unparseable commit info: {line}")));
        };
        Ok(CommitInfo {
            hash: hash.to_string(),
            date: date.to_string(),
            author_name: name.to_string(),
            author_email: email.to_string(),
        })
    }

    /// Commit hashes reachable from `rev`, newest first.
    pub async fn rev_list(&self, rev: &str) -> Result<Vec<String>> {
        let out = self.run(&["rev-list", rev]).await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// `(blob_hash, path)` tuples for every blob in a commit's tree.
    pub async fn commit_blobs(&self, commit: &str) -> Result<Vec<(String, String)>> {
        let out = self.run(&["ls-tree", "-r", commit]).await?;
        let mut blobs = Vec::new();
        for line in out.lines() {
            // <mode> <type> <hash>\t<path>
            let Some((meta, path)) = line.split_once('\t') else {
                continue;
            };
            let mut fields = meta.split_whitespace();
            let (Some(_mode), Some(kind), Some(hash)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            if kind != "blob" {
                continue;
            }
            blobs.push((hash.to_string(), path.to_string()));
        }
        Ok(blobs)
    }

    /// Blob hashes present in one commit's tree.
    pub async fn commit_blob_set(&self, commit: &str) -> Result<HashSet<String>> {
        Ok(self
            .commit_blobs(commit)
            .await?
            .into_iter()
            .map(|(hash, _)| hash)
            .collect())
    }

    /// Raw blob content; non-UTF-8 blobs are reported as unreadable.
    pub async fn read_blob(&self, blob_hash: &str) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(["cat-file", "blob", blob_hash])
            .output()
            .await
            .map_err(|err| IndexerError::Git(format!("failed to spawn git: {err}")))?;
        if !output.status.success() {
            return Err(IndexerError::Git(format!(
                "git cat-file {blob_hash} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        String::from_utf8(output.stdout)
            .map_err(|_| IndexerError::Git(format!("blob {blob_hash} is not valid UTF-8")))
    }

    /// Path to the loose ref file for a branch.
    #[must_use]
    pub fn branch_ref_path(&self, branch: &str) -> PathBuf {
        self.root
            .join(".git")
            .join("refs")
            .join("heads")
            .join(branch)
    }

    #[must_use]
    pub fn head_path(&self) -> PathBuf {
        self.root.join(".git").join("HEAD")
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(args)
            .output()
            .await
            .map_err(|err| IndexerError::Git(format!("failed to spawn git: {err}")))?;
        if !output.status.success() {
            return Err(IndexerError::Git(format!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_repo_is_detected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let repo = GitRepo::new(tmp.path());
        assert!(!repo.is_repo().await);
    }

    #[test]
    fn ref_paths_point_into_dot_git() {
        let repo = GitRepo::new("/repo");
        assert_eq!(
            repo.branch_ref_path("main"),
            PathBuf::from("/repo/.git/refs/heads/main")
        );
        assert_eq!(repo.head_path(), PathBuf::from("/repo/.git/HEAD"));
    }
}
