use crate::error::{IndexerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Indexing mode for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Clear,
    Reconcile,
    Incremental,
    Resume,
}

impl OperationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::Reconcile => "reconcile",
            Self::Incremental => "incremental",
            Self::Resume => "resume",
        }
    }
}

/// (provider, model, dimension) triple pinning a session to the collection
/// it writes. A mismatch at session start forces a full rebuild instead of
/// silently mixing embedding spaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub provider: String,
    pub model: String,
    pub dimension: usize,
}

impl Fingerprint {
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{}/{} dim={}", self.provider, self.model, self.dimension)
    }
}

/// Durable per-session indexing state, flushed after each batch. Within a
/// session the completed set only grows; a new session supersedes the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressiveMetadata {
    pub session_id: String,
    pub operation: OperationKind,
    pub fingerprint: Fingerprint,
    pub total_files: u64,
    pub completed_files: BTreeSet<String>,
    pub failed_files: BTreeMap<String, String>,
    pub started_at: String,
    pub last_checkpoint_at: String,
}

impl ProgressiveMetadata {
    #[must_use]
    pub fn new(operation: OperationKind, fingerprint: Fingerprint) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            operation,
            fingerprint,
            total_files: 0,
            completed_files: BTreeSet::new(),
            failed_files: BTreeMap::new(),
            started_at: now.clone(),
            last_checkpoint_at: now,
        }
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        match std::fs::read(path) {
            Ok(raw) => match serde_json::from_slice(&raw) {
                Ok(metadata) => Ok(Some(metadata)),
                Err(err) => {
                    log::warn!(
                        "Discarding corrupt progress file {}: {err}",
                        path.display()
                    );
                    Ok(None)
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.last_checkpoint_at = chrono::Utc::now().to_rfc3339();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Reject the session when the stored fingerprint no longer matches the
    /// active embedding configuration.
    pub fn check_fingerprint(&self, current: &Fingerprint) -> Result<()> {
        if &self.fingerprint == current {
            Ok(())
        } else {
            Err(IndexerError::FingerprintMismatch(format!(
                "{} -> {}",
                self.fingerprint.describe(),
                current.describe()
            )))
        }
    }

    pub fn mark_completed(&mut self, file: &str) {
        self.failed_files.remove(file);
        self.completed_files.insert(file.to_string());
    }

    pub fn mark_failed(&mut self, file: &str, reason: &str) {
        if !self.completed_files.contains(file) {
            self.failed_files.insert(file.to_string(), reason.to_string());
        }
    }

    #[must_use]
    pub fn is_completed(&self, file: &str) -> bool {
        self.completed_files.contains(file)
    }

    #[must_use]
    pub fn completed_count(&self) -> u64 {
        self.completed_files.len() as u64
    }
}

/// Durable temporal-indexing state: completed commits, the blob
/// deduplication set, and the primary point per blob hash.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemporalProgress {
    pub completed_commits: BTreeSet<String>,
    pub known_blobs: BTreeSet<String>,
    pub blob_points: BTreeMap<String, String>,
    pub total_commits: u64,
    pub files_processed: u64,
    pub indexed_branches: BTreeSet<String>,
    pub last_commit: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<Fingerprint>,
}

impl TemporalProgress {
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(raw) => match serde_json::from_slice(&raw) {
                Ok(progress) => Ok(progress),
                Err(err) => {
                    log::warn!(
                        "Discarding corrupt temporal progress {}: {err}",
                        path.display()
                    );
                    Ok(Self::default())
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    #[must_use]
    pub fn is_commit_completed(&self, hash: &str) -> bool {
        self.completed_commits.contains(hash)
    }

    #[must_use]
    pub fn is_blob_known(&self, blob_hash: &str) -> bool {
        self.known_blobs.contains(blob_hash)
    }

    pub fn record_primary(&mut self, blob_hash: &str, point_id: &str) {
        self.known_blobs.insert(blob_hash.to_string());
        self.blob_points
            .insert(blob_hash.to_string(), point_id.to_string());
    }

    pub fn mark_commit_completed(&mut self, hash: &str) {
        self.completed_commits.insert(hash.to_string());
        self.last_commit = Some(hash.to_string());
    }
}
