use crate::progress::OperationKind;
use std::collections::HashSet;

/// Where the vector-worker count came from, surfaced for transparency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadCountSource {
    UserSpecified,
    ConfigFile,
    AutoDetected,
}

/// Generates the one-line status messages emitted as zero-total progress
/// events. Collection-level messages are de-duplicated per operation so
/// retries and resumes do not repeat them.
#[derive(Debug, Default)]
pub struct OperationMessages {
    sent: HashSet<String>,
}

impl OperationMessages {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn operation_start(kind: OperationKind, files_already_done: u64) -> String {
        match kind {
            OperationKind::Clear => {
                "Starting complete reindex - all existing data will be cleared".to_string()
            }
            OperationKind::Reconcile => {
                "Starting reconciliation - syncing disk files with the index".to_string()
            }
            OperationKind::Resume => format!(
                "Resuming incremental indexing - {files_already_done} files already processed"
            ),
            OperationKind::Incremental => "Starting incremental indexing".to_string(),
        }
    }

    /// Collection-scoped message, emitted at most once per (kind, name).
    pub fn collection_cleared(&mut self, collection: &str, documents_before: u64) -> Option<String> {
        let key = format!("clear:{collection}");
        if !self.sent.insert(key) {
            return None;
        }
        if documents_before > 0 {
            Some(format!(
                "Cleared collection '{collection}' ({documents_before} points removed)"
            ))
        } else {
            Some(format!(
                "Cleared collection '{collection}' (collection was empty)"
            ))
        }
    }

    #[must_use]
    pub fn thread_count(count: usize, source: ThreadCountSource, provider: &str) -> String {
        match source {
            ThreadCountSource::UserSpecified => {
                format!("Vector calculation threads: {count} (user specified)")
            }
            ThreadCountSource::ConfigFile => {
                format!("Vector calculation threads: {count} (from config file)")
            }
            ThreadCountSource::AutoDetected => {
                format!("Vector calculation threads: {count} (auto-detected for {provider})")
            }
        }
    }

    #[must_use]
    pub fn progress_start(total_files: u64, kind: OperationKind) -> String {
        match kind {
            OperationKind::Clear => format!("Processing {total_files} files for complete reindex"),
            OperationKind::Reconcile => format!("Analyzing {total_files} files for reconciliation"),
            OperationKind::Resume => format!("Continuing with {total_files} remaining files"),
            OperationKind::Incremental => format!("Processing {total_files} files for indexing"),
        }
    }

    pub fn reset(&mut self) {
        self.sent.clear();
    }
}
