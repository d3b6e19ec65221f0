mod config;
mod error;
mod git;
mod index_lock;
mod indexer;
mod layout;
mod messages;
mod progress;
mod slots;
mod stats;
mod temporal;
mod walker;
mod watcher;

pub use config::{EmbeddingConfig, FilterOverrides, ProjectConfig, ProxyConfig};
pub use error::{IndexerError, Result};
pub use git::{CommitInfo, GitRepo};
pub use index_lock::acquire_index_write_lock;
pub use indexer::{IndexerOptions, ProgressFn, ProjectIndexer};
pub use layout::ProjectLayout;
pub use messages::{OperationMessages, ThreadCountSource};
pub use progress::{Fingerprint, OperationKind, ProgressiveMetadata, TemporalProgress};
pub use slots::{SlotStatus, SlotTracker};
pub use stats::IndexStats;
pub use temporal::{
    CommitSelection, TemporalIndexer, TEMPORAL_PRIMARY_TYPE, TEMPORAL_REF_TYPE,
};
pub use walker::FileWalker;
pub use watcher::{RefsEvent, RefsWatcher};
