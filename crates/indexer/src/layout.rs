use std::path::{Path, PathBuf};

/// Name of the per-project metadata directory.
pub const META_DIR: &str = ".code-indexer";

/// Resolves every on-disk artifact path for one project.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
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

    #[must_use]
    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(META_DIR)
    }

    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.meta_dir().join("config.json")
    }

    #[must_use]
    pub fn collection_dir(&self, name: &str) -> PathBuf {
        self.meta_dir().join("index").join(sanitize(name))
    }

    /// Collection for the active (provider, model) pair.
    #[must_use]
    pub fn semantic_collection_dir(&self, provider: &str, model: &str) -> PathBuf {
        self.collection_dir(&format!("{provider}-{model}"))
    }

    /// Temporal (git-history) collection for the active pair.
    #[must_use]
    pub fn temporal_collection_dir(&self, provider: &str, model: &str) -> PathBuf {
        self.collection_dir(&format!("{provider}-{model}-temporal"))
    }

    #[must_use]
    pub fn fts_dir(&self) -> PathBuf {
        self.meta_dir().join("tantivy_index")
    }

    #[must_use]
    pub fn progress_path(&self) -> PathBuf {
        self.meta_dir().join("indexing_progress.json")
    }

    #[must_use]
    pub fn temporal_progress_path(&self) -> PathBuf {
        self.meta_dir().join("temporal_progress.json")
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.meta_dir().join("index.lock")
    }

    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.meta_dir().join("daemon.sock")
    }

    #[must_use]
    pub fn daemon_pid_path(&self) -> PathBuf {
        self.meta_dir().join("daemon.pid")
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn collection_names_are_sanitized() {
        let layout = ProjectLayout::new("/repo");
        let dir = layout.semantic_collection_dir("ollama", "nomic-embed-text:v1.5");
        assert_eq!(
            dir,
            PathBuf::from("/repo/.code-indexer/index/ollama-nomic-embed-text_v1.5")
        );
    }

    #[test]
    fn artifacts_live_under_meta_dir() {
        let layout = ProjectLayout::new("/repo");
        assert_eq!(
            layout.progress_path(),
            PathBuf::from("/repo/.code-indexer/indexing_progress.json")
        );
        assert_eq!(
            layout.fts_dir(),
            PathBuf::from("/repo/.code-indexer/tantivy_index")
        );
    }
}
