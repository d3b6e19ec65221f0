use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregate result of one indexing run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub files: u64,
    pub skipped_files: u64,
    pub failed_files: u64,
    pub deleted_files: u64,
    pub chunks: u64,
    pub points: u64,
    pub tokens_used: u64,
    pub time_ms: u64,
    pub cancelled: bool,
    pub by_language: BTreeMap<String, u64>,
}

impl IndexStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, language: Option<&str>) {
        self.files += 1;
        if let Some(language) = language {
            *self.by_language.entry(language.to_string()).or_insert(0) += 1;
        }
    }

    pub fn merge(&mut self, other: &Self) {
        self.files += other.files;
        self.skipped_files += other.skipped_files;
        self.failed_files += other.failed_files;
        self.deleted_files += other.deleted_files;
        self.chunks += other.chunks;
        self.points += other.points;
        self.tokens_used += other.tokens_used;
        self.time_ms = self.time_ms.max(other.time_ms);
        self.cancelled |= other.cancelled;
        for (language, count) in &other.by_language {
            *self.by_language.entry(language.clone()).or_insert(0) += count;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn add_file_tracks_language_counts() {
        let mut stats = IndexStats::new();
        stats.add_file(Some("rust"));
        stats.add_file(Some("rust"));
        stats.add_file(None);
        assert_eq!(stats.files, 3);
        assert_eq!(stats.by_language.get("rust"), Some(&2));
    }

    #[test]
    fn merge_accumulates() {
        let mut a = IndexStats::new();
        a.files = 2;
        a.chunks = 10;
        let mut b = IndexStats::new();
        b.files = 3;
        b.cancelled = true;
        a.merge(&b);
        assert_eq!(a.files, 5);
        assert!(a.cancelled);
    }
}
