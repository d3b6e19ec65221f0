use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Reserved payload keys. The payload map is otherwise opaque; these keys
/// carry defined semantics across the indexing and query layers.
pub mod keys {
    pub const PATH: &str = "path";
    pub const FILE_PATH: &str = "file_path";
    pub const CONTENT: &str = "content";
    pub const CODE_SNIPPET: &str = "code_snippet";
    pub const MATCH_TEXT: &str = "match_text";
    pub const LANGUAGE: &str = "language";
    pub const LINE_START: &str = "line_start";
    pub const LINE_END: &str = "line_end";
    pub const FILE_MTIME: &str = "file_mtime";
    pub const GIT_BRANCH: &str = "git_branch";
    pub const HIDDEN_BRANCHES: &str = "hidden_branches";
    pub const TYPE: &str = "type";
    pub const CHUNK_INDEX: &str = "chunk_index";
    pub const BLOB_HASH: &str = "blob_hash";
    pub const COMMIT_HASH: &str = "commit_hash";
    pub const COMMIT_DATE: &str = "commit_date";
    pub const AUTHOR_NAME: &str = "author_name";
    pub const AUTHOR_EMAIL: &str = "author_email";
    pub const TEMPORAL_CONTEXT: &str = "temporal_context";
}

/// JSON payload attached to a point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(pub serde_json::Map<String, serde_json::Value>);

impl Payload {
    #[must_use]
    pub fn new() -> Self {
        Self(serde_json::Map::new())
    }

    pub fn insert(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(serde_json::Value::as_str)
    }

    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(serde_json::Value::as_u64)
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.0.remove(key)
    }

    /// The indexed path of this payload. Repository collections store it
    /// under `path`; temporal collections under `file_path`. Filters must
    /// accept both.
    #[must_use]
    pub fn path_or_file_path(&self) -> Option<&str> {
        self.get_str(keys::PATH).or_else(|| self.get_str(keys::FILE_PATH))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Payload {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(map)
    }
}

/// Unit of indexing: id + full vector + payload. The compact binary code is
/// derived at upsert time from the collection's projection matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

/// On-disk form of a point. The full vector is persisted so search can
/// rerank by exact cosine and the binary index can be rebuilt from the
/// payload tree alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

impl From<Point> for StoredPoint {
    fn from(point: Point) -> Self {
        Self {
            id: point.id,
            vector: point.vector,
            payload: point.payload,
        }
    }
}

/// A scored search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// Content-derived point id: SHA-256 over path, byte range, and content.
/// Stable across runs, unique within a collection.
#[must_use]
pub fn point_id(path: &str, byte_start: usize, byte_end: usize, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update([0u8]);
    hasher.update(byte_start.to_le_bytes());
    hasher.update(byte_end.to_le_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Exact cosine similarity `q · v / (‖q‖ · ‖v‖)`. Zero-norm inputs score 0.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn point_ids_are_stable_and_content_sensitive() {
        let a = point_id("src/lib.rs", 0, 100, "fn main() {}");
        let b = point_id("src/lib.rs", 0, 100, "fn main() {}");
        let c = point_id("src/lib.rs", 0, 100, "fn main() { }");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.3, -0.2, 0.9];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_handles_zero_norm() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn payload_path_falls_back_to_file_path() {
        let mut temporal = Payload::new();
        temporal.insert(keys::FILE_PATH, "tests/e2e/test_x.py");
        assert_eq!(temporal.path_or_file_path(), Some("tests/e2e/test_x.py"));

        let mut regular = Payload::new();
        regular.insert(keys::PATH, "src/lib.rs");
        regular.insert(keys::FILE_PATH, "ignored.rs");
        assert_eq!(regular.path_or_file_path(), Some("src/lib.rs"));
    }
}
