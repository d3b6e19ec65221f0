use crate::error::{Result, VectorStoreError};
use crate::types::StoredPoint;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Content-addressed point files on disk, one JSON document per point,
/// sharded by id prefix: `<root>/<id[0..2]>/<id[2..4]>/<id>.json`.
#[derive(Debug, Clone)]
pub struct PayloadStore {
    root: PathBuf,
}

impl PayloadStore {
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
    pub fn path_for(&self, id: &str) -> PathBuf {
        let (a, b) = shard(id);
        self.root.join(a).join(b).join(format!("{id}.json"))
    }

    /// Write a point atomically: serialize to a sibling temp file, then
    /// rename over the target.
    pub fn put(&self, point: &StoredPoint) -> Result<()> {
        let path = self.path_for(&point.id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec(point)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<StoredPoint> {
        let path = self.path_for(id);
        let data = std::fs::read(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                VectorStoreError::PointMissing(id.to_string())
            } else {
                VectorStoreError::Io(err)
            }
        })?;
        serde_json::from_slice(&data).map_err(|err| VectorStoreError::CorruptArtifact {
            path: path.display().to_string(),
            detail: err.to_string(),
        })
    }

    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.path_for(id).exists()
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// List all point ids by walking shard directories. Only directory
    /// entries are touched, no file contents.
    pub fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        if !self.root.exists() {
            return Ok(ids);
        }
        for entry in WalkDir::new(&self.root).min_depth(3).max_depth(3) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::warn!("Skipping unreadable payload entry: {err}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Iterate all stored points. Files that disappear between listing and
    /// open (concurrent deletes) are skipped; corrupt documents are skipped
    /// with a warning.
    pub fn iter_all(&self) -> Result<Vec<StoredPoint>> {
        let mut points = Vec::new();
        for id in self.list_ids()? {
            match self.get(&id) {
                Ok(point) => points.push(point),
                Err(VectorStoreError::PointMissing(_)) => continue,
                Err(VectorStoreError::CorruptArtifact { path, detail }) => {
                    log::warn!("Skipping corrupt payload {path}: {detail}");
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(points)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.list_ids().map(|ids| ids.len()).unwrap_or(0)
    }
}

fn shard(id: &str) -> (&str, &str) {
    let a = id.get(0..2).unwrap_or("00");
    let b = id.get(2..4).unwrap_or("00");
    (a, b)
}
