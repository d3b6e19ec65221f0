use crate::binary_index::{id_hash, BinaryIndex};
use crate::error::{Result, VectorStoreError};
use crate::payloads::PayloadStore;
use crate::projection::ProjectionMatrix;
use crate::types::{cosine_similarity, Payload, Point, SearchHit, StoredPoint};
use crate::{INDEX_FILE, MATRIX_FILE, META_FILE, TOMBSTONE_FILE};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Parameters fixed at collection creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub dim: usize,
    pub bits: usize,
    pub provider: String,
    pub model: String,
}

/// `collection_meta.json`: the collection's declared shape and the
/// (provider, model) fingerprint it is pinned to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub dim: usize,
    pub bits: usize,
    pub provider: String,
    pub model: String,
    pub created_at: String,
}

/// Search tuning knobs. `score_threshold` is applied verbatim:
/// `Some(0.0)` filters at 0.0 and is never treated as absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    pub score_threshold: Option<f32>,
}

/// Per-collection vector store on local disk: projection matrix + sharded
/// payload tree + binary coarse index, all under one directory.
pub struct CollectionStore {
    dir: PathBuf,
    meta: CollectionMeta,
    matrix: ProjectionMatrix,
    payloads: PayloadStore,
    index: Option<BinaryIndex>,
    ids_by_hash: HashMap<u64, String>,
}

impl CollectionStore {
    /// Create a collection directory, generating the projection matrix from
    /// a seed derived from the fingerprint. Fails if the directory already
    /// holds a collection with different parameters; reopens it when the
    /// parameters match.
    pub fn create(dir: &Path, config: &CollectionConfig) -> Result<Self> {
        if config.dim == 0 {
            return Err(VectorStoreError::InvalidConfig(
                "vector dimension must be positive".to_string(),
            ));
        }
        if config.bits == 0 {
            return Err(VectorStoreError::InvalidConfig(
                "projection bits must be positive".to_string(),
            ));
        }

        let meta_path = dir.join(META_FILE);
        if meta_path.exists() {
            let existing: CollectionMeta =
                serde_json::from_slice(&std::fs::read(&meta_path)?)?;
            if existing.dim != config.dim
                || existing.bits != config.bits
                || existing.provider != config.provider
                || existing.model != config.model
            {
                return Err(VectorStoreError::MetaMismatch(format!(
                    "existing collection is ({}, {}, dim={}, bits={}), requested ({}, {}, dim={}, bits={})",
                    existing.provider,
                    existing.model,
                    existing.dim,
                    existing.bits,
                    config.provider,
                    config.model,
                    config.dim,
                    config.bits
                )));
            }
            return Self::open(dir);
        }

        std::fs::create_dir_all(dir)?;
        let seed = collection_seed(config);
        let matrix = ProjectionMatrix::generate(config.dim, config.bits, seed)?;
        matrix.save(&dir.join(MATRIX_FILE))?;

        let meta = CollectionMeta {
            dim: config.dim,
            bits: config.bits,
            provider: config.provider.clone(),
            model: config.model.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let tmp = meta_path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&meta)?)?;
        std::fs::rename(&tmp, &meta_path)?;

        let index = BinaryIndex::create(
            &dir.join(INDEX_FILE),
            &dir.join(TOMBSTONE_FILE),
            matrix.code_width(),
        )?;

        log::info!(
            "Created collection at {} ({}, {}, dim={}, bits={})",
            dir.display(),
            meta.provider,
            meta.model,
            meta.dim,
            meta.bits
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            meta,
            matrix,
            payloads: PayloadStore::new(dir),
            index: Some(index),
            ids_by_hash: HashMap::new(),
        })
    }

    pub fn open(dir: &Path) -> Result<Self> {
        let meta_path = dir.join(META_FILE);
        if !meta_path.exists() {
            return Err(VectorStoreError::CollectionMissing(
                dir.display().to_string(),
            ));
        }
        let meta: CollectionMeta = serde_json::from_slice(&std::fs::read(&meta_path)?)?;
        let matrix = ProjectionMatrix::load(&dir.join(MATRIX_FILE))?;
        if matrix.rows() != meta.dim || matrix.bits() != meta.bits {
            return Err(VectorStoreError::MetaMismatch(format!(
                "projection matrix is {}x{} but meta declares dim={} bits={}",
                matrix.rows(),
                matrix.bits(),
                meta.dim,
                meta.bits
            )));
        }

        let index = match BinaryIndex::open(&dir.join(INDEX_FILE), &dir.join(TOMBSTONE_FILE)) {
            Ok(index) => Some(index),
            Err(err) => {
                log::warn!(
                    "Binary index unavailable at {} ({err}); searches will full-scan payloads",
                    dir.display()
                );
                None
            }
        };

        let payloads = PayloadStore::new(dir);
        let mut ids_by_hash = HashMap::new();
        for id in payloads.list_ids()? {
            let hash = id_hash(&id);
            if let Some(previous) = ids_by_hash.insert(hash, id.clone()) {
                log::warn!("Point id hash collision between {previous} and {id}");
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            meta,
            matrix,
            payloads,
            index,
            ids_by_hash,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn meta(&self) -> &CollectionMeta {
        &self.meta
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.meta.dim
    }

    /// True when the collection was created by the given generator.
    #[must_use]
    pub fn matches_fingerprint(&self, provider: &str, model: &str, dim: usize) -> bool {
        self.meta.provider == provider && self.meta.model == model && self.meta.dim == dim
    }

    /// Upsert a batch of points: project each vector, persist the payload,
    /// append to the binary index. Payload and index record land together
    /// or not at all; an already-known id with an unchanged vector only
    /// rewrites its payload (idempotent by id).
    pub fn upsert_points(&mut self, points: Vec<Point>) -> Result<usize> {
        if points.is_empty() {
            return Ok(0);
        }

        let mut appended: Vec<(u64, Vec<u8>)> = Vec::new();
        let mut appended_ids: Vec<String> = Vec::new();
        let mut replaced: HashSet<u64> = HashSet::new();

        for point in &points {
            if point.vector.len() != self.meta.dim {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: self.meta.dim,
                    actual: point.vector.len(),
                });
            }
        }

        let mut upserted = 0usize;
        for point in points {
            let hash = id_hash(&point.id);
            let code = self.matrix.project(&point.vector)?;
            let existing = if self.payloads.exists(&point.id) {
                Some(self.payloads.get(&point.id)?)
            } else {
                None
            };

            let stored: StoredPoint = point.into();
            self.payloads.put(&stored)?;
            upserted += 1;

            match existing {
                Some(old) if old.vector == stored.vector => {
                    // Same vector, same code: payload refresh only.
                }
                Some(_) => {
                    replaced.insert(hash);
                    appended.push((hash, code));
                    appended_ids.push(stored.id.clone());
                }
                None => {
                    appended.push((hash, code));
                    appended_ids.push(stored.id.clone());
                }
            }
            self.ids_by_hash.insert(hash, stored.id);
        }

        if let Some(index) = self.index.as_mut() {
            if !replaced.is_empty() {
                index.tombstone_hashes(&replaced)?;
            }
            if let Err(err) = index.append_batch(&appended) {
                // Roll freshly written payloads back so no point is left
                // half-visible.
                for id in &appended_ids {
                    let _ = self.payloads.delete(id);
                    self.ids_by_hash.remove(&id_hash(id));
                }
                return Err(err);
            }
        }

        Ok(upserted)
    }

    /// Hamming-prefilter search with exact cosine rerank.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        filter: Option<&dyn Fn(&Payload) -> bool>,
        options: SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        if query.len() != self.meta.dim {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.meta.dim,
                actual: query.len(),
            });
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut hits = match self.index.as_ref() {
            Some(index) => {
                let query_code = self.matrix.project(query)?;
                let k_prefilter = 200.max(limit.saturating_mul(20));
                let candidates = index.search(&query_code, k_prefilter)?;
                let mut hits = Vec::with_capacity(candidates.len());
                for candidate in candidates {
                    let Some(id) = self.ids_by_hash.get(&candidate.id_hash) else {
                        log::debug!(
                            "Index record {:#x} has no payload mapping; skipping",
                            candidate.id_hash
                        );
                        continue;
                    };
                    match self.payloads.get(id) {
                        Ok(stored) => {
                            self.score_into(&mut hits, stored, query, filter, options);
                        }
                        Err(VectorStoreError::PointMissing(_)) => continue,
                        Err(VectorStoreError::CorruptArtifact { path, detail }) => {
                            log::warn!("Skipping corrupt payload {path}: {detail}");
                            continue;
                        }
                        Err(err) => return Err(err),
                    }
                }
                hits
            }
            None => {
                log::warn!(
                    "Binary index missing for {}; running exact full scan over payloads",
                    self.dir.display()
                );
                let mut hits = Vec::new();
                for stored in self.payloads.iter_all()? {
                    self.score_into(&mut hits, stored, query, filter, options);
                }
                hits
            }
        };

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    fn score_into(
        &self,
        hits: &mut Vec<SearchHit>,
        stored: StoredPoint,
        query: &[f32],
        filter: Option<&dyn Fn(&Payload) -> bool>,
        options: SearchOptions,
    ) {
        let score = cosine_similarity(query, &stored.vector);
        if let Some(threshold) = options.score_threshold {
            if score < threshold {
                return;
            }
        }
        if let Some(predicate) = filter {
            if !predicate(&stored.payload) {
                return;
            }
        }
        hits.push(SearchHit {
            id: stored.id,
            score,
            payload: stored.payload,
        });
    }

    /// Tombstone index records and delete payload files for the given ids.
    pub fn delete_points(&mut self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let hashes: HashSet<u64> = ids.iter().map(|id| id_hash(id)).collect();
        if let Some(index) = self.index.as_mut() {
            index.tombstone_hashes(&hashes)?;
        }
        let mut deleted = 0usize;
        for id in ids {
            if self.payloads.delete(id)? {
                deleted += 1;
            }
            self.ids_by_hash.remove(&id_hash(id));
        }
        Ok(deleted)
    }

    /// Live point count from the index header; payload count when the
    /// index is unavailable.
    #[must_use]
    pub fn count_points(&self) -> u64 {
        match self.index.as_ref() {
            Some(index) => index.live_count(),
            None => self.payloads.count() as u64,
        }
    }

    pub fn list_ids(&self) -> Result<Vec<String>> {
        self.payloads.list_ids()
    }

    pub fn get_point(&self, id: &str) -> Result<StoredPoint> {
        self.payloads.get(id)
    }

    pub fn iter_points(&self) -> Result<Vec<StoredPoint>> {
        self.payloads.iter_all()
    }

    /// Recreate the binary index from the payload tree alone.
    pub fn rebuild_index(&mut self) -> Result<()> {
        let mut index = BinaryIndex::create(
            &self.dir.join(INDEX_FILE),
            &self.dir.join(TOMBSTONE_FILE),
            self.matrix.code_width(),
        )?;
        let mut records = Vec::new();
        self.ids_by_hash.clear();
        for stored in self.payloads.iter_all()? {
            let code = self.matrix.project(&stored.vector)?;
            let hash = id_hash(&stored.id);
            records.push((hash, code));
            self.ids_by_hash.insert(hash, stored.id);
        }
        index.append_batch(&records)?;
        self.index = Some(index);
        log::info!(
            "Rebuilt binary index for {} with {} records",
            self.dir.display(),
            records.len()
        );
        Ok(())
    }

    /// Delete the collection wholesale.
    pub fn destroy(dir: &Path) -> Result<()> {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn collection_seed(config: &CollectionConfig) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(config.provider.as_bytes());
    hasher.update([0u8]);
    hasher.update(config.model.as_bytes());
    hasher.update(config.dim.to_le_bytes());
    hasher.update(config.bits.to_le_bytes());
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[0..8].try_into().unwrap())
}
