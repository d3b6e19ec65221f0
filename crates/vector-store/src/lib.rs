mod binary_index;
mod collection;
mod error;
mod payloads;
mod projection;
mod types;

pub use binary_index::{id_hash, BinaryIndex};
pub use collection::{CollectionConfig, CollectionMeta, CollectionStore, SearchOptions};
pub use error::{Result, VectorStoreError};
pub use payloads::PayloadStore;
pub use projection::{hamming_distance, ProjectionMatrix};
pub use types::{cosine_similarity, keys, point_id, Payload, Point, SearchHit, StoredPoint};

/// File names inside a collection directory.
pub const MATRIX_FILE: &str = "projection_matrix.yaml";
pub const META_FILE: &str = "collection_meta.json";
pub const INDEX_FILE: &str = "vector_index.bin";
pub const TOMBSTONE_FILE: &str = "vector_index.tomb";
