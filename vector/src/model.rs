//! Public API types for the vector database.
//!
//! This module provides the user-facing types for writing vectors, the
//! persisted manifest record shapes, and the collaborator traits injected
//! at construction (encryption and similarity ranking).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use common::ObjectStore;

/// Metadata key that carries a vector's virtual folder assignment.
pub const FOLDER_PATH_KEY: &str = "folderPath";

/// The root of every database's virtual folder hierarchy.
pub const ROOT_FOLDER: &str = "/";

/// Fixed chunk capacity. Bounds per-blob size regardless of database scale;
/// object networks perform poorly on very large or very small blobs.
pub const CHUNK_CAPACITY: usize = 10_000;

/// Wall-clock milliseconds since the unix epoch, used for manifest stamps.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A vector with its identifying ID, embedding values, and metadata.
///
/// # Identity
///
/// A vector is uniquely identified by its `id` within one database. The ID
/// is a user-provided string.
///
/// # Embedding Values
///
/// The `values` field contains the embedding as f32 values. The first
/// insert into a database establishes that database's dimension; every
/// later vector must match it exactly.
///
/// # Metadata
///
/// Free-form string key/value pairs. The reserved [`FOLDER_PATH_KEY`] entry
/// places the vector in the database's virtual folder hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector {
    /// User-provided unique identifier.
    pub id: String,

    /// The embedding vector (f32 values).
    pub values: Vec<f32>,

    /// Metadata attributes, including the optional folder path tag.
    pub metadata: HashMap<String, String>,
}

impl Vector {
    /// Creates a new vector with no metadata.
    pub fn new(id: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            values,
            metadata: HashMap::new(),
        }
    }

    /// Builder-style construction for vectors with metadata.
    pub fn builder(id: impl Into<String>, values: Vec<f32>) -> VectorBuilder {
        VectorBuilder {
            id: id.into(),
            values,
            metadata: HashMap::new(),
        }
    }

    /// The folder this vector is tagged with, if any.
    pub fn folder_path(&self) -> Option<&str> {
        self.metadata.get(FOLDER_PATH_KEY).map(String::as_str)
    }
}

/// Builder for constructing `Vector` instances with metadata.
#[derive(Debug)]
pub struct VectorBuilder {
    id: String,
    values: Vec<f32>,
    metadata: HashMap<String, String>,
}

impl VectorBuilder {
    /// Adds a metadata entry to the vector.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Tags the vector with a virtual folder path.
    pub fn folder(self, path: impl Into<String>) -> Self {
        self.metadata(FOLDER_PATH_KEY, path)
    }

    /// Builds the final `Vector`.
    pub fn build(self) -> Vector {
        Vector {
            id: self.id,
            values: self.values,
            metadata: self.metadata,
        }
    }
}

/// Metadata for one persisted chunk blob.
///
/// Chunks are immutable once they reach [`CHUNK_CAPACITY`]; only the last
/// chunk of a database may still be open for appends. Indices are 0-based
/// and append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMetadata {
    /// 0-based chunk index, append-only.
    pub index: u32,

    /// Encoded blob size in bytes.
    pub size_bytes: u64,

    /// Object-store handle returned by the put that wrote this chunk.
    pub address: String,
}

/// The authoritative metadata record for one logical database.
///
/// Invariants: `vector_count` equals the sum of vectors across chunks;
/// every folder path has all of its ancestors present in `folder_paths`
/// (hierarchical closure); `folder_paths` preserves insertion order of
/// first-seen paths.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseManifest {
    pub name: String,
    pub owner: String,
    pub description: Option<String>,

    /// Fixed on first insert; `None` until then.
    pub dimensions: Option<u16>,

    pub vector_count: u64,
    pub storage_size_bytes: u64,

    pub created_at: u64,
    pub updated_at: u64,
    pub last_accessed_at: u64,

    /// Chunk index, ordered by chunk index.
    pub chunks: Vec<ChunkMetadata>,

    /// Known virtual folder paths, insertion order of first-seen path.
    pub folder_paths: Vec<String>,

    /// Soft-delete marker. Chunk blobs are not cleaned up eagerly; a
    /// separate garbage-collection sweep is future work.
    pub deleted: bool,
}

impl DatabaseManifest {
    /// Creates a fresh manifest with zero vectors and zero chunks.
    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        let now = now_millis();
        Self {
            name: name.into(),
            owner: owner.into(),
            description,
            dimensions: None,
            vector_count: 0,
            storage_size_bytes: 0,
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            chunks: Vec::new(),
            folder_paths: vec![ROOT_FOLDER.to_string()],
            deleted: false,
        }
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunks.len() as u32
    }

    /// Whether `path` is a known folder in this database.
    pub fn knows_folder(&self, path: &str) -> bool {
        self.folder_paths.iter().any(|p| p == path)
    }

    /// Recomputes `storage_size_bytes` from the chunk index.
    pub(crate) fn recompute_storage_size(&mut self) {
        self.storage_size_bytes = self.chunks.iter().map(|c| c.size_bytes).sum();
    }
}

/// One entry of the virtual folder listing: a path and the number of
/// vectors tagged with exactly that path (non-recursive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEntry {
    pub path: String,
    pub file_count: u64,
}

/// A ranked search hit produced by the injected similarity collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredVector {
    pub id: String,
    pub score: f32,
}

/// Optional payload encryption applied between the codec and the object
/// store. Scheme choice is the collaborator's responsibility; this crate
/// only guarantees encrypt-on-put and decrypt-on-get ordering.
pub trait Encryptor: Send + Sync {
    fn encrypt(&self, payload: Bytes) -> std::result::Result<Bytes, String>;
    fn decrypt(&self, payload: Bytes) -> std::result::Result<Bytes, String>;
}

/// Similarity ranking collaborator, consumed only by folder-scoped search.
/// Candidate filtering happens in this crate; scoring and ordering are
/// delegated.
pub trait SimilaritySearch: Send + Sync {
    fn rank(
        &self,
        candidates: &[Vector],
        query: &[f32],
        k: usize,
        threshold: f32,
    ) -> Vec<ScoredVector>;
}

/// Configuration for a VectorDb instance.
///
/// The object store, owner identity, and encryption collaborator are always
/// passed explicitly; there are no environment-variable fallbacks.
#[derive(Clone)]
pub struct Config {
    /// Object network client.
    pub store: Arc<dyn ObjectStore>,

    /// Owner identity under which databases are stored.
    pub owner: String,

    /// Top-level prefix of the persisted layout:
    /// `<root_prefix>/<owner>/<database>/manifest`.
    pub root_prefix: String,

    /// Disable to route every read to the object store, for write-heavy or
    /// low-memory workloads.
    pub cache_enabled: bool,

    /// Optional payload encryption collaborator.
    pub encryptor: Option<Arc<dyn Encryptor>>,
}

impl Config {
    pub fn new(store: Arc<dyn ObjectStore>, owner: impl Into<String>) -> Self {
        Self {
            store,
            owner: owner.into(),
            root_prefix: "vectordb".to_string(),
            cache_enabled: true,
            encryptor: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_create_vector_with_builder() {
        // given/when
        let vector = Vector::builder("test-id", vec![1.0, 2.0, 3.0])
            .metadata("lang", "en")
            .folder("/tutorials")
            .build();

        // then
        assert_eq!(vector.id, "test-id");
        assert_eq!(vector.values, vec![1.0, 2.0, 3.0]);
        assert_eq!(vector.metadata.len(), 2);
        assert_eq!(vector.folder_path(), Some("/tutorials"));
    }

    #[test]
    fn should_create_vector_without_metadata() {
        // given/when
        let vector = Vector::new("test-id", vec![1.0, 2.0, 3.0]);

        // then
        assert!(vector.metadata.is_empty());
        assert_eq!(vector.folder_path(), None);
    }

    #[test]
    fn should_seed_fresh_manifest_with_zero_counters() {
        // given/when
        let manifest = DatabaseManifest::new("docs", "0xAA", Some("test".to_string()));

        // then
        assert_eq!(manifest.vector_count, 0);
        assert_eq!(manifest.chunk_count(), 0);
        assert!(manifest.chunks.is_empty());
        assert_eq!(manifest.folder_paths, vec![ROOT_FOLDER.to_string()]);
        assert!(!manifest.deleted);
        assert_eq!(manifest.created_at, manifest.updated_at);
    }

    #[test]
    fn should_recompute_storage_size_from_chunks() {
        // given
        let mut manifest = DatabaseManifest::new("docs", "0xAA", None);
        manifest.chunks = vec![
            ChunkMetadata {
                index: 0,
                size_bytes: 100,
                address: "addr-0".to_string(),
            },
            ChunkMetadata {
                index: 1,
                size_bytes: 250,
                address: "addr-1".to_string(),
            },
        ];

        // when
        manifest.recompute_storage_size();

        // then
        assert_eq!(manifest.storage_size_bytes, 350);
    }
}
