//! The vector database facade.
//!
//! [`VectorDb`] ties the persistence layers together: manifests through
//! [`ManifestStore`], chunk blobs through [`ChunkStore`], the virtual
//! folder hierarchy through [`FolderIndex`], all sharing one
//! [`WriteCoordinator`] and one [`CacheLayer`]. Every mutation of a
//! database runs under that database's write lock, writes its chunk blobs
//! first, and commits the manifest last, so a reader following a committed
//! manifest always sees a complete batch.
//!
//! `initialize` must be called once before anything else. It warms the
//! cache with every manifest stored under the configured owner, riding out
//! write-visibility propagation delays with a bounded per-manifest retry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::{RetryError, WriteCoordinator};

use crate::cache::CacheLayer;
use crate::chunk_store::{ChunkStore, Rewrite};
use crate::error::{Result, VectorDbError};
use crate::folder::{FolderIndex, normalize_path};
use crate::manifest_store::ManifestStore;
use crate::model::{
    Config, DatabaseManifest, FolderEntry, ScoredVector, SimilaritySearch, Vector, now_millis,
};

/// Attempts made per manifest while waiting out write-visibility
/// propagation during initialize.
pub const INIT_FETCH_ATTEMPTS: u32 = 5;

/// Aggregate counters of one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    pub vector_count: u64,
    pub storage_size_bytes: u64,
    pub chunk_count: u32,
    pub folder_count: u64,
}

/// Partial update of a database's own metadata. Unset fields keep their
/// current value.
#[derive(Debug, Default, Clone)]
pub struct DatabaseUpdate {
    description: Option<Option<String>>,
}

impl DatabaseUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(Some(description.into()));
        self
    }

    pub fn clear_description(mut self) -> Self {
        self.description = Some(None);
        self
    }
}

enum InitFetch {
    NotVisible,
    Fatal(VectorDbError),
}

/// The dimension a first insert establishes, rejected up front when the
/// vector is wider than the manifest's dimension field can record.
fn established_dimension(vector: &Vector) -> Result<u16> {
    let dims = vector.values.len();
    u16::try_from(dims).map_err(|_| VectorDbError::UnsupportedDimension(dims))
}

pub struct VectorDb {
    coordinator: Arc<WriteCoordinator>,
    cache: Arc<CacheLayer>,
    manifests: Arc<ManifestStore>,
    chunks: Arc<ChunkStore>,
    folders: FolderIndex,
    initialized: AtomicBool,
}

impl VectorDb {
    pub fn new(config: Config) -> Self {
        Self::with_coordinator(config, Arc::new(WriteCoordinator::new()))
    }

    /// Construction with a caller-supplied coordinator, used by tests that
    /// need a deterministic retry clock.
    pub fn with_coordinator(config: Config, coordinator: Arc<WriteCoordinator>) -> Self {
        let cache = Arc::new(CacheLayer::new(config.cache_enabled));
        let manifests = Arc::new(ManifestStore::new(
            &config,
            Arc::clone(&coordinator),
            Arc::clone(&cache),
        ));
        let chunks = Arc::new(ChunkStore::new(&config, Arc::clone(&coordinator)));
        let folders = FolderIndex::new(
            Arc::clone(&manifests),
            Arc::clone(&chunks),
            Arc::clone(&cache),
            Arc::clone(&coordinator),
        );
        Self {
            coordinator,
            cache,
            manifests,
            chunks,
            folders,
            initialized: AtomicBool::new(false),
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(VectorDbError::NotInitialized)
        }
    }

    /// Loads every manifest stored under the configured owner into the
    /// cache. Idempotent; later calls return immediately.
    ///
    /// A freshly written manifest may not be visible to `list`/`get` yet,
    /// so each fetch is retried up to [`INIT_FETCH_ATTEMPTS`] times with
    /// backoff. A manifest that stays unavailable is logged and skipped;
    /// the remaining databases still load.
    pub async fn initialize(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }

        let paths = self.manifests.list_manifest_paths().await?;
        for path in paths {
            let outcome = self
                .coordinator
                .with_retry(
                    || async {
                        match self.manifests.fetch(&path).await {
                            Ok(Some(manifest)) => Ok(manifest),
                            Ok(None) => Err(InitFetch::NotVisible),
                            Err(err) => Err(InitFetch::Fatal(err)),
                        }
                    },
                    INIT_FETCH_ATTEMPTS - 1,
                    |err| matches!(err, InitFetch::NotVisible),
                )
                .await;

            match outcome {
                Ok(manifest) => self.cache.put_manifest(manifest).await,
                Err(RetryError::Exhausted(_)) => {
                    let error = VectorDbError::Propagation {
                        name: path.clone(),
                        attempts: INIT_FETCH_ATTEMPTS,
                    };
                    tracing::warn!(%error, "skipping unavailable manifest during initialize");
                }
                Err(RetryError::Inner(InitFetch::Fatal(err))) => return Err(err),
                Err(RetryError::Inner(InitFetch::NotVisible)) => unreachable!(),
            }
        }

        self.initialized.store(true, Ordering::SeqCst);
        tracing::debug!(owner = self.manifests.owner(), "vector database initialized");
        Ok(())
    }

    // ---- database lifecycle ------------------------------------------------

    pub async fn create_database(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<DatabaseManifest> {
        self.ensure_initialized()?;
        self.manifests
            .create(name, description.map(str::to_string))
            .await
    }

    /// The database's manifest, or `None` if absent or soft-deleted.
    /// Touches `last_accessed_at` on the cached copy.
    pub async fn get_database(&self, name: &str) -> Result<Option<DatabaseManifest>> {
        self.ensure_initialized()?;
        match self.manifests.load(name).await?.filter(|m| !m.deleted) {
            Some(mut manifest) => {
                manifest.last_accessed_at = now_millis();
                self.cache.put_manifest(manifest.clone()).await;
                Ok(Some(manifest))
            }
            None => Ok(None),
        }
    }

    /// All non-deleted databases of the configured owner.
    pub async fn list_databases(&self) -> Result<Vec<DatabaseManifest>> {
        self.ensure_initialized()?;
        let mut databases = Vec::new();
        for path in self.manifests.list_manifest_paths().await? {
            if let Some(manifest) = self.manifests.fetch(&path).await? {
                if !manifest.deleted {
                    self.cache.put_manifest(manifest.clone()).await;
                    databases.push(manifest);
                }
            }
        }
        Ok(databases)
    }

    /// Soft delete: the manifest is marked, chunk blobs stay in place.
    pub async fn delete_database(&self, name: &str) -> Result<()> {
        self.ensure_initialized()?;
        self.manifests.soft_delete(name).await
    }

    pub async fn update_database_metadata(
        &self,
        name: &str,
        update: DatabaseUpdate,
    ) -> Result<DatabaseManifest> {
        self.ensure_initialized()?;
        self.coordinator
            .with_lock(name, || async {
                let mut manifest = self.load_live(name).await?;
                if let Some(description) = update.description {
                    manifest.description = description;
                }
                self.manifests.save_unlocked(manifest.clone()).await?;
                Ok(manifest)
            })
            .await
    }

    pub async fn get_stats(&self, name: &str) -> Result<DatabaseStats> {
        self.ensure_initialized()?;
        let manifest = self.load_live(name).await?;
        Ok(DatabaseStats {
            vector_count: manifest.vector_count,
            storage_size_bytes: manifest.storage_size_bytes,
            chunk_count: manifest.chunk_count(),
            folder_count: manifest.folder_paths.len() as u64,
        })
    }

    // ---- vectors -----------------------------------------------------------

    /// Appends a batch of vectors.
    ///
    /// The first vector ever inserted fixes the database's dimension; every
    /// vector of this and later batches must match it. Validation happens
    /// before any blob is written, so a rejected batch leaves no partial
    /// state. Within a batch the write is atomic to readers: chunk blobs go
    /// out first, the manifest referencing them last.
    pub async fn add_vectors(&self, name: &str, vectors: Vec<Vector>) -> Result<()> {
        self.ensure_initialized()?;
        if vectors.is_empty() {
            self.load_live(name).await?;
            return Ok(());
        }

        self.coordinator
            .with_lock(name, || async {
                let mut manifest = self.load_live(name).await?;

                let expected = match manifest.dimensions {
                    Some(dims) => dims,
                    None => established_dimension(&vectors[0])?,
                };
                for vector in &vectors {
                    if vector.values.len() != expected as usize {
                        return Err(VectorDbError::DimensionMismatch {
                            expected,
                            actual: vector.values.len(),
                        });
                    }
                }
                manifest.dimensions = Some(expected);

                // The persisted tag must be the canonical path, or the
                // folder operations' exact and prefix matches miss it.
                let mut vectors = vectors;
                for vector in &mut vectors {
                    if let Some(folder) = vector.folder_path() {
                        let folder = normalize_path(folder);
                        FolderIndex::register_path(&mut manifest, &folder);
                        vector
                            .metadata
                            .insert(crate::model::FOLDER_PATH_KEY.to_string(), folder);
                    }
                }

                self.chunks.append_vectors(&mut manifest, vectors.clone()).await?;
                self.manifests.save_unlocked(manifest).await?;
                self.cache.put_vectors(name, vectors).await;
                Ok(())
            })
            .await
    }

    /// Inserts a vector, replacing any existing vector with the same id.
    pub async fn upsert_vector(&self, name: &str, vector: Vector) -> Result<()> {
        self.ensure_initialized()?;
        self.coordinator
            .with_lock(name, || async {
                let mut manifest = self.load_live(name).await?;

                if let Some(expected) = manifest.dimensions {
                    if vector.values.len() != expected as usize {
                        return Err(VectorDbError::DimensionMismatch {
                            expected,
                            actual: vector.values.len(),
                        });
                    }
                }

                let mut vector = vector;
                if let Some(folder) = vector.folder_path() {
                    let folder = normalize_path(folder);
                    vector
                        .metadata
                        .insert(crate::model::FOLDER_PATH_KEY.to_string(), folder);
                }

                let replaced = self
                    .chunks
                    .rewrite_chunks(&mut manifest, |existing| {
                        if existing.id == vector.id {
                            Rewrite::Update(vector.clone())
                        } else {
                            Rewrite::Keep
                        }
                    })
                    .await?;

                if replaced == 0 {
                    let expected = match manifest.dimensions {
                        Some(dims) => dims,
                        None => established_dimension(&vector)?,
                    };
                    manifest.dimensions = Some(expected);
                    self.chunks
                        .append_vectors(&mut manifest, vec![vector.clone()])
                        .await?;
                }
                if let Some(folder) = vector.folder_path() {
                    FolderIndex::register_path(&mut manifest, folder);
                }

                self.manifests.save_unlocked(manifest).await?;
                self.cache.put_vectors(name, vec![vector]).await;
                Ok(())
            })
            .await
    }

    /// Fetches one vector by id. A missing id is `Ok(None)`, never an
    /// error. A store-scan miss warms the cache for the whole database.
    pub async fn get_vector(&self, name: &str, id: &str) -> Result<Option<Vector>> {
        self.ensure_initialized()?;
        if let Some(cached) = self.cache.vector(name, id).await {
            return Ok(Some(cached));
        }

        let manifest = self.load_live(name).await?;
        let vectors = self.chunks.read_all(&manifest).await?;
        let found = vectors.iter().find(|v| v.id == id).cloned();
        self.cache.put_vectors(name, vectors).await;
        Ok(found)
    }

    /// Fetches a batch of vectors by id; missing ids are omitted from the
    /// result rather than reported as errors.
    pub async fn get_vectors(&self, name: &str, ids: &[&str]) -> Result<Vec<Vector>> {
        self.ensure_initialized()?;
        let mut found = Vec::with_capacity(ids.len());
        let mut misses = false;
        for id in ids {
            match self.cache.vector(name, id).await {
                Some(vector) => found.push(vector),
                None => {
                    misses = true;
                    break;
                }
            }
        }
        if !misses {
            return Ok(found);
        }

        let manifest = self.load_live(name).await?;
        let vectors = self.chunks.read_all(&manifest).await?;
        let by_id: HashMap<&str, &Vector> =
            vectors.iter().map(|v| (v.id.as_str(), v)).collect();
        let found = ids
            .iter()
            .filter_map(|id| by_id.get(id).map(|v| (*v).clone()))
            .collect();
        self.cache.put_vectors(name, vectors).await;
        Ok(found)
    }

    /// Deletes one vector by id. Returns whether it existed.
    pub async fn delete_vector(&self, name: &str, id: &str) -> Result<bool> {
        self.ensure_initialized()?;
        self.coordinator
            .with_lock(name, || async {
                let mut manifest = self.load_live(name).await?;
                let removed = self
                    .chunks
                    .rewrite_chunks_excluding(&mut manifest, &HashSet::from([id]))
                    .await?;
                if removed > 0 {
                    self.manifests.save_unlocked(manifest).await?;
                    self.cache.evict_vectors(name).await;
                }
                Ok(removed > 0)
            })
            .await
    }

    /// Deletes every vector whose metadata contains exactly `key = value`.
    /// Zero matches means zero writes. Returns the number deleted.
    pub async fn delete_by_metadata(&self, name: &str, key: &str, value: &str) -> Result<u64> {
        self.ensure_initialized()?;
        self.coordinator
            .with_lock(name, || async {
                let mut manifest = self.load_live(name).await?;
                let removed = self
                    .chunks
                    .rewrite_chunks(&mut manifest, |vector| {
                        if vector.metadata.get(key).map(String::as_str) == Some(value) {
                            Rewrite::Remove
                        } else {
                            Rewrite::Keep
                        }
                    })
                    .await?;
                if removed > 0 {
                    self.manifests.save_unlocked(manifest).await?;
                    self.cache.evict_vectors(name).await;
                }
                Ok(removed)
            })
            .await
    }

    /// Merges metadata entries into one vector. Returns whether the id
    /// exists. The folder tag participates like any other entry, so this
    /// can also move the vector.
    pub async fn update_metadata(
        &self,
        name: &str,
        id: &str,
        metadata: HashMap<String, String>,
    ) -> Result<bool> {
        self.ensure_initialized()?;
        let mut metadata = metadata;
        if let Some(folder) = metadata.get(crate::model::FOLDER_PATH_KEY) {
            let folder = normalize_path(folder);
            metadata.insert(crate::model::FOLDER_PATH_KEY.to_string(), folder);
        }
        self.coordinator
            .with_lock(name, || async {
                let mut manifest = self.load_live(name).await?;
                let touched = self
                    .chunks
                    .rewrite_chunks(&mut manifest, |vector| {
                        if vector.id == id {
                            let mut updated = vector.clone();
                            updated.metadata.extend(metadata.clone());
                            Rewrite::Update(updated)
                        } else {
                            Rewrite::Keep
                        }
                    })
                    .await?;
                if touched > 0 {
                    if let Some(folder) = metadata.get(crate::model::FOLDER_PATH_KEY) {
                        FolderIndex::register_path(&mut manifest, folder);
                    }
                    self.manifests.save_unlocked(manifest).await?;
                    self.cache.evict_vectors(name).await;
                }
                Ok(touched > 0)
            })
            .await
    }

    // ---- folders -----------------------------------------------------------

    pub async fn create_folder(&self, name: &str, path: &str) -> Result<()> {
        self.ensure_initialized()?;
        self.folders.create_folder(name, path).await
    }

    pub async fn list_folders(&self, name: &str) -> Result<Vec<String>> {
        self.ensure_initialized()?;
        self.folders.list_folders(name).await
    }

    pub async fn list_folders_with_counts(&self, name: &str) -> Result<Vec<FolderEntry>> {
        self.ensure_initialized()?;
        self.folders.folders_with_counts(name).await
    }

    pub async fn rename_folder(&self, name: &str, from: &str, to: &str) -> Result<u64> {
        self.ensure_initialized()?;
        self.folders.rename_folder(name, from, to).await
    }

    pub async fn delete_folder(&self, name: &str, path: &str) -> Result<u64> {
        self.ensure_initialized()?;
        self.folders.delete_folder(name, path).await
    }

    pub async fn move_to_folder(&self, name: &str, ids: &[&str], target: &str) -> Result<u64> {
        self.ensure_initialized()?;
        self.folders.move_to_folder(name, ids, target).await
    }

    pub async fn move_folder_contents(&self, name: &str, from: &str, to: &str) -> Result<u64> {
        self.ensure_initialized()?;
        self.folders.move_folder_contents(name, from, to).await
    }

    pub async fn search_in_folder(
        &self,
        name: &str,
        path: &str,
        query: &[f32],
        k: usize,
        threshold: f32,
        ranker: &dyn SimilaritySearch,
    ) -> Result<Vec<ScoredVector>> {
        self.ensure_initialized()?;
        self.folders
            .search_in_folder(name, path, query, k, threshold, ranker)
            .await
    }

    async fn load_live(&self, name: &str) -> Result<DatabaseManifest> {
        self.manifests
            .load(name)
            .await?
            .filter(|m| !m.deleted)
            .ok_or_else(|| VectorDbError::DatabaseNotFound(name.to_string()))
    }
}
