//! Authoritative manifest persistence.
//!
//! One manifest blob per database at `<root>/<owner>/<name>/manifest`.
//! Writes are serialized per database through the shared
//! [`WriteCoordinator`] and conflict-retried; reads are cache-first with
//! the object store as fallback. Deleting a database only flips the
//! manifest's soft-delete marker; chunk blobs stay in place until a
//! garbage-collection sweep reclaims them.

use std::sync::Arc;

use bytes::Bytes;
use common::coordinator::DEFAULT_MAX_RETRIES;
use common::{ObjectStore, ObjectStoreError, WriteCoordinator};

use crate::cache::CacheLayer;
use crate::error::{Result, VectorDbError};
use crate::model::{Config, DatabaseManifest, Encryptor, now_millis};

pub struct ManifestStore {
    store: Arc<dyn ObjectStore>,
    coordinator: Arc<WriteCoordinator>,
    cache: Arc<CacheLayer>,
    encryptor: Option<Arc<dyn Encryptor>>,
    root_prefix: String,
    owner: String,
}

impl ManifestStore {
    pub fn new(config: &Config, coordinator: Arc<WriteCoordinator>, cache: Arc<CacheLayer>) -> Self {
        Self {
            store: Arc::clone(&config.store),
            coordinator,
            cache,
            encryptor: config.encryptor.clone(),
            root_prefix: config.root_prefix.clone(),
            owner: config.owner.clone(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Store path of one database's manifest blob.
    pub fn manifest_path(&self, name: &str) -> String {
        format!("{}/{}/{}/manifest", self.root_prefix, self.owner, name)
    }

    /// Store prefix under which all of this owner's databases live.
    pub fn owner_prefix(&self) -> String {
        format!("{}/{}/", self.root_prefix, self.owner)
    }

    fn seal(&self, payload: Bytes) -> Result<Bytes> {
        match &self.encryptor {
            Some(encryptor) => encryptor.encrypt(payload).map_err(VectorDbError::Encryption),
            None => Ok(payload),
        }
    }

    fn unseal(&self, payload: Bytes) -> Result<Bytes> {
        match &self.encryptor {
            Some(encryptor) => encryptor.decrypt(payload).map_err(VectorDbError::Encryption),
            None => Ok(payload),
        }
    }

    /// Creates a fresh database manifest.
    ///
    /// Name collision is case-sensitive and only counts non-deleted
    /// manifests; creating over a soft-deleted name starts a fresh record.
    /// The existence check and the save run inside one locked section, so
    /// concurrent creates of the same name cannot both observe "absent".
    pub async fn create(
        &self,
        name: &str,
        description: Option<String>,
    ) -> Result<DatabaseManifest> {
        self.coordinator
            .with_lock(name, || async {
                if let Some(existing) = self.load(name).await? {
                    if !existing.deleted {
                        return Err(VectorDbError::DatabaseExists(name.to_string()));
                    }
                }

                let manifest = DatabaseManifest::new(name, self.owner.clone(), description);
                self.save_unlocked(manifest.clone()).await?;
                tracing::debug!(database = name, "created database manifest");
                Ok(manifest)
            })
            .await
    }

    /// Loads a manifest, cache-first. Soft-deleted manifests are returned
    /// as-is; callers filter on `deleted` where it matters.
    pub async fn load(&self, name: &str) -> Result<Option<DatabaseManifest>> {
        if let Some(cached) = self.cache.manifest(name).await {
            return Ok(Some(cached));
        }

        match self.store.get(&self.manifest_path(name)).await? {
            Some(payload) => {
                let payload = self.unseal(payload)?;
                let manifest = DatabaseManifest::decode_from_bytes(&payload)?;
                self.cache.put_manifest(manifest.clone()).await;
                Ok(Some(manifest))
            }
            None => Ok(None),
        }
    }

    /// Fetches a manifest directly from the store, bypassing the cache.
    /// Used by initialize, where the cache is being (re)seeded.
    pub async fn fetch(&self, path: &str) -> Result<Option<DatabaseManifest>> {
        match self.store.get(path).await? {
            Some(payload) => {
                let payload = self.unseal(payload)?;
                Ok(Some(DatabaseManifest::decode_from_bytes(&payload)?))
            }
            None => Ok(None),
        }
    }

    /// Persists a manifest under the database's write lock.
    pub async fn save(&self, manifest: DatabaseManifest) -> Result<()> {
        let name = manifest.name.clone();
        self.coordinator
            .with_lock(&name, || self.save_unlocked(manifest))
            .await
    }

    /// Persists a manifest while the caller already holds the database's
    /// write lock. Bumps `updated_at`, conflict-retries the put, and keeps
    /// the cache in sync with what was committed.
    pub async fn save_unlocked(&self, mut manifest: DatabaseManifest) -> Result<()> {
        manifest.updated_at = now_millis();

        let payload = self.seal(manifest.encode_to_bytes()?)?;
        let path = self.manifest_path(&manifest.name);

        self.coordinator
            .with_retry(
                || self.store.put(&path, payload.clone()),
                DEFAULT_MAX_RETRIES,
                ObjectStoreError::is_conflict,
            )
            .await?;

        self.cache.put_manifest(manifest).await;
        Ok(())
    }

    /// Marks a database deleted without touching its chunk blobs.
    pub async fn soft_delete(&self, name: &str) -> Result<()> {
        self.coordinator
            .with_lock(name, || async {
                let mut manifest = self
                    .load(name)
                    .await?
                    .filter(|m| !m.deleted)
                    .ok_or_else(|| VectorDbError::DatabaseNotFound(name.to_string()))?;
                manifest.deleted = true;
                self.save_unlocked(manifest).await
            })
            .await?;

        self.cache.evict_database(name).await;
        tracing::debug!(database = name, "soft-deleted database");
        Ok(())
    }

    /// Whether a non-deleted manifest exists for `name`.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.load(name).await?.map_or(false, |m| !m.deleted))
    }

    /// Manifest paths of every database stored under this owner.
    pub async fn list_manifest_paths(&self) -> Result<Vec<String>> {
        let paths = self.store.list(&self.owner_prefix()).await?;
        Ok(paths
            .into_iter()
            .filter(|p| p.ends_with("/manifest"))
            .collect())
    }
}
