//! Non-authoritative in-memory caches.
//!
//! The cache accelerates manifest and vector reads; the authoritative state
//! is always reconstructible from the object store alone. Every mutation
//! updates or invalidates affected entries synchronously in the same
//! process, so there is no locally visible eventual-consistency window.
//!
//! The cache is instance-scoped state owned by one engine; separate engine
//! instances never share it. When disabled, every read routes to the
//! object store.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::model::{DatabaseManifest, Vector};

pub struct CacheLayer {
    enabled: bool,
    manifests: RwLock<HashMap<String, DatabaseManifest>>,
    vectors: RwLock<HashMap<String, HashMap<String, Vector>>>,
}

impl CacheLayer {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            manifests: RwLock::new(HashMap::new()),
            vectors: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn manifest(&self, name: &str) -> Option<DatabaseManifest> {
        if !self.enabled {
            return None;
        }
        self.manifests.read().await.get(name).cloned()
    }

    pub async fn put_manifest(&self, manifest: DatabaseManifest) {
        if !self.enabled {
            return;
        }
        self.manifests
            .write()
            .await
            .insert(manifest.name.clone(), manifest);
    }

    pub async fn evict_manifest(&self, name: &str) {
        self.manifests.write().await.remove(name);
    }

    pub async fn vector(&self, database: &str, id: &str) -> Option<Vector> {
        if !self.enabled {
            return None;
        }
        self.vectors
            .read()
            .await
            .get(database)
            .and_then(|by_id| by_id.get(id))
            .cloned()
    }

    pub async fn put_vectors(&self, database: &str, vectors: impl IntoIterator<Item = Vector>) {
        if !self.enabled {
            return;
        }
        let mut cache = self.vectors.write().await;
        let by_id = cache.entry(database.to_string()).or_default();
        for vector in vectors {
            by_id.insert(vector.id.clone(), vector);
        }
    }

    pub async fn remove_vector(&self, database: &str, id: &str) {
        let mut cache = self.vectors.write().await;
        if let Some(by_id) = cache.get_mut(database) {
            by_id.remove(id);
        }
    }

    /// Drops all cached vectors of one database, keeping its manifest entry.
    /// Used after chunk rewrites where cached copies may be stale.
    pub async fn evict_vectors(&self, database: &str) {
        self.vectors.write().await.remove(database);
    }

    /// Drops everything cached for one database.
    pub async fn evict_database(&self, database: &str) {
        self.evict_manifest(database).await;
        self.evict_vectors(database).await;
    }

    /// Names of all cached manifests, in no particular order.
    pub async fn manifest_names(&self) -> Vec<String> {
        self.manifests.read().await.keys().cloned().collect()
    }
}
