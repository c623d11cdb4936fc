use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use super::{ObjectStore, ObjectStoreError, ObjectStoreResult};

/// In-memory implementation of the ObjectStore trait using a BTreeMap.
///
/// This implementation stores all blobs in memory and is useful for testing
/// or scenarios where durability is not required. Write conflicts can be
/// injected with [`fail_next_puts`](Self::fail_next_puts) to exercise the
/// coordinator's retry path.
pub struct InMemoryObjectStore {
    blobs: RwLock<BTreeMap<String, Bytes>>,
    /// Number of upcoming puts that will be rejected with a write conflict.
    conflicts_remaining: AtomicU32,
    /// Successful puts observed by this store; rejected conflicts do not
    /// count.
    put_count: AtomicU64,
}

impl InMemoryObjectStore {
    /// Creates a new InMemoryObjectStore instance with an empty store.
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(BTreeMap::new()),
            conflicts_remaining: AtomicU32::new(0),
            put_count: AtomicU64::new(0),
        }
    }

    /// Arranges for the next `count` puts to fail with a write conflict.
    pub fn fail_next_puts(&self, count: u32) {
        self.conflicts_remaining.store(count, Ordering::SeqCst);
    }

    /// Number of puts that have succeeded against this store.
    pub fn put_count(&self) -> u64 {
        self.put_count.load(Ordering::SeqCst)
    }

    fn content_address(path: &str, payload: &Bytes) -> String {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        payload.hash(&mut hasher);
        format!("addr-{:016x}", hasher.finish())
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn get(&self, path: &str) -> ObjectStoreResult<Option<Bytes>> {
        let blobs = self
            .blobs
            .read()
            .map_err(|e| ObjectStoreError::Internal(format!("Failed to acquire read lock: {}", e)))?;
        Ok(blobs.get(path).cloned())
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn put(&self, path: &str, payload: Bytes) -> ObjectStoreResult<String> {
        let remaining = self.conflicts_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.conflicts_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(ObjectStoreError::WriteConflict(format!(
                "revision advanced for {}",
                path
            )));
        }

        let mut blobs = self.blobs.write().map_err(|e| {
            ObjectStoreError::Internal(format!("Failed to acquire write lock: {}", e))
        })?;
        let address = Self::content_address(path, &payload);
        blobs.insert(path.to_string(), payload);
        self.put_count.fetch_add(1, Ordering::SeqCst);
        Ok(address)
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn list(&self, prefix: &str) -> ObjectStoreResult<Vec<String>> {
        let blobs = self
            .blobs
            .read()
            .map_err(|e| ObjectStoreError::Internal(format!("Failed to acquire read lock: {}", e)))?;
        Ok(blobs
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, _)| path.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn should_return_none_when_blob_absent() {
        // given
        let store = InMemoryObjectStore::new();

        // when
        let result = store.get("missing/path").await;

        // then
        assert!(result.is_ok());
        assert!(result.unwrap().is_none());
    }

    #[tokio::test]
    async fn should_store_and_retrieve_blob() {
        // given
        let store = InMemoryObjectStore::new();
        let payload = Bytes::from("payload");

        // when
        let address = store.put("db/docs/manifest", payload.clone()).await.unwrap();
        let result = store.get("db/docs/manifest").await.unwrap();

        // then
        assert!(address.starts_with("addr-"));
        assert_eq!(result, Some(payload));
    }

    #[tokio::test]
    async fn should_return_same_address_for_same_content() {
        // given
        let store = InMemoryObjectStore::new();
        let payload = Bytes::from("payload");

        // when
        let first = store.put("db/docs/chunk_0", payload.clone()).await.unwrap();
        let second = store.put("db/docs/chunk_0", payload).await.unwrap();

        // then
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn should_list_paths_under_prefix() {
        // given
        let store = InMemoryObjectStore::new();
        store.put("db/docs/manifest", Bytes::from("m")).await.unwrap();
        store.put("db/docs/chunk_0", Bytes::from("c")).await.unwrap();
        store.put("db/other/manifest", Bytes::from("m")).await.unwrap();

        // when
        let paths = store.list("db/docs/").await.unwrap();

        // then
        assert_eq!(paths, vec!["db/docs/chunk_0", "db/docs/manifest"]);
    }

    #[tokio::test]
    async fn should_reject_scripted_puts_with_conflict() {
        // given
        let store = InMemoryObjectStore::new();
        store.fail_next_puts(2);

        // when
        let first = store.put("p", Bytes::from("a")).await;
        let second = store.put("p", Bytes::from("a")).await;
        let third = store.put("p", Bytes::from("a")).await;

        // then
        assert!(matches!(first, Err(ObjectStoreError::WriteConflict(_))));
        assert!(matches!(second, Err(ObjectStoreError::WriteConflict(_))));
        assert!(third.is_ok());
        assert_eq!(store.put_count(), 1);
    }
}
