pub mod in_memory;

use async_trait::async_trait;
use bytes::Bytes;

/// Error type for object store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectStoreError {
    /// A write was rejected because another writer advanced the target
    /// object's revision since this writer last read it. Recoverable:
    /// the write coordinator retries these with backoff.
    WriteConflict(String),
    /// Storage-related errors from the underlying network.
    Storage(String),
    /// Internal errors
    Internal(String),
}

impl std::error::Error for ObjectStoreError {}

impl std::fmt::Display for ObjectStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ObjectStoreError::WriteConflict(msg) => write!(f, "Write conflict: {}", msg),
            ObjectStoreError::Storage(msg) => write!(f, "Storage error: {}", msg),
            ObjectStoreError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl ObjectStoreError {
    /// Converts a storage error to ObjectStoreError::Storage.
    pub fn from_storage(e: impl std::fmt::Display) -> Self {
        ObjectStoreError::Storage(e.to_string())
    }

    /// The classifier used by the write coordinator's retry loop.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ObjectStoreError::WriteConflict(_))
    }
}

/// Result type alias for object store operations
pub type ObjectStoreResult<T> = std::result::Result<T, ObjectStoreError>;

/// A whole-blob object network: get/put/list with no partial updates.
///
/// Paths act as mutable pointers while put results are content addresses.
/// The network exhibits eventual write-visibility propagation delay across
/// readers, and its only cross-client coordination signal is the
/// [`ObjectStoreError::WriteConflict`] rejection on put.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches the blob stored at `path`, `None` if absent.
    async fn get(&self, path: &str) -> ObjectStoreResult<Option<Bytes>>;

    /// Writes a whole blob at `path`, returning its content address.
    ///
    /// Puts are content-idempotent: writing the same bytes to the same
    /// path yields the same address.
    async fn put(&self, path: &str, payload: Bytes) -> ObjectStoreResult<String>;

    /// Lists stored paths under `prefix`.
    async fn list(&self, prefix: &str) -> ObjectStoreResult<Vec<String>>;
}
