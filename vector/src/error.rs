//! Error taxonomy for the vector database.
//!
//! Transient write conflicts and propagation delays are retried locally and
//! only surface after exhaustion; everything else propagates unmodified.
//! Lookup-by-id misses are `Ok(None)`, never errors.

use common::serde::EncodingError;
use common::{ObjectStoreError, RetryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VectorDbError {
    /// A non-deleted database of this name already exists (case-sensitive).
    #[error("database already exists: {0}")]
    DatabaseExists(String),

    /// The operation requires a database that is absent or soft-deleted.
    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    /// An added vector's length disagrees with the database's established
    /// dimension. Raised before any I/O is issued.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: u16, actual: usize },

    /// A first insert whose vector is wider than the dimension field can
    /// record. Raised before any I/O is issued.
    #[error("vector dimension {0} exceeds the supported maximum of 65535")]
    UnsupportedDimension(usize),

    /// A write conflict persisted through every retry. Wraps the last
    /// underlying store error.
    #[error("write conflict persisted after retries: {0}")]
    ConflictExhausted(#[source] ObjectStoreError),

    /// A manifest listed by the object network stayed unavailable past the
    /// initialize retry budget. Non-fatal: loading continues for other
    /// databases.
    #[error("manifest for '{name}' not visible after {attempts} attempts")]
    Propagation { name: String, attempts: u32 },

    /// A manifest references a chunk blob the store cannot return.
    #[error("chunk {index} of database '{database}' is missing from the store")]
    ChunkMissing { database: String, index: u32 },

    /// A folder argument the hierarchy cannot accept, such as renaming
    /// the root.
    #[error("invalid folder path: {0}")]
    InvalidFolderPath(String),

    #[error("engine not initialized; call initialize() first")]
    NotInitialized,

    #[error(transparent)]
    Store(#[from] ObjectStoreError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("encryption failure: {0}")]
    Encryption(String),
}

impl From<RetryError<ObjectStoreError>> for VectorDbError {
    fn from(err: RetryError<ObjectStoreError>) -> Self {
        match err {
            RetryError::Exhausted(inner) => VectorDbError::ConflictExhausted(inner),
            RetryError::Inner(inner) => VectorDbError::Store(inner),
        }
    }
}

pub type Result<T> = std::result::Result<T, VectorDbError>;
