//! Strand Vector Database
//!
//! A chunked, cached, folder-hierarchical vector database persisted to a
//! shared object network that offers only whole-blob get/put. Large
//! embedding collections are stored as a per-database manifest plus
//! append-only 10,000-vector chunks; writes to one database are serialized
//! and conflict-retried through `common::WriteCoordinator`.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use common::store::in_memory::InMemoryObjectStore;
//! use vector::{Config, Vector, VectorDb};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), vector::VectorDbError> {
//!     let config = Config::new(Arc::new(InMemoryObjectStore::new()), "0xAA");
//!     let db = VectorDb::new(config);
//!     db.initialize().await?;
//!
//!     db.create_database("docs", Some("product docs")).await?;
//!     let vectors = vec![
//!         Vector::builder("v1", vec![0.1, 0.2])
//!             .folder("/tutorials")
//!             .metadata("lang", "en")
//!             .build(),
//!     ];
//!     db.add_vectors("docs", vectors).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod chunk_store;
pub mod db;
pub mod error;
pub mod folder;
pub mod manifest_store;
pub mod model;
pub mod serde;

// Public API exports
pub use db::{DatabaseStats, DatabaseUpdate, VectorDb};
pub use error::{Result, VectorDbError};
pub use model::{
    CHUNK_CAPACITY, ChunkMetadata, Config, DatabaseManifest, Encryptor, FOLDER_PATH_KEY,
    FolderEntry, ROOT_FOLDER, ScoredVector, SimilaritySearch, Vector, VectorBuilder,
};
