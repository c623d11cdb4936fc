//! Shared infrastructure for Strand storage crates.
//!
//! This crate holds the pieces that are not specific to any one storage
//! engine: the [`store::ObjectStore`] abstraction over a whole-blob object
//! network, binary encoding primitives in [`serde::encoding`], and the
//! [`coordinator::WriteCoordinator`] that serializes writes per logical key
//! and retries transient write conflicts.

pub mod coordinator;
pub mod serde;
pub mod store;

pub use coordinator::{RetryError, Sleeper, WriteCoordinator};
pub use store::{ObjectStore, ObjectStoreError, ObjectStoreResult};
