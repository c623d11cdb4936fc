//! Chunk blob persistence.
//!
//! Vectors are packed into fixed-capacity chunks, one blob each, at
//! `<root>/<owner>/<name>/chunk_<index>`. Indices are 0-based and
//! append-only; only the last chunk may be short. Appends fill the open
//! chunk before starting new ones, so a batch may touch the tail chunk
//! plus any number of fresh ones. Chunk blobs are always written before
//! the manifest that references them, so a reader following a committed
//! manifest never dereferences a missing chunk.
//!
//! Mutation of existing vectors goes through [`ChunkStore::rewrite_chunks`]:
//! in-place updates rewrite only the touched chunks, while any removal
//! repacks the whole database because chunk boundaries shift.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use common::coordinator::DEFAULT_MAX_RETRIES;
use common::{ObjectStore, ObjectStoreError, WriteCoordinator};

use crate::error::{Result, VectorDbError};
use crate::model::{CHUNK_CAPACITY, ChunkMetadata, Config, DatabaseManifest, Encryptor, Vector};
use crate::serde::chunk::ChunkValue;

/// Per-vector verdict produced by a rewrite closure.
pub enum Rewrite {
    Keep,
    Update(Vector),
    Remove,
}

pub struct ChunkStore {
    store: Arc<dyn ObjectStore>,
    coordinator: Arc<WriteCoordinator>,
    encryptor: Option<Arc<dyn Encryptor>>,
    root_prefix: String,
    owner: String,
}

impl ChunkStore {
    pub fn new(config: &Config, coordinator: Arc<WriteCoordinator>) -> Self {
        Self {
            store: Arc::clone(&config.store),
            coordinator,
            encryptor: config.encryptor.clone(),
            root_prefix: config.root_prefix.clone(),
            owner: config.owner.clone(),
        }
    }

    /// Store path of one chunk blob.
    pub fn chunk_path(&self, database: &str, index: u32) -> String {
        format!("{}/{}/{}/chunk_{}", self.root_prefix, self.owner, database, index)
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

    /// Writes one chunk blob and returns its metadata entry. The put is
    /// conflict-retried; the caller holds the database's write lock.
    async fn write_chunk(
        &self,
        database: &str,
        index: u32,
        value: &ChunkValue,
    ) -> Result<ChunkMetadata> {
        let payload = self.seal(value.encode_to_bytes()?)?;
        let size_bytes = payload.len() as u64;
        let path = self.chunk_path(database, index);

        let address = self
            .coordinator
            .with_retry(
                || self.store.put(&path, payload.clone()),
                DEFAULT_MAX_RETRIES,
                ObjectStoreError::is_conflict,
            )
            .await?;

        Ok(ChunkMetadata {
            index,
            size_bytes,
            address,
        })
    }

    /// Reads exactly one chunk. A committed manifest entry whose blob the
    /// store cannot return is a hard integrity error.
    pub async fn read_chunk(&self, database: &str, index: u32) -> Result<ChunkValue> {
        let path = self.chunk_path(database, index);
        let payload = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| VectorDbError::ChunkMissing {
                database: database.to_string(),
                index,
            })?;
        let payload = self.unseal(payload)?;
        Ok(ChunkValue::decode_from_bytes(&payload)?)
    }

    /// Reads every vector of a database, in chunk order.
    pub async fn read_all(&self, manifest: &DatabaseManifest) -> Result<Vec<Vector>> {
        let mut vectors = Vec::with_capacity(manifest.vector_count as usize);
        for chunk in &manifest.chunks {
            vectors.extend(self.read_chunk(&manifest.name, chunk.index).await?.vectors);
        }
        Ok(vectors)
    }

    /// Appends a batch, filling the open chunk before starting new ones.
    ///
    /// Mutates the manifest's chunk index and counters in memory only; the
    /// caller commits the manifest after this returns, so every referenced
    /// blob is already durable by then.
    pub async fn append_vectors(
        &self,
        manifest: &mut DatabaseManifest,
        vectors: Vec<Vector>,
    ) -> Result<()> {
        if vectors.is_empty() {
            return Ok(());
        }
        let appended = vectors.len() as u64;
        let mut pending = vectors.into_iter();

        // Fill the open tail chunk first, if there is room in it.
        if let Some(tail_index) = manifest.chunks.last().map(|c| c.index) {
            let mut value = self.read_chunk(&manifest.name, tail_index).await?;
            if value.vectors.len() < CHUNK_CAPACITY {
                let room = CHUNK_CAPACITY - value.vectors.len();
                value.vectors.extend(pending.by_ref().take(room));
                let entry = self.write_chunk(&manifest.name, tail_index, &value).await?;
                if let Some(slot) = manifest.chunks.last_mut() {
                    *slot = entry;
                }
            }
        }

        // Open fresh chunks for whatever is left.
        let mut next_index = manifest.chunk_count();
        loop {
            let batch: Vec<Vector> = pending.by_ref().take(CHUNK_CAPACITY).collect();
            if batch.is_empty() {
                break;
            }
            let value = ChunkValue::new(batch);
            let entry = self.write_chunk(&manifest.name, next_index, &value).await?;
            manifest.chunks.push(entry);
            next_index += 1;
        }

        manifest.vector_count += appended;
        manifest.recompute_storage_size();
        Ok(())
    }

    /// Applies a per-vector verdict across every chunk and persists the
    /// result. Returns the number of vectors updated or removed.
    ///
    /// Zero verdicts other than `Keep` means zero writes. Update-only
    /// passes rewrite just the modified chunks in place; any removal
    /// repacks the database from chunk 0 because boundaries shift.
    pub async fn rewrite_chunks<F>(
        &self,
        manifest: &mut DatabaseManifest,
        mut verdict: F,
    ) -> Result<u64>
    where
        F: FnMut(&Vector) -> Rewrite,
    {
        let mut chunks: Vec<ChunkValue> = Vec::with_capacity(manifest.chunks.len());
        let mut dirty: Vec<bool> = Vec::with_capacity(manifest.chunks.len());
        let mut touched = 0u64;
        let mut removed = 0u64;

        for chunk in &manifest.chunks {
            let mut value = self.read_chunk(&manifest.name, chunk.index).await?;
            let mut chunk_dirty = false;
            let mut survivors = Vec::with_capacity(value.vectors.len());
            for vector in value.vectors.drain(..) {
                match verdict(&vector) {
                    Rewrite::Keep => survivors.push(vector),
                    Rewrite::Update(replacement) => {
                        touched += 1;
                        chunk_dirty = true;
                        survivors.push(replacement);
                    }
                    Rewrite::Remove => {
                        touched += 1;
                        removed += 1;
                        chunk_dirty = true;
                    }
                }
            }
            value.vectors = survivors;
            chunks.push(value);
            dirty.push(chunk_dirty);
        }

        if touched == 0 {
            return Ok(0);
        }

        if removed == 0 {
            // In-place update: chunk boundaries are unchanged, so only the
            // modified chunks need rewriting.
            for (position, value) in chunks.iter().enumerate() {
                if !dirty[position] {
                    continue;
                }
                let index = manifest.chunks[position].index;
                let entry = self.write_chunk(&manifest.name, index, value).await?;
                manifest.chunks[position] = entry;
            }
        } else {
            // Removal shifts boundaries: repack everything from chunk 0.
            // Old blobs past the new tail stay behind like soft-deleted
            // databases do, pending the garbage-collection sweep.
            let survivors: Vec<Vector> = chunks
                .into_iter()
                .flat_map(|value| value.vectors)
                .collect();
            manifest.vector_count = survivors.len() as u64;
            manifest.chunks.clear();

            let mut pending = survivors.into_iter();
            let mut index = 0u32;
            loop {
                let batch: Vec<Vector> = pending.by_ref().take(CHUNK_CAPACITY).collect();
                if batch.is_empty() {
                    break;
                }
                let entry = self
                    .write_chunk(&manifest.name, index, &ChunkValue::new(batch))
                    .await?;
                manifest.chunks.push(entry);
                index += 1;
            }
        }

        manifest.recompute_storage_size();
        Ok(touched)
    }

    /// Removes the given ids, repacking chunks. Returns how many existed.
    pub async fn rewrite_chunks_excluding(
        &self,
        manifest: &mut DatabaseManifest,
        ids: &HashSet<&str>,
    ) -> Result<u64> {
        self.rewrite_chunks(manifest, |vector| {
            if ids.contains(vector.id.as_str()) {
                Rewrite::Remove
            } else {
                Rewrite::Keep
            }
        })
        .await
    }
}
