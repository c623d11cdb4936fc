//! Chunk payload codec.
//!
//! A chunk blob is an ordered list of up to [`crate::CHUNK_CAPACITY`]
//! vectors. Metadata entries are written in sorted key order so that
//! encoding the same chunk twice yields identical bytes, which keeps puts
//! content-idempotent.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use common::serde::EncodingError;
use common::serde::encoding::{
    decode_array_count, decode_f32_vec, decode_utf8, encode_array_count, encode_f32_slice,
    encode_utf8,
};

use super::{CHUNK_VERSION, check_version};
use crate::model::Vector;

/// The decoded form of one chunk blob.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkValue {
    pub vectors: Vec<Vector>,
}

impl ChunkValue {
    pub fn new(vectors: Vec<Vector>) -> Self {
        Self { vectors }
    }

    pub fn encode_to_bytes(&self) -> Result<Bytes, EncodingError> {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[CHUNK_VERSION]);
        encode_array_count(self.vectors.len(), &mut buf)?;
        for vector in &self.vectors {
            encode_vector(vector, &mut buf)?;
        }
        Ok(buf.freeze())
    }

    pub fn decode_from_bytes(buf: &[u8]) -> Result<Self, EncodingError> {
        let mut slice = buf;
        check_version(&mut slice, CHUNK_VERSION, "chunk")?;
        let count = decode_array_count(&mut slice)?;
        let mut vectors = Vec::with_capacity(count);
        for _ in 0..count {
            vectors.push(decode_vector(&mut slice)?);
        }
        if !slice.is_empty() {
            return Err(EncodingError::new(format!(
                "Trailing {} bytes after chunk payload",
                slice.len()
            )));
        }
        Ok(Self { vectors })
    }
}

fn encode_vector(vector: &Vector, buf: &mut BytesMut) -> Result<(), EncodingError> {
    encode_utf8(&vector.id, buf)?;
    encode_f32_slice(&vector.values, buf)?;

    let mut entries: Vec<(&String, &String)> = vector.metadata.iter().collect();
    entries.sort_by_key(|(key, _)| key.as_str());
    encode_array_count(entries.len(), buf)?;
    for (key, value) in entries {
        encode_utf8(key, buf)?;
        encode_utf8(value, buf)?;
    }
    Ok(())
}

fn decode_vector(buf: &mut &[u8]) -> Result<Vector, EncodingError> {
    let id = decode_utf8(buf)?;
    let values = decode_f32_vec(buf)?;

    let entry_count = decode_array_count(buf)?;
    let mut metadata = HashMap::with_capacity(entry_count);
    for _ in 0..entry_count {
        let key = decode_utf8(buf)?;
        let value = decode_utf8(buf)?;
        metadata.insert(key, value);
    }

    Ok(Vector {
        id,
        values,
        metadata,
    })
}
