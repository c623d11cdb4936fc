//! Manifest blob codec.
//!
//! Layout (all little-endian):
//!
//! ```text
//! version: u8
//! name, owner: utf8        description: optional utf8
//! dimensions: u16          (0 = not yet established)
//! vector_count, storage_size_bytes: u64
//! created_at, updated_at, last_accessed_at: u64 (unix millis)
//! chunk_count: u32, then per chunk: index u32, size_bytes u64, address utf8
//! folder_count: u32, then utf8 per path (insertion order preserved)
//! deleted: bool
//! ```

use bytes::{Bytes, BytesMut};
use common::serde::EncodingError;
use common::serde::encoding::{
    decode_bool, decode_optional_utf8, decode_u32, decode_u64, decode_utf8, encode_bool,
    encode_optional_utf8, encode_u32, encode_u64, encode_utf8,
};

use super::{MANIFEST_VERSION, check_version};
use crate::model::{ChunkMetadata, DatabaseManifest};

impl DatabaseManifest {
    pub fn encode_to_bytes(&self) -> Result<Bytes, EncodingError> {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[MANIFEST_VERSION]);
        encode_utf8(&self.name, &mut buf)?;
        encode_utf8(&self.owner, &mut buf)?;
        encode_optional_utf8(self.description.as_deref(), &mut buf)?;
        // 0 doubles as "not yet established": a real dimension is never 0.
        buf.extend_from_slice(&self.dimensions.unwrap_or(0).to_le_bytes());
        encode_u64(self.vector_count, &mut buf);
        encode_u64(self.storage_size_bytes, &mut buf);
        encode_u64(self.created_at, &mut buf);
        encode_u64(self.updated_at, &mut buf);
        encode_u64(self.last_accessed_at, &mut buf);

        // Chunk and folder lists have no practical upper bound, so their
        // counts are a plain u32 rather than the u16 small-array prefix.
        encode_u32(self.chunks.len() as u32, &mut buf);
        for chunk in &self.chunks {
            encode_u32(chunk.index, &mut buf);
            encode_u64(chunk.size_bytes, &mut buf);
            encode_utf8(&chunk.address, &mut buf)?;
        }

        encode_u32(self.folder_paths.len() as u32, &mut buf);
        for path in &self.folder_paths {
            encode_utf8(path, &mut buf)?;
        }

        encode_bool(self.deleted, &mut buf);
        Ok(buf.freeze())
    }

    pub fn decode_from_bytes(buf: &[u8]) -> Result<Self, EncodingError> {
        let mut slice = buf;
        check_version(&mut slice, MANIFEST_VERSION, "manifest")?;

        let name = decode_utf8(&mut slice)?;
        let owner = decode_utf8(&mut slice)?;
        let description = decode_optional_utf8(&mut slice)?;

        if slice.len() < 2 {
            return Err(EncodingError::new("Buffer too short for dimensions"));
        }
        let raw_dimensions = u16::from_le_bytes([slice[0], slice[1]]);
        slice = &slice[2..];
        let dimensions = if raw_dimensions == 0 {
            None
        } else {
            Some(raw_dimensions)
        };

        let vector_count = decode_u64(&mut slice)?;
        let storage_size_bytes = decode_u64(&mut slice)?;
        let created_at = decode_u64(&mut slice)?;
        let updated_at = decode_u64(&mut slice)?;
        let last_accessed_at = decode_u64(&mut slice)?;

        let chunk_count = decode_u32(&mut slice)? as usize;
        let mut chunks = Vec::with_capacity(chunk_count);
        for _ in 0..chunk_count {
            let index = decode_u32(&mut slice)?;
            let size_bytes = decode_u64(&mut slice)?;
            let address = decode_utf8(&mut slice)?;
            chunks.push(ChunkMetadata {
                index,
                size_bytes,
                address,
            });
        }

        let folder_count = decode_u32(&mut slice)? as usize;
        let mut folder_paths = Vec::with_capacity(folder_count);
        for _ in 0..folder_count {
            folder_paths.push(decode_utf8(&mut slice)?);
        }

        let deleted = decode_bool(&mut slice)?;
        if !slice.is_empty() {
            return Err(EncodingError::new(format!(
                "Trailing {} bytes after manifest payload",
                slice.len()
            )));
        }

        Ok(DatabaseManifest {
            name,
            owner,
            description,
            dimensions,
            vector_count,
            storage_size_bytes,
            created_at,
            updated_at,
            last_accessed_at,
            chunks,
            folder_paths,
            deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_round_trip_fresh_manifest() {
        // given
        let manifest = DatabaseManifest::new("docs", "0xAA", Some("test".to_string()));

        // when
        let encoded = manifest.encode_to_bytes().unwrap();
        let decoded = DatabaseManifest::decode_from_bytes(&encoded).unwrap();

        // then
        assert_eq!(decoded, manifest);
    }

    #[test]
    fn should_round_trip_manifest_with_chunks_and_folders() {
        // given
        let mut manifest = DatabaseManifest::new("docs", "0xAA", None);
        manifest.dimensions = Some(384);
        manifest.vector_count = 10_001;
        manifest.chunks = vec![
            ChunkMetadata {
                index: 0,
                size_bytes: 4096,
                address: "addr-0".to_string(),
            },
            ChunkMetadata {
                index: 1,
                size_bytes: 17,
                address: "addr-1".to_string(),
            },
        ];
        manifest.recompute_storage_size();
        manifest.folder_paths = vec![
            "/".to_string(),
            "/tutorials".to_string(),
            "/tutorials/rust".to_string(),
        ];

        // when
        let encoded = manifest.encode_to_bytes().unwrap();
        let decoded = DatabaseManifest::decode_from_bytes(&encoded).unwrap();

        // then
        assert_eq!(decoded, manifest);
        assert_eq!(decoded.chunk_count(), 2);
        assert_eq!(decoded.storage_size_bytes, 4113);
    }

    #[test]
    fn should_round_trip_deleted_manifest_without_description() {
        // given
        let mut manifest = DatabaseManifest::new("docs", "0xAA", None);
        manifest.deleted = true;

        // when
        let encoded = manifest.encode_to_bytes().unwrap();
        let decoded = DatabaseManifest::decode_from_bytes(&encoded).unwrap();

        // then
        assert!(decoded.deleted);
        assert_eq!(decoded.description, None);
    }

    #[test]
    fn should_round_trip_unicode_description() {
        // given
        let manifest = DatabaseManifest::new("docs", "0xAA", Some("ドキュメント庫".to_string()));

        // when
        let encoded = manifest.encode_to_bytes().unwrap();
        let decoded = DatabaseManifest::decode_from_bytes(&encoded).unwrap();

        // then
        assert_eq!(decoded.description.as_deref(), Some("ドキュメント庫"));
    }

    #[test]
    fn should_round_trip_folder_list_beyond_u16_range() {
        // given - more folder paths than a u16 count could carry
        let mut manifest = DatabaseManifest::new("docs", "0xAA", None);
        for i in 0..70_000 {
            manifest.folder_paths.push(format!("/f{}", i));
        }

        // when
        let encoded = manifest.encode_to_bytes().unwrap();
        let decoded = DatabaseManifest::decode_from_bytes(&encoded).unwrap();

        // then
        assert_eq!(decoded.folder_paths.len(), manifest.folder_paths.len());
        assert_eq!(decoded.folder_paths.last(), manifest.folder_paths.last());
    }

    #[test]
    fn should_reject_unsupported_version() {
        // given
        let mut encoded = DatabaseManifest::new("docs", "0xAA", None)
            .encode_to_bytes()
            .unwrap()
            .to_vec();
        encoded[0] = 42;

        // when
        let result = DatabaseManifest::decode_from_bytes(&encoded);

        // then
        assert!(result.is_err());
    }

    #[test]
    fn should_reject_truncated_manifest() {
        // given
        let encoded = DatabaseManifest::new("docs", "0xAA", None)
            .encode_to_bytes()
            .unwrap();

        // when
        let result = DatabaseManifest::decode_from_bytes(&encoded[..encoded.len() - 3]);

        // then
        assert!(result.is_err());
    }
}
