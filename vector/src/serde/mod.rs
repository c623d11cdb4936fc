//! Binary codecs for the persisted record shapes.
//!
//! Manifests and chunk payloads are whole blobs against the object network,
//! encoded with the little-endian primitives from `common::serde::encoding`.
//! Both carry a leading format version byte so the layout can evolve.

pub mod chunk;
pub mod manifest;

pub use common::serde::EncodingError;

/// Format version of the manifest blob layout.
pub const MANIFEST_VERSION: u8 = 1;

/// Format version of the chunk blob layout.
pub const CHUNK_VERSION: u8 = 1;

pub(crate) fn check_version(
    buf: &mut &[u8],
    expected: u8,
    record: &str,
) -> Result<(), EncodingError> {
    if buf.is_empty() {
        return Err(EncodingError::new(format!(
            "Buffer too short for {} version byte",
            record
        )));
    }
    let version = buf[0];
    *buf = &buf[1..];
    if version != expected {
        return Err(EncodingError::new(format!(
            "Unsupported {} format version: expected {}, got {}",
            record, expected, version
        )));
    }
    Ok(())
}
