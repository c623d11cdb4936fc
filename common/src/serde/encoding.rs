//! Shared encoding primitives for binary blob serialization.
//!
//! This module provides the compact little-endian encode/decode building
//! blocks used by Strand storage crates. Structured record codecs (manifest
//! and chunk payloads) are composed from these primitives in the crates that
//! own the record shapes.
//!
//! Encoders are fallible: a value that does not fit its length prefix is
//! reported as an [`EncodingError`], never a panic, because oversized input
//! can reach the codec from public write operations.

use bytes::BytesMut;

/// Encoding error with a descriptive message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingError {
    pub message: String,
}

impl std::error::Error for EncodingError {}

impl std::fmt::Display for EncodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl EncodingError {
    pub fn new(message: impl Into<String>) -> Self {
        EncodingError {
            message: message.into(),
        }
    }
}

/// Encode a UTF-8 string.
///
/// Format: `len: u16` (little-endian) + `len` bytes of UTF-8
pub fn encode_utf8(s: &str, buf: &mut BytesMut) -> Result<(), EncodingError> {
    let bytes = s.as_bytes();
    let len = bytes.len();
    if len > u16::MAX as usize {
        return Err(EncodingError::new(format!(
            "String too long for UTF-8 encoding: {} bytes, max {}",
            len,
            u16::MAX
        )));
    }
    buf.extend_from_slice(&(len as u16).to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Decode a UTF-8 string.
///
/// Format: `len: u16` (little-endian) + `len` bytes of UTF-8
pub fn decode_utf8(buf: &mut &[u8]) -> Result<String, EncodingError> {
    if buf.len() < 2 {
        return Err(EncodingError::new("Buffer too short for UTF-8 length"));
    }
    let len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    *buf = &buf[2..];

    if buf.len() < len {
        return Err(EncodingError::new(format!(
            "Buffer too short for UTF-8 payload: need {} bytes, have {}",
            len,
            buf.len()
        )));
    }

    let bytes = &buf[..len];
    *buf = &buf[len..];

    String::from_utf8(bytes.to_vec())
        .map_err(|e| EncodingError::new(format!("Invalid UTF-8: {}", e)))
}

/// Encode an optional non-empty UTF-8 string.
///
/// Format: Same as Utf8, but `len = 0` means `None`
pub fn encode_optional_utf8(opt: Option<&str>, buf: &mut BytesMut) -> Result<(), EncodingError> {
    match opt {
        Some(s) => encode_utf8(s, buf),
        None => {
            buf.extend_from_slice(&0u16.to_le_bytes());
            Ok(())
        }
    }
}

/// Decode an optional non-empty UTF-8 string.
///
/// Format: Same as Utf8, but `len = 0` means `None`
pub fn decode_optional_utf8(buf: &mut &[u8]) -> Result<Option<String>, EncodingError> {
    if buf.len() < 2 {
        return Err(EncodingError::new(
            "Buffer too short for optional UTF-8 length",
        ));
    }
    let len = u16::from_le_bytes([buf[0], buf[1]]);
    if len == 0 {
        *buf = &buf[2..];
        return Ok(None);
    }
    decode_utf8(buf).map(Some)
}

/// Encode the count prefix of a small array.
///
/// Fails if the count exceeds u16::MAX. Arrays that can grow past that
/// use a plain u32 prefix via [`encode_u32`].
pub fn encode_array_count(count: usize, buf: &mut BytesMut) -> Result<(), EncodingError> {
    if count > u16::MAX as usize {
        return Err(EncodingError::new(format!(
            "Array too long for u16 count: {} items",
            count
        )));
    }
    buf.extend_from_slice(&(count as u16).to_le_bytes());
    Ok(())
}

/// Decode the count prefix of an array.
///
/// Returns the count as a usize and advances the buffer past the count bytes.
pub fn decode_array_count(buf: &mut &[u8]) -> Result<usize, EncodingError> {
    if buf.len() < 2 {
        return Err(EncodingError::new("Buffer too short for array count"));
    }
    let count = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    *buf = &buf[2..];
    Ok(count)
}

/// Encode a bool as one byte (0 or 1).
pub fn encode_bool(value: bool, buf: &mut BytesMut) {
    buf.extend_from_slice(&[value as u8]);
}

/// Decode a bool from one byte.
pub fn decode_bool(buf: &mut &[u8]) -> Result<bool, EncodingError> {
    if buf.is_empty() {
        return Err(EncodingError::new("Buffer too short for bool"));
    }
    let value = match buf[0] {
        0 => false,
        1 => true,
        other => {
            return Err(EncodingError::new(format!("Invalid bool byte: {}", other)));
        }
    };
    *buf = &buf[1..];
    Ok(value)
}

/// Encode a u32 value as 4-byte little-endian.
pub fn encode_u32(value: u32, buf: &mut BytesMut) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Decode a u32 value from 4-byte little-endian.
pub fn decode_u32(buf: &mut &[u8]) -> Result<u32, EncodingError> {
    if buf.len() < 4 {
        return Err(EncodingError::new(format!(
            "Buffer too short for u32: need 4 bytes, have {}",
            buf.len()
        )));
    }
    let bytes: [u8; 4] = buf[..4]
        .try_into()
        .map_err(|_| EncodingError::new("Failed to extract 4 bytes for u32"))?;
    *buf = &buf[4..];
    Ok(u32::from_le_bytes(bytes))
}

/// Encode a u64 value as 8-byte little-endian.
pub fn encode_u64(value: u64, buf: &mut BytesMut) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Decode a u64 value from 8-byte little-endian.
pub fn decode_u64(buf: &mut &[u8]) -> Result<u64, EncodingError> {
    if buf.len() < 8 {
        return Err(EncodingError::new(format!(
            "Buffer too short for u64: need 8 bytes, have {}",
            buf.len()
        )));
    }
    let bytes: [u8; 8] = buf[..8]
        .try_into()
        .map_err(|_| EncodingError::new("Failed to extract 8 bytes for u64"))?;
    *buf = &buf[8..];
    Ok(u64::from_le_bytes(bytes))
}

/// Encode an f32 slice.
///
/// Format: `count: u16` (little-endian) + `count` 4-byte little-endian floats
pub fn encode_f32_slice(values: &[f32], buf: &mut BytesMut) -> Result<(), EncodingError> {
    encode_array_count(values.len(), buf)?;
    for value in values {
        buf.extend_from_slice(&value.to_le_bytes());
    }
    Ok(())
}

/// Decode an f32 array encoded by [`encode_f32_slice`].
pub fn decode_f32_vec(buf: &mut &[u8]) -> Result<Vec<f32>, EncodingError> {
    let count = decode_array_count(buf)?;
    if buf.len() < count * 4 {
        return Err(EncodingError::new(format!(
            "Buffer too short for f32 array: need {} bytes, have {}",
            count * 4,
            buf.len()
        )));
    }
    let mut values = Vec::with_capacity(count);
    for i in 0..count {
        let bytes: [u8; 4] = buf[i * 4..i * 4 + 4]
            .try_into()
            .map_err(|_| EncodingError::new("Failed to extract 4 bytes for f32"))?;
        values.push(f32::from_le_bytes(bytes));
    }
    *buf = &buf[count * 4..];
    Ok(values)
}
