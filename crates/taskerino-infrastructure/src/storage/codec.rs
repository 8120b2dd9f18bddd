//! On-disk entity file format.
//!
//! ```text
//! {"format":1,"id":"s-1","timestamp":"...","checksum":"sha256:<hex>","compressed":false,"originalSize":812,"storedSize":812}\n
//! <payload: raw JSON, or a zstd frame when compressed>
//! ```
//!
//! The checksum always covers the uncompressed payload, so a file is verified
//! the same way regardless of how it is stored. The header also carries the
//! entity id and timestamp so the collection index can be rebuilt from the
//! files alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Cursor;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityHeader {
    pub format: u32,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub checksum: String,
    pub compressed: bool,
    pub original_size: u64,
    pub stored_size: u64,
}

/// An entity file ready to be written.
#[derive(Debug)]
pub struct EncodedEntity {
    pub header: EntityHeader,
    pub bytes: Vec<u8>,
}

/// A verified entity read back from disk.
#[derive(Debug)]
pub struct DecodedEntity {
    pub header: EntityHeader,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CodecError {
    MissingHeader,
    InvalidHeader(String),
    UnsupportedFormat(u32),
    SizeMismatch { expected: u64, actual: u64 },
    Compress(String),
    Decompress(String),
    ChecksumMismatch { expected: String, actual: String },
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::MissingHeader => write!(f, "missing header line"),
            CodecError::InvalidHeader(e) => write!(f, "invalid header: {}", e),
            CodecError::UnsupportedFormat(v) => write!(f, "unsupported format version {}", v),
            CodecError::SizeMismatch { expected, actual } => {
                write!(f, "size mismatch: expected {} bytes, found {}", expected, actual)
            }
            CodecError::Compress(e) => write!(f, "compression failed: {}", e),
            CodecError::Decompress(e) => write!(f, "decompression failed: {}", e),
            CodecError::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {}, computed {}", expected, actual)
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// `sha256:<hex>` digest of `payload`.
pub fn checksum(payload: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(payload))
}

/// Builds an entity file. `zstd_level` of `Some(_)` compresses the payload.
pub fn encode(
    id: &str,
    timestamp: Option<DateTime<Utc>>,
    payload: &[u8],
    zstd_level: Option<i32>,
) -> Result<EncodedEntity, CodecError> {
    let stored = match zstd_level {
        Some(level) => zstd::stream::encode_all(Cursor::new(payload), level)
            .map_err(|e| CodecError::Compress(e.to_string()))?,
        None => payload.to_vec(),
    };

    let header = EntityHeader {
        format: FORMAT_VERSION,
        id: id.to_string(),
        timestamp,
        checksum: checksum(payload),
        compressed: zstd_level.is_some(),
        original_size: payload.len() as u64,
        stored_size: stored.len() as u64,
    };

    let mut bytes =
        serde_json::to_vec(&header).map_err(|e| CodecError::InvalidHeader(e.to_string()))?;
    bytes.push(b'\n');
    bytes.extend_from_slice(&stored);

    Ok(EncodedEntity { header, bytes })
}

/// Reads just the header of an entity file.
pub fn decode_header(bytes: &[u8]) -> Result<(EntityHeader, &[u8]), CodecError> {
    let newline = bytes
        .iter()
        .position(|b| *b == b'\n')
        .ok_or(CodecError::MissingHeader)?;
    let header: EntityHeader = serde_json::from_slice(&bytes[..newline])
        .map_err(|e| CodecError::InvalidHeader(e.to_string()))?;
    if header.format != FORMAT_VERSION {
        return Err(CodecError::UnsupportedFormat(header.format));
    }

    let stored = &bytes[newline + 1..];
    if stored.len() as u64 != header.stored_size {
        return Err(CodecError::SizeMismatch {
            expected: header.stored_size,
            actual: stored.len() as u64,
        });
    }
    Ok((header, stored))
}

/// Parses, decompresses and verifies an entity file.
pub fn decode(bytes: &[u8]) -> Result<DecodedEntity, CodecError> {
    let (header, stored) = decode_header(bytes)?;

    let payload = if header.compressed {
        zstd::stream::decode_all(Cursor::new(stored))
            .map_err(|e| CodecError::Decompress(e.to_string()))?
    } else {
        stored.to_vec()
    };

    if payload.len() as u64 != header.original_size {
        return Err(CodecError::SizeMismatch {
            expected: header.original_size,
            actual: payload.len() as u64,
        });
    }

    let actual = checksum(&payload);
    if actual != header.checksum {
        return Err(CodecError::ChecksumMismatch {
            expected: header.checksum,
            actual,
        });
    }

    Ok(DecodedEntity { header, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "id": "s-1",
            "notes": "a".repeat(4096),
        }))
        .unwrap()
    }

    #[test]
    fn test_plain_and_compressed_decode_to_same_payload() {
        let payload = sample();
        let plain = encode("s-1", None, &payload, None).unwrap();
        let packed = encode("s-1", Some(Utc::now()), &payload, Some(3)).unwrap();

        assert!(!plain.header.compressed);
        assert!(packed.header.compressed);
        assert!(packed.header.stored_size < packed.header.original_size);
        assert_eq!(plain.header.checksum, packed.header.checksum);
        assert!(packed.header.timestamp.is_some());

        assert_eq!(decode(&plain.bytes).unwrap().payload, payload);
        assert_eq!(decode(&packed.bytes).unwrap().payload, payload);
    }

    #[test]
    fn test_flipped_payload_byte_is_checksum_mismatch() {
        let mut encoded = encode("s-1", None, &sample(), None).unwrap().bytes;
        let last = encoded.len() - 3;
        encoded[last] ^= 0x01;

        match decode(&encoded) {
            Err(CodecError::ChecksumMismatch { .. }) => {}
            other => panic!("expected checksum mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert_eq!(decode(b"{\"id\":1}").unwrap_err(), CodecError::MissingHeader);
        assert!(matches!(
            decode(b"not json\n{}"),
            Err(CodecError::InvalidHeader(_))
        ));

        let mut truncated = encode("s-1", None, &sample(), Some(3)).unwrap().bytes;
        truncated.truncate(truncated.len() - 4);
        assert!(matches!(
            decode(&truncated),
            Err(CodecError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_checksum_format() {
        let sum = checksum(b"");
        assert_eq!(
            sum,
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
