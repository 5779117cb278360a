//! Payload compression for sync changes: deflate, then base64.

use crate::error::{SyncError, SyncResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde_json::Value;
use std::io::{Read, Write};

/// Compresses a JSON value into a base64 string.
pub fn compress_value(value: &Value) -> SyncResult<String> {
    let json = serde_json::to_vec(value)?;
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| SyncError::Codec(format!("compression failed: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| SyncError::Codec(format!("compression failed: {e}")))?;
    Ok(STANDARD.encode(compressed))
}

/// Reverses [`compress_value`].
pub fn decompress_value(encoded: &str) -> SyncResult<Value> {
    let compressed = STANDARD
        .decode(encoded)
        .map_err(|e| SyncError::Codec(format!("invalid base64: {e}")))?;
    let mut json = Vec::new();
    DeflateDecoder::new(compressed.as_slice())
        .read_to_end(&mut json)
        .map_err(|e| SyncError::Codec(format!("decompression failed: {e}")))?;
    Ok(serde_json::from_slice(&json)?)
}
