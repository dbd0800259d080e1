// SPDX-License-Identifier: MIT OR Apache-2.0
//! Gzip compression policy for the WS multiplex layer (spec.md §4.10).
//!
//! Compression is applied only when it's likely to pay for itself: payload
//! at least 32KB, and not already-compressed image bytes. If compression
//! fails for any reason the caller falls back to the uncompressed payload
//! and rewrites the frame header accordingly — this module never returns
//! an error for the "should I compress" decision, only for the codec call
//! itself.

use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use std::io::Read;
use thiserror::Error;

/// Minimum payload size, in bytes, before gzip is attempted (spec.md §4.10).
pub const COMPRESSION_THRESHOLD_BYTES: usize = 32 * 1024;

/// Top-level MIME type that is skipped even above the threshold — already
/// encoded as JPEG and unlikely to shrink further.
pub const SKIP_COMPRESSION_CONTENT_TYPE: &str = "image";

/// Errors from the gzip codec itself (distinct from the should-compress
/// policy decision, which never fails).
#[derive(Debug, Error)]
pub enum CompressError {
    #[error("gzip compression failed: {0}")]
    Encode(#[source] std::io::Error),
    #[error("gzip decompression failed: {0}")]
    Decode(#[source] std::io::Error),
}

/// Decides whether a payload should be gzip-compressed before framing.
/// `content_type` may be a bare type (`"image"`) or a full MIME type
/// (`"image/jpeg"`); only the top-level type before any `/` is compared.
pub fn should_compress(payload_len: usize, content_type: &str) -> bool {
    let top_level = content_type.split('/').next().unwrap_or(content_type);
    payload_len >= COMPRESSION_THRESHOLD_BYTES && top_level != SKIP_COMPRESSION_CONTENT_TYPE
}

/// Gzip-compresses `data`. Returns the compressed bytes; the caller decides
/// whether to actually use them (the round-trip law only promises "still
/// permissible" if the result is smaller, not guaranteed smaller — spec.md
/// §8).
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CompressError> {
    let mut encoder = GzEncoder::new(data, Compression::default());
    let mut out = Vec::with_capacity(data.len() / 2 + 16);
    encoder.read_to_end(&mut out).map_err(CompressError::Encode)?;
    Ok(out)
}

/// Decompresses a gzip payload produced by [`compress`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CompressError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(CompressError::Decode)?;
    Ok(out)
}

/// Applies the compression policy, falling back to the original bytes
/// (with `compressed = false`) if gzip fails for any reason.
pub fn compress_for_frame(data: &[u8], content_type: &str) -> (Vec<u8>, bool) {
    if !should_compress(data.len(), content_type) {
        return (data.to_vec(), false);
    }
    match compress(data) {
        Ok(compressed) => (compressed, true),
        Err(_) => (data.to_vec(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_threshold_is_not_compressed() {
        assert!(!should_compress(1024, "application/json"));
    }

    #[test]
    fn at_or_above_threshold_is_compressed() {
        assert!(should_compress(COMPRESSION_THRESHOLD_BYTES, "application/json"));
        assert!(should_compress(COMPRESSION_THRESHOLD_BYTES + 1, "application/json"));
    }

    #[test]
    fn image_content_type_is_never_compressed() {
        assert!(!should_compress(10 * 1024 * 1024, "image"));
    }

    #[test]
    fn full_image_mime_type_is_never_compressed() {
        assert!(!should_compress(10 * 1024 * 1024, "image/jpeg"));
        assert!(!should_compress(10 * 1024 * 1024, "image/png"));
    }

    #[test]
    fn round_trips_arbitrary_payloads() {
        let data = vec![7u8; 200_000];
        let compressed = compress(&data).unwrap();
        let restored = decompress(&compressed).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn compress_for_frame_skips_small_payloads() {
        let data = b"tiny".to_vec();
        let (out, compressed) = compress_for_frame(&data, "application/json");
        assert_eq!(out, data);
        assert!(!compressed);
    }

    #[test]
    fn compress_for_frame_compresses_large_non_image_payloads() {
        let data = vec![b'a'; 64 * 1024];
        let (out, compressed) = compress_for_frame(&data, "application/json");
        assert!(compressed);
        assert_eq!(decompress(&out).unwrap(), data);
    }
}
