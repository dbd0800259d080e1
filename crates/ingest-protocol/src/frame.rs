// SPDX-License-Identifier: MIT OR Apache-2.0
//! Binary WS frame codec (spec.md §4.10).
//!
//! Fixed 32-byte header, big-endian multi-byte fields:
//!
//! ```text
//! byte 0      protocol version (1)
//! byte 1      reserved (0)
//! byte 2      compression (0=none, 1=gzip)
//! byte 3      payload kind (0=json, 1=text, 2=binary)
//! bytes 4-19  16-byte message id (opaque)
//! bytes 20-23 payload length, u32 BE (length as-stored, post-compression)
//! bytes 24-31 reserved, zero
//! bytes 32..  payload bytes
//! ```
//!
//! The codec is a synchronous pure function deliberately kept free of any
//! async runtime dependency (spec.md §9: "the frame codec and HMAC
//! verification are synchronous pure functions and must be testable
//! without a runtime").

use thiserror::Error;

/// Size of the fixed frame header, in bytes.
pub const HEADER_LEN: usize = 32;

/// The only protocol version this codec understands.
pub const PROTOCOL_VERSION: u8 = 1;

/// Compression applied to the payload as-stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None = 0,
    Gzip = 1,
}

impl Compression {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::None),
            1 => Some(Self::Gzip),
            _ => None,
        }
    }
}

/// What the payload bytes represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Json = 0,
    Text = 1,
    Binary = 2,
}

impl PayloadKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Json),
            1 => Some(Self::Text),
            2 => Some(Self::Binary),
            _ => None,
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub compression: Compression,
    pub payload_kind: PayloadKind,
    pub message_id: [u8; 16],
    pub payload: Vec<u8>,
}

/// Frame decode failures, each carrying the exact wording the boundary
/// behaviors in spec.md §8 specify.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Unsupported WS protocol version")]
    UnsupportedVersion,
    #[error("frame too small")]
    TooSmall,
    #[error("payload incomplete")]
    PayloadIncomplete,
    #[error("Invalid WS frame")]
    Invalid,
}

/// Encodes a frame. `payload` must already reflect the declared
/// `compression` (i.e. already gzipped if `compression == Gzip`).
pub fn encode(
    message_id: [u8; 16],
    compression: Compression,
    payload_kind: PayloadKind,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(PROTOCOL_VERSION);
    out.push(0); // reserved
    out.push(compression as u8);
    out.push(payload_kind as u8);
    out.extend_from_slice(&message_id);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&[0u8; 8]); // reserved
    out.extend_from_slice(payload);
    out
}

/// Decodes a frame. Fails closed on anything that doesn't exactly match
/// the wire contract — unknown version, a too-short buffer, or a declared
/// length that doesn't match the actual remaining bytes.
pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
    if bytes.len() < HEADER_LEN {
        return Err(FrameError::TooSmall);
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(FrameError::UnsupportedVersion);
    }

    let compression = Compression::from_byte(bytes[2]).ok_or(FrameError::Invalid)?;
    let payload_kind = PayloadKind::from_byte(bytes[3]).ok_or(FrameError::Invalid)?;

    let mut message_id = [0u8; 16];
    message_id.copy_from_slice(&bytes[4..20]);

    let declared_len = u32::from_be_bytes(bytes[20..24].try_into().unwrap()) as usize;
    let actual_tail = bytes.len() - HEADER_LEN;
    if declared_len != actual_tail {
        return Err(FrameError::PayloadIncomplete);
    }

    let payload = bytes[HEADER_LEN..].to_vec();

    Ok(Frame {
        compression,
        payload_kind,
        message_id,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mid(n: u8) -> [u8; 16] {
        let mut id = [0u8; 16];
        id[0] = n;
        id
    }

    #[test]
    fn round_trips_a_small_json_payload() {
        let payload = br#"{"action":"studies.search"}"#;
        let encoded = encode(mid(1), Compression::None, PayloadKind::Json, payload);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.message_id, mid(1));
        assert_eq!(decoded.compression, Compression::None);
        assert_eq!(decoded.payload_kind, PayloadKind::Json);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn round_trips_a_large_binary_payload() {
        let payload = vec![0xABu8; 5 * 1024 * 1024];
        let encoded = encode(mid(9), Compression::Gzip, PayloadKind::Binary, &payload);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.payload, payload);
        assert_eq!(decoded.compression, Compression::Gzip);
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut encoded = encode(mid(2), Compression::None, PayloadKind::Text, b"hi");
        encoded[0] = 9;
        assert_eq!(decode(&encoded), Err(FrameError::UnsupportedVersion));
    }

    #[test]
    fn rejects_frame_shorter_than_header() {
        let short = vec![1u8; 10];
        assert_eq!(decode(&short), Err(FrameError::TooSmall));
    }

    #[test]
    fn rejects_declared_length_longer_than_actual_tail() {
        let mut encoded = encode(mid(3), Compression::None, PayloadKind::Json, b"{}");
        // Inflate the declared length beyond what's actually present.
        encoded[20..24].copy_from_slice(&999u32.to_be_bytes());
        assert_eq!(decode(&encoded), Err(FrameError::PayloadIncomplete));
    }

    #[test]
    fn rejects_unknown_payload_kind() {
        let mut encoded = encode(mid(4), Compression::None, PayloadKind::Json, b"{}");
        encoded[3] = 200;
        assert_eq!(decode(&encoded), Err(FrameError::Invalid));
    }

    #[test]
    fn empty_payload_round_trips() {
        let encoded = encode(mid(5), Compression::None, PayloadKind::Json, b"");
        let decoded = decode(&encoded).unwrap();
        assert!(decoded.payload.is_empty());
    }

    proptest! {
        #[test]
        fn arbitrary_payloads_round_trip(payload in prop::collection::vec(any::<u8>(), 0..8192)) {
            let encoded = encode(mid(7), Compression::None, PayloadKind::Binary, &payload);
            let decoded = decode(&encoded).unwrap();
            prop_assert_eq!(decoded.payload, payload);
        }
    }
}
