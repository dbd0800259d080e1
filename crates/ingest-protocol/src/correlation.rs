// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request correlation for the WS-to-HTTP loopback (spec.md §3, §4.10).
//!
//! When the WS layer proxies an action to the internal HTTP surface over
//! `127.0.0.1`, it signs the request with an in-process secret so the HTTP
//! side can tell a trusted loopback call from an external impersonation
//! attempt. The secret is generated once at process start, lives only in
//! memory, and is never persisted (spec.md §3, §5).

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// 32-byte correlation secret, generated once per process.
#[derive(Clone)]
pub struct CorrelationSecret(Vec<u8>);

impl CorrelationSecret {
    /// Generates a fresh secret. Uses `uuid::Uuid::new_v4` bytes doubled to
    /// 32 bytes as a source of process-local entropy — this secret only
    /// needs to resist guessing by an external client within one process
    /// lifetime, not long-term key-management properties.
    pub fn generate() -> Self {
        let a = uuid::Uuid::new_v4();
        let b = uuid::Uuid::new_v4();
        let mut bytes = Vec::with_capacity(32);
        bytes.extend_from_slice(a.as_bytes());
        bytes.extend_from_slice(b.as_bytes());
        Self(bytes)
    }

    #[cfg(test)]
    fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Builds the signing string `"connId|msgIdHex|action"`.
fn signing_string(connection_id: &str, message_id_hex: &str, action: &str) -> String {
    format!("{connection_id}|{message_id_hex}|{action}")
}

/// Computes the HMAC-SHA256 correlation signature, hex-encoded.
pub fn sign(
    secret: &CorrelationSecret,
    connection_id: &str,
    message_id_hex: &str,
    action: &str,
) -> String {
    let mut mac = HmacSha256::new_from_slice(&secret.0).expect("HMAC accepts any key length");
    mac.update(signing_string(connection_id, message_id_hex, action).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a correlation signature in constant time with respect to the
/// comparison itself. A length mismatch short-circuits (spec.md §8:
/// "lengths must match exactly or the comparison returns false without
/// leaking timing information on prefix matches") — the computed digest is
/// always a fixed 32-byte HMAC-SHA256 output, so the caller's hex string
/// length is checked before ever touching the constant-time comparator.
pub fn verify(
    secret: &CorrelationSecret,
    connection_id: &str,
    message_id_hex: &str,
    action: &str,
    signature_hex: &str,
) -> bool {
    let expected = sign(secret, connection_id, message_id_hex, action);
    if expected.len() != signature_hex.len() {
        return false;
    }
    expected.as_bytes().ct_eq(signature_hex.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> CorrelationSecret {
        CorrelationSecret::from_bytes(vec![0x42; 32])
    }

    #[test]
    fn sign_is_deterministic_for_the_same_inputs() {
        let s = secret();
        let a = sign(&s, "conn-1", "00112233", "studies.search");
        let b = sign(&s, "conn-1", "00112233", "studies.search");
        assert_eq!(a, b);
    }

    #[test]
    fn sign_differs_when_any_input_changes() {
        let s = secret();
        let base = sign(&s, "conn-1", "00112233", "studies.search");
        assert_ne!(base, sign(&s, "conn-2", "00112233", "studies.search"));
        assert_ne!(base, sign(&s, "conn-1", "00112234", "studies.search"));
        assert_ne!(base, sign(&s, "conn-1", "00112233", "studies.delete"));
    }

    #[test]
    fn verify_accepts_a_valid_signature() {
        let s = secret();
        let sig = sign(&s, "conn-1", "abcdef", "dlq.requeue");
        assert!(verify(&s, "conn-1", "abcdef", "dlq.requeue", &sig));
    }

    #[test]
    fn verify_rejects_a_tampered_signature() {
        let s = secret();
        let mut sig = sign(&s, "conn-1", "abcdef", "dlq.requeue");
        sig.replace_range(0..2, "ff");
        assert!(!verify(&s, "conn-1", "abcdef", "dlq.requeue", &sig));
    }

    #[test]
    fn verify_rejects_mismatched_length_without_panicking() {
        let s = secret();
        assert!(!verify(&s, "conn-1", "abcdef", "dlq.requeue", "short"));
        assert!(!verify(&s, "conn-1", "abcdef", "dlq.requeue", ""));
    }

    #[test]
    fn different_secrets_produce_different_signatures() {
        let a = CorrelationSecret::from_bytes(vec![1; 32]);
        let b = CorrelationSecret::from_bytes(vec![2; 32]);
        assert_ne!(
            sign(&a, "conn-1", "abcdef", "studies.search"),
            sign(&b, "conn-1", "abcdef", "studies.search")
        );
    }
}
