// SPDX-License-Identifier: MIT OR Apache-2.0
//! Action envelope and result encoding for the WS multiplex layer
//! (spec.md §4.10).

use serde::{Deserialize, Serialize};

/// Inbound JSON payload: `{ action, payload }`. Actions map one-to-one to
/// internal HTTP routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEnvelope {
    pub action: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A successful result, ready to be wrapped in a response frame.
#[derive(Debug, Clone)]
pub enum ActionResult {
    /// JSON results travel as payload-kind json.
    Json(serde_json::Value),
    /// Text results travel as payload-kind text.
    Text(String),
    /// Image (or other binary artifact) results travel as payload-kind
    /// binary: a 4-byte BE meta length, a JSON meta record, then raw bytes.
    Binary {
        meta: serde_json::Value,
        bytes: Vec<u8>,
    },
}

/// Encodes an [`ActionResult::Binary`] payload into the
/// `meta_len | meta_json | raw_bytes` layout spec.md §4.10 specifies.
pub fn encode_binary_result(meta: &serde_json::Value, bytes: &[u8]) -> Vec<u8> {
    let meta_json = serde_json::to_vec(meta).expect("meta is always serializable JSON");
    let mut out = Vec::with_capacity(4 + meta_json.len() + bytes.len());
    out.extend_from_slice(&(meta_json.len() as u32).to_be_bytes());
    out.extend_from_slice(&meta_json);
    out.extend_from_slice(bytes);
    out
}

/// Decodes a binary result payload back into its meta record and raw bytes.
pub fn decode_binary_result(payload: &[u8]) -> Option<(serde_json::Value, &[u8])> {
    if payload.len() < 4 {
        return None;
    }
    let meta_len = u32::from_be_bytes(payload[0..4].try_into().ok()?) as usize;
    let meta_end = 4 + meta_len;
    if payload.len() < meta_end {
        return None;
    }
    let meta: serde_json::Value = serde_json::from_slice(&payload[4..meta_end]).ok()?;
    Some((meta, &payload[meta_end..]))
}

/// The WS error frame payload shape: `{ type:"error", action, error, code }`
/// (spec.md §7), sharing the originating request's message id at the frame
/// level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsErrorPayload {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub action: String,
    pub error: String,
    pub code: String,
}

impl WsErrorPayload {
    pub fn new(action: impl Into<String>, error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            kind: "error",
            action: action.into(),
            error: error.into(),
            code: code.into(),
        }
    }
}

/// The WS success frame payload shape: `{ type:"result", action, data,
/// totalStudies? }` (spec.md §8 scenario 5), sharing the originating
/// request's message id at the frame level. `total_studies` is only set for
/// `studies.search`, the one action spec.md names an unpaginated total for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsResultPayload {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub action: String,
    pub data: serde_json::Value,
    #[serde(rename = "totalStudies", skip_serializing_if = "Option::is_none")]
    pub total_studies: Option<i64>,
}

impl WsResultPayload {
    pub fn new(action: impl Into<String>, data: serde_json::Value, total_studies: Option<i64>) -> Self {
        Self {
            kind: "result",
            action: action.into(),
            data,
            total_studies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_envelope_parses_from_json() {
        let raw = r#"{"action":"studies.search","payload":{"key":"PatientID","value":"P1"}}"#;
        let env: ActionEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.action, "studies.search");
        assert_eq!(env.payload["key"], "PatientID");
    }

    #[test]
    fn binary_result_round_trips() {
        let meta = json!({"mimeType": "image/jpeg", "size": 3});
        let bytes = vec![1u8, 2, 3];
        let encoded = encode_binary_result(&meta, &bytes);
        let (decoded_meta, decoded_bytes) = decode_binary_result(&encoded).unwrap();
        assert_eq!(decoded_meta, meta);
        assert_eq!(decoded_bytes, &bytes[..]);
    }

    #[test]
    fn decode_binary_result_rejects_truncated_meta() {
        let meta = json!({"a": 1});
        let mut encoded = encode_binary_result(&meta, &[9, 9]);
        encoded.truncate(5);
        assert!(decode_binary_result(&encoded).is_none());
    }

    #[test]
    fn error_payload_matches_wire_shape() {
        let err = WsErrorPayload::new("studies.search", "bad identifier", "INVALID_INPUT");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "INVALID_INPUT");
    }

    #[test]
    fn result_payload_nests_data_and_carries_total_studies() {
        let result = WsResultPayload::new("studies.search", json!({"items": []}), Some(3));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["type"], "result");
        assert_eq!(value["data"]["items"], json!([]));
        assert_eq!(value["totalStudies"], 3);
    }

    #[test]
    fn result_payload_omits_total_studies_when_not_applicable() {
        let result = WsResultPayload::new("instances.get", json!({"instance": null}), None);
        let value = serde_json::to_value(&result).unwrap();
        assert!(!value.as_object().unwrap().contains_key("totalStudies"));
    }
}
