// SPDX-License-Identifier: MIT OR Apache-2.0
//! Push envelope schema matching (spec.md §4.1, §6).
//!
//! A push notification is `{ message: { attributes, data } }`. It matches
//! exactly one of two schemas: an object-store notification (requires
//! `payloadFormat`, `eventType`, `bucketId`, `objectId`) or a DICOMweb
//! notification (requires only `data`). Anything matching neither is
//! `BadSchema`.

use base64::Engine;
use ingest_core::ObjectEventType;
use ingest_error::IngestError;
use serde::Deserialize;
use serde_json::Value;

/// Suffixes an object-store notification's `objectId` must match to be
/// eligible for ingestion (spec.md §4.1).
const ELIGIBLE_OBJECT_SUFFIXES: &[&str] = &[".dcm", ".DCM", ".dicom", ".zip"];

/// Raw push envelope, as received from the transport (spec.md §4.1).
#[derive(Debug, Clone, Deserialize)]
pub struct PushEnvelope {
    /// The wrapped message.
    pub message: PushMessage,
}

/// The `message` field of a push envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct PushMessage {
    /// Transport-level attributes (object-store notifications only).
    #[serde(default)]
    pub attributes: Option<Value>,
    /// Base64-encoded payload.
    pub data: String,
}

/// One decoded object-store notification.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreNotificationData {
    /// Bucket name.
    pub bucket: String,
    /// Object name.
    pub name: String,
    /// Object generation, stringified.
    #[serde(default)]
    pub generation: Option<serde_json::Value>,
}

/// A push envelope resolved to its matched schema (spec.md §4.1).
#[derive(Debug, Clone)]
pub enum MatchedEnvelope {
    /// An object-store change notification.
    ObjectStore {
        /// The event kind.
        event_type: ObjectEventType,
        /// Decoded `data` payload.
        data: ObjectStoreNotificationData,
    },
    /// A DICOMweb push notification carrying a bare path string.
    DicomWeb {
        /// The decoded path string.
        path: String,
    },
}

fn decode_base64_utf8(data: &str) -> Result<String, IngestError> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| IngestError::bad_schema(format!("data is not valid base64: {e}")))?;
    String::from_utf8(decoded).map_err(|e| IngestError::bad_schema(format!("decoded data is not valid UTF-8: {e}")))
}

fn matches_object_store_schema(attrs: &Value) -> bool {
    let payload_format_ok = attrs.get("payloadFormat").and_then(Value::as_str) == Some("JSON_API_V1");
    let event_type_ok = attrs
        .get("eventType")
        .and_then(Value::as_str)
        .and_then(ObjectEventType::parse)
        .is_some();
    let bucket_ok = attrs.get("bucketId").and_then(Value::as_str).is_some();
    let object_ok = attrs
        .get("objectId")
        .and_then(Value::as_str)
        .map(|id| ELIGIBLE_OBJECT_SUFFIXES.iter().any(|suffix| id.ends_with(suffix)))
        .unwrap_or(false);
    payload_format_ok && event_type_ok && bucket_ok && object_ok
}

/// Matches a push envelope against the object-store and DICOMweb schemas,
/// decoding `data` along the way (spec.md §4.1, §6: "`data` decoded from
/// base64 is JSON `{bucket, name, generation}`" / "a path string").
pub fn match_envelope(envelope: &PushEnvelope) -> Result<MatchedEnvelope, IngestError> {
    if let Some(attrs) = &envelope.message.attributes {
        if matches_object_store_schema(attrs) {
            let event_type = attrs
                .get("eventType")
                .and_then(Value::as_str)
                .and_then(ObjectEventType::parse)
                .ok_or_else(|| IngestError::bad_schema("unrecognised eventType"))?;
            let decoded = decode_base64_utf8(&envelope.message.data)?;
            let data: ObjectStoreNotificationData = serde_json::from_str(&decoded)
                .map_err(|e| IngestError::bad_schema(format!("data did not decode to {{bucket,name,generation}}: {e}")))?;
            return Ok(MatchedEnvelope::ObjectStore { event_type, data });
        }
    }

    let path = decode_base64_utf8(&envelope.message.data)?;
    if path.is_empty() {
        return Err(IngestError::bad_schema(
            "envelope matched neither the object-store nor the dicomweb notification schema",
        ));
    }
    Ok(MatchedEnvelope::DicomWeb { path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(s: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(s.as_bytes())
    }

    #[test]
    fn matches_object_store_finalize_notification() {
        let data = encode(&serde_json::to_string(&json!({"bucket": "b", "name": "o.dcm", "generation": "1"})).unwrap());
        let envelope = PushEnvelope {
            message: PushMessage {
                attributes: Some(json!({
                    "payloadFormat": "JSON_API_V1",
                    "eventType": "finalize",
                    "bucketId": "b",
                    "objectId": "o.dcm",
                })),
                data,
            },
        };
        let matched = match_envelope(&envelope).unwrap();
        assert!(matches!(
            matched,
            MatchedEnvelope::ObjectStore {
                event_type: ObjectEventType::ObjectFinalize,
                ..
            }
        ));
    }

    #[test]
    fn matches_dicomweb_notification_with_no_attributes() {
        let envelope = PushEnvelope {
            message: PushMessage {
                attributes: None,
                data: encode("studies/1.2.3/series/1.2.3.4/instances/1.2.3.4.5"),
            },
        };
        let matched = match_envelope(&envelope).unwrap();
        assert!(matches!(matched, MatchedEnvelope::DicomWeb { .. }));
    }

    #[test]
    fn rejects_object_store_attrs_with_unrecognised_suffix() {
        let data = encode(&serde_json::to_string(&json!({"bucket": "b", "name": "o.txt"})).unwrap());
        let envelope = PushEnvelope {
            message: PushMessage {
                attributes: Some(json!({
                    "payloadFormat": "JSON_API_V1",
                    "eventType": "finalize",
                    "bucketId": "b",
                    "objectId": "o.txt",
                })),
                data,
            },
        };
        // objectId fails the suffix check, so attrs don't match the
        // object-store schema; falls through to dicomweb, whose only
        // requirement (non-empty decoded data) the json payload satisfies.
        let matched = match_envelope(&envelope).unwrap();
        assert!(matches!(matched, MatchedEnvelope::DicomWeb { .. }));
    }

    #[test]
    fn invalid_base64_is_bad_schema() {
        let envelope = PushEnvelope {
            message: PushMessage {
                attributes: None,
                data: "not-valid-base64!!".to_string(),
            },
        };
        let err = match_envelope(&envelope).unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn empty_decoded_data_is_bad_schema() {
        let envelope = PushEnvelope {
            message: PushMessage {
                attributes: None,
                data: encode(""),
            },
        };
        let err = match_envelope(&envelope).unwrap_err();
        assert_eq!(err.status(), 400);
    }
}
