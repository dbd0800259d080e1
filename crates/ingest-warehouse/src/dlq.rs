// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dead-letter row parsing for DLQ remediation (spec.md §4.9).
//!
//! Pub/Sub dead-letters the notification envelope verbatim: a base64 `data`
//! field (the original push payload) plus an `attributes` map (the same
//! facts Pub/Sub also promotes to message attributes, not always present).
//! Remediation needs `(bucket, name, generation)` to re-touch the object;
//! it prefers what's encoded in `data` and falls back to `attributes` only
//! when `data` is missing or undecodable.

use base64::Engine;
use ingest_error::IngestError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

/// One row of the BigQuery dead-letter sink table.
#[derive(Debug, Clone, Deserialize)]
pub struct DeadLetterRow {
    /// Base64-encoded original Pub/Sub message body, if captured.
    pub data: Option<String>,
    /// Pub/Sub message attributes, as a JSON object.
    pub attributes: Option<Value>,
    /// Pub/Sub message id, used to delete the row after remediation.
    pub message_id: String,
    /// Subscription the dead-letter arrived from.
    pub subscription_name: String,
    /// When Pub/Sub published the dead-lettered message.
    pub publish_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// The object identity remediation needs to re-touch a dead-lettered
/// notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeadLetterTarget {
    /// GCS bucket name.
    pub bucket: String,
    /// Object name (path) within the bucket.
    pub name: String,
    /// Object generation, if known.
    pub generation: Option<String>,
    /// The source row's message id, carried through for later deletion.
    pub message_id: String,
}

fn extract_from_json(value: &Value) -> Option<(String, String, Option<String>)> {
    let bucket = value.get("bucket")?.as_str()?.to_string();
    let name = value.get("name")?.as_str()?.to_string();
    let generation = value
        .get("generation")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| value.get("generation").and_then(Value::as_i64).map(|g| g.to_string()));
    Some((bucket, name, generation))
}

/// Derives the `(bucket, name, generation)` target from one dead-letter
/// row. Tries the decoded `data` payload first, falling back to
/// `attributes` only if `data` is absent, not valid base64, or not valid
/// JSON with the expected fields.
pub fn derive_target(row: &DeadLetterRow) -> Result<DeadLetterTarget, IngestError> {
    if let Some(data) = &row.data {
        if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(data) {
            if let Ok(value) = serde_json::from_slice::<Value>(&decoded) {
                if let Some((bucket, name, generation)) = extract_from_json(&value) {
                    return Ok(DeadLetterTarget {
                        bucket,
                        name,
                        generation,
                        message_id: row.message_id.clone(),
                    });
                }
            }
        }
    }

    if let Some(attrs) = &row.attributes {
        if let Some((bucket, name, generation)) = extract_from_json(attrs) {
            return Ok(DeadLetterTarget {
                bucket,
                name,
                generation,
                message_id: row.message_id.clone(),
            });
        }
    }

    Err(IngestError::invalid_input(format!(
        "dead-letter row {} has no recoverable bucket/name in data or attributes",
        row.message_id
    )))
}

/// Parses and deduplicates a batch of dead-letter rows by `bucket/name`,
/// keeping the first occurrence (rows are expected newest-first per
/// [`crate::query::build_dlq_items`]'s ordering). Rows with unrecoverable
/// targets are dropped and counted, never fail the whole batch.
pub fn dedupe_targets(rows: &[DeadLetterRow]) -> (Vec<DeadLetterTarget>, usize) {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut skipped = 0;
    for row in rows {
        match derive_target(row) {
            Ok(target) => {
                let key = format!("{}/{}", target.bucket, target.name);
                if seen.insert(key) {
                    out.push(target);
                }
            }
            Err(_) => skipped += 1,
        }
    }
    (out, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(value: &Value) -> String {
        base64::engine::general_purpose::STANDARD.encode(serde_json::to_vec(value).unwrap())
    }

    #[test]
    fn prefers_data_over_attributes_when_both_present() {
        let row = DeadLetterRow {
            data: Some(encode(&json!({"bucket": "data-bucket", "name": "o1", "generation": "5"}))),
            attributes: Some(json!({"bucket": "attr-bucket", "name": "o2"})),
            message_id: "m1".into(),
            subscription_name: "sub".into(),
            publish_time: None,
        };
        let target = derive_target(&row).unwrap();
        assert_eq!(target.bucket, "data-bucket");
        assert_eq!(target.name, "o1");
        assert_eq!(target.generation.as_deref(), Some("5"));
    }

    #[test]
    fn falls_back_to_attributes_when_data_missing() {
        let row = DeadLetterRow {
            data: None,
            attributes: Some(json!({"bucket": "b", "name": "o"})),
            message_id: "m2".into(),
            subscription_name: "sub".into(),
            publish_time: None,
        };
        let target = derive_target(&row).unwrap();
        assert_eq!(target.bucket, "b");
        assert_eq!(target.name, "o");
    }

    #[test]
    fn falls_back_to_attributes_when_data_undecodable() {
        let row = DeadLetterRow {
            data: Some("not-valid-base64!!".into()),
            attributes: Some(json!({"bucket": "b", "name": "o"})),
            message_id: "m3".into(),
            subscription_name: "sub".into(),
            publish_time: None,
        };
        let target = derive_target(&row).unwrap();
        assert_eq!(target.bucket, "b");
    }

    #[test]
    fn fails_when_neither_source_has_bucket_and_name() {
        let row = DeadLetterRow {
            data: None,
            attributes: None,
            message_id: "m4".into(),
            subscription_name: "sub".into(),
            publish_time: None,
        };
        assert!(derive_target(&row).is_err());
    }

    #[test]
    fn dedupes_by_bucket_and_name_keeping_first() {
        let rows = vec![
            DeadLetterRow {
                data: Some(encode(&json!({"bucket": "b", "name": "o"}))),
                attributes: None,
                message_id: "newest".into(),
                subscription_name: "sub".into(),
                publish_time: None,
            },
            DeadLetterRow {
                data: Some(encode(&json!({"bucket": "b", "name": "o"}))),
                attributes: None,
                message_id: "oldest".into(),
                subscription_name: "sub".into(),
                publish_time: None,
            },
        ];
        let (targets, skipped) = dedupe_targets(&rows);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].message_id, "newest");
        assert_eq!(skipped, 0);
    }

    #[test]
    fn unrecoverable_rows_are_skipped_not_fatal() {
        let rows = vec![
            DeadLetterRow {
                data: None,
                attributes: None,
                message_id: "bad".into(),
                subscription_name: "sub".into(),
                publish_time: None,
            },
            DeadLetterRow {
                data: Some(encode(&json!({"bucket": "b", "name": "o"}))),
                attributes: None,
                message_id: "good".into(),
                subscription_name: "sub".into(),
                publish_time: None,
            },
        ];
        let (targets, skipped) = dedupe_targets(&rows);
        assert_eq!(targets.len(), 1);
        assert_eq!(skipped, 1);
    }
}
