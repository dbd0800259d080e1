// SPDX-License-Identifier: MIT OR Apache-2.0
//! Row Persister: deterministic id derivation and schema-conformant row
//! assembly (spec.md §4.6).
//!
//! `info` is populated even when nested fields are null — the warehouse
//! schema is a fixed RECORD and rejects missing required sub-fields, so
//! every leaf is always present, just sometimes `null`.

use ingest_core::{EmbeddingInfo, EmbeddingInputInfo, Info, InputInfo, IngestionRecord, ObjectEventType};

/// The embedding artifact actually produced for one instance, already
/// uploaded/embedded by the caller. `None` means no embedding was
/// attempted for this row.
#[derive(Debug, Clone)]
pub struct PersistedEmbedding {
    /// Model id used for the embedding call.
    pub model: String,
    /// Path the embedding input artifact was uploaded to (image track
    /// only; `None` for text tracks, which embed inline).
    pub path: Option<String>,
    /// Size of the embedding input, in bytes.
    pub size: i64,
    /// MIME type of the embedding input.
    pub mime_type: String,
    /// The resulting vector.
    pub vector: Vec<f32>,
}

/// Builds a metadata-only row for `delete`/`archive` events: no download,
/// no embedding, `metadata = null` (spec.md §4.2, §3 invariant b).
pub fn build_metadata_only_record(path: String, version: String, event: ObjectEventType) -> IngestionRecord {
    IngestionRecord {
        id: IngestionRecord::derive_id(&path, &version),
        timestamp: chrono::Utc::now(),
        path,
        version,
        info: Info {
            event: event.as_str().to_string(),
            input: InputInfo {
                size: None,
                input_type: Some("GCS".to_string()),
            },
            embedding: None,
        },
        metadata: None,
        embedding_vector: Vec::new(),
    }
}

/// Builds a row for a downloaded-and-processed DICOM instance (spec.md
/// §4.6). `embedding` is `None` when the embedding track was skipped
/// (unsupported SOP class, unsupported transfer syntax, or text too long
/// with no summarization model configured) — spec.md §3 invariant (c)
/// requires `embeddingVector` only be present when `info.embedding.model`
/// is set, so an empty vector is used whenever `embedding` is `None`.
pub fn build_processed_record(
    path: String,
    version: String,
    event: ObjectEventType,
    input_type: &str,
    input_size: i64,
    metadata_json: String,
    embedding: Option<PersistedEmbedding>,
) -> IngestionRecord {
    let (embedding_info, embedding_vector) = match embedding {
        Some(embedding) => (
            Some(EmbeddingInfo {
                model: Some(embedding.model),
                input: EmbeddingInputInfo {
                    path: embedding.path,
                    size: Some(embedding.size),
                    mime_type: Some(embedding.mime_type),
                },
            }),
            embedding.vector,
        ),
        None => (None, Vec::new()),
    };

    IngestionRecord {
        id: IngestionRecord::derive_id(&path, &version),
        timestamp: chrono::Utc::now(),
        path,
        version,
        info: Info {
            event: event.as_str().to_string(),
            input: InputInfo {
                size: Some(input_size),
                input_type: Some(input_type.to_string()),
            },
            embedding: embedding_info,
        },
        metadata: Some(metadata_json),
        embedding_vector,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_only_record_has_null_metadata_and_no_embedding() {
        let record = build_metadata_only_record("b/o.dcm".to_string(), "1".to_string(), ObjectEventType::ObjectDelete);
        assert!(record.metadata.is_none());
        assert!(record.info.embedding.is_none());
        assert!(record.embedding_vector.is_empty());
        assert_eq!(record.info.input.input_type.as_deref(), Some("GCS"));
    }

    #[test]
    fn id_is_deterministic_function_of_path_and_version() {
        let a = build_metadata_only_record("b/o.dcm".to_string(), "1".to_string(), ObjectEventType::ObjectArchive);
        let b = build_metadata_only_record("b/o.dcm".to_string(), "1".to_string(), ObjectEventType::ObjectArchive);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn processed_record_without_embedding_has_no_vector() {
        let record = build_processed_record(
            "b/o.dcm".to_string(),
            "1".to_string(),
            ObjectEventType::ObjectFinalize,
            "GCS",
            1024,
            "{}".to_string(),
            None,
        );
        assert!(record.info.embedding.is_none());
        assert!(record.embedding_vector.is_empty());
        assert_eq!(record.metadata.as_deref(), Some("{}"));
    }

    #[test]
    fn processed_record_with_embedding_carries_model_and_vector() {
        let record = build_processed_record(
            "b/o.dcm".to_string(),
            "1".to_string(),
            ObjectEventType::ObjectFinalize,
            "GCS",
            1024,
            "{}".to_string(),
            Some(PersistedEmbedding {
                model: "multimodalembedding@001".to_string(),
                path: Some("study/series/instance.jpg".to_string()),
                size: 2048,
                mime_type: "image/jpeg".to_string(),
                vector: vec![0.1, 0.2],
            }),
        );
        let embedding = record.info.embedding.unwrap();
        assert_eq!(embedding.model.as_deref(), Some("multimodalembedding@001"));
        assert_eq!(embedding.input.path.as_deref(), Some("study/series/instance.jpg"));
        assert_eq!(record.embedding_vector, vec![0.1, 0.2]);
    }
}
