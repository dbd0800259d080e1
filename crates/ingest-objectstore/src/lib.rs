// SPDX-License-Identifier: MIT OR Apache-2.0
//! Object store client trait and GCS-backed implementation (spec.md §4.1,
//! §4.9, §6).
//!
//! The ingestion state machine and DLQ remediation path only need three
//! operations against the object store: download an object's bytes,
//! check whether an object still exists, and set a custom metadata key to
//! trigger a `metadata_update` notification. [`ObjectStoreClient`] is kept
//! to exactly that surface so the rest of the pipeline never depends on
//! the GCS SDK directly — the re-architecture note in spec.md §9 turns the
//! module-level singleton client into a constructor-injected `Arc<dyn
//! ObjectStoreClient>`.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use ingest_error::IngestError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Identifies one object, optionally pinned to a specific generation
/// (spec.md §6 "object-store write-back protocol").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Bucket name.
    pub bucket: String,
    /// Object name (path within the bucket).
    pub name: String,
    /// Object generation, when known. `None` means "current live version".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,
}

impl ObjectRef {
    /// Creates a reference to the current live generation of an object.
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
            generation: None,
        }
    }

    /// Canonical `{bucket}/{name}` URI used as the ingestion record's
    /// `path` (spec.md §3).
    pub fn canonical_uri(&self) -> String {
        format!("{}/{}", self.bucket, self.name)
    }
}

/// Errors from object store operations, already classified per
/// spec.md §4.7/§7 (not-found and permission failures are permanent;
/// network/timeout failures are retryable).
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// The object doesn't exist (or was already deleted).
    #[error("object not found: {0}")]
    NotFound(String),
    /// The caller isn't authorized for this bucket/object.
    #[error("access denied: {0}")]
    AccessDenied(String),
    /// Network error, timeout, or other transient failure.
    #[error("transient object store error: {0}")]
    Transient(String),
    /// Anything else.
    #[error("object store error: {0}")]
    Other(String),
}

impl From<ObjectStoreError> for IngestError {
    fn from(err: ObjectStoreError) -> Self {
        match err {
            ObjectStoreError::NotFound(msg) => IngestError::invalid_input(msg),
            ObjectStoreError::AccessDenied(msg) => {
                IngestError::new(ingest_error::ErrorKind::Forbidden, msg)
            }
            ObjectStoreError::Transient(msg) => IngestError::transient(msg),
            ObjectStoreError::Other(msg) => IngestError::internal(msg),
        }
    }
}

/// Downloaded object bytes plus the metadata the state machine needs to
/// build an ingestion record (spec.md §3 `info.input`).
#[derive(Debug, Clone)]
pub struct DownloadedObject {
    /// Raw object bytes.
    pub bytes: Vec<u8>,
    /// Object size, in bytes, as reported by the store (may differ from
    /// `bytes.len()` only in pathological truncated-download cases, which
    /// this client surfaces as [`ObjectStoreError::Transient`] instead).
    pub size: i64,
    /// Object generation, stringified for the ingestion record's
    /// `version` field (spec.md §3).
    pub generation: String,
}

/// The object store operations the ingestion pipeline depends on.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Downloads the full object body.
    async fn download(&self, obj: &ObjectRef) -> Result<DownloadedObject, ObjectStoreError>;

    /// Checks whether the object currently exists (spec.md §4.9: DLQ
    /// requeue verifies existence before touching metadata).
    async fn exists(&self, obj: &ObjectRef) -> Result<bool, ObjectStoreError>;

    /// Sets a custom metadata key on the object, which the object store
    /// observes as a `metadata_update` notification on the subscription
    /// (spec.md §4.9, §6) — the reprocessing trigger for DLQ remediation.
    async fn set_metadata(
        &self,
        obj: &ObjectRef,
        key: &str,
        value: &str,
    ) -> Result<(), ObjectStoreError>;

    /// Uploads bytes to the processed-data bucket (spec.md §4.4 step 2:
    /// rendered JPEG artifacts land at `{study}/{series}/{instance}.jpg`).
    async fn upload(
        &self,
        obj: &ObjectRef,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<(), ObjectStoreError>;
}

/// GCS-backed [`ObjectStoreClient`].
pub struct GcsObjectStore {
    client: google_cloud_storage::client::Client,
}

impl GcsObjectStore {
    /// Builds a client using Application Default Credentials, the way a
    /// server process running on GCP infrastructure authenticates.
    pub async fn new() -> Result<Self, ObjectStoreError> {
        let config = google_cloud_storage::client::ClientConfig::default()
            .with_auth()
            .await
            .map_err(|e| ObjectStoreError::Other(e.to_string()))?;
        Ok(Self {
            client: google_cloud_storage::client::Client::new(config),
        })
    }

    /// Wraps an already-constructed SDK client (used by the daemon's
    /// startup wiring and by tests that don't want to hit ADC).
    pub fn from_client(client: google_cloud_storage::client::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStoreClient for GcsObjectStore {
    async fn download(&self, obj: &ObjectRef) -> Result<DownloadedObject, ObjectStoreError> {
        use google_cloud_storage::http::objects::download::Range;
        use google_cloud_storage::http::objects::get::GetObjectRequest;

        let request = GetObjectRequest {
            bucket: obj.bucket.clone(),
            object: obj.name.clone(),
            generation: obj.generation.as_ref().and_then(|g| g.parse().ok()),
            ..Default::default()
        };
        let bytes = self
            .client
            .download_object(&request, &Range::default())
            .await
            .map_err(classify_gcs_error)?;

        let metadata = self
            .client
            .get_object(&request)
            .await
            .map_err(classify_gcs_error)?;

        Ok(DownloadedObject {
            size: bytes.len() as i64,
            generation: metadata.generation.to_string(),
            bytes,
        })
    }

    async fn exists(&self, obj: &ObjectRef) -> Result<bool, ObjectStoreError> {
        use google_cloud_storage::http::objects::get::GetObjectRequest;

        let request = GetObjectRequest {
            bucket: obj.bucket.clone(),
            object: obj.name.clone(),
            ..Default::default()
        };
        match self.client.get_object(&request).await {
            Ok(_) => Ok(true),
            Err(err) => match classify_gcs_error(err) {
                ObjectStoreError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn set_metadata(
        &self,
        obj: &ObjectRef,
        key: &str,
        value: &str,
    ) -> Result<(), ObjectStoreError> {
        use google_cloud_storage::http::objects::patch::PatchObjectRequest;
        use google_cloud_storage::http::objects::Object;
        use std::collections::HashMap;

        let mut metadata = HashMap::new();
        metadata.insert(key.to_string(), value.to_string());

        let request = PatchObjectRequest {
            bucket: obj.bucket.clone(),
            object: obj.name.clone(),
            metadata: Object {
                metadata: Some(metadata),
                ..Default::default()
            },
            ..Default::default()
        };
        self.client
            .patch_object(&request)
            .await
            .map(|_| ())
            .map_err(classify_gcs_error)
    }

    async fn upload(
        &self,
        obj: &ObjectRef,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<(), ObjectStoreError> {
        use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};

        let request = UploadObjectRequest {
            bucket: obj.bucket.clone(),
            ..Default::default()
        };
        let media = Media {
            name: obj.name.clone().into(),
            content_type: content_type.to_string().into(),
            content_length: Some(bytes.len() as u64),
        };
        self.client
            .upload_object(&request, bytes, &UploadType::Simple(media))
            .await
            .map(|_| ())
            .map_err(classify_gcs_error)
    }
}

fn classify_gcs_error(err: google_cloud_storage::http::Error) -> ObjectStoreError {
    let message = err.to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("404") || lower.contains("not found") {
        ObjectStoreError::NotFound(message)
    } else if lower.contains("401") || lower.contains("403") || lower.contains("forbidden") {
        ObjectStoreError::AccessDenied(message)
    } else if lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("reset")
        || lower.contains("connection")
        || lower.contains("429")
        || lower.contains("5")
    {
        ObjectStoreError::Transient(message)
    } else {
        ObjectStoreError::Other(message)
    }
}

/// Shared handle type injected into router state and pipeline orchestration.
pub type SharedObjectStore = Arc<dyn ObjectStoreClient>;

/// In-memory [`ObjectStoreClient`] double, exposed for `ingest-pipeline`
/// and `ingest-daemon` test suites under the `test-util` feature so they
/// don't each need their own fake.
#[cfg(any(test, feature = "test-util"))]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// In-memory fake backing store, keyed by [`ObjectRef::canonical_uri`].
    #[derive(Default)]
    pub struct FakeObjectStore {
        /// `canonical_uri -> (bytes, generation)`.
        pub objects: Mutex<std::collections::HashMap<String, (Vec<u8>, String)>>,
        /// Every `upload` call, in order.
        pub uploads: Mutex<Vec<(String, String, Vec<u8>)>>,
        /// Every `set_metadata` call, in order.
        pub touched: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl ObjectStoreClient for FakeObjectStore {
        async fn download(&self, obj: &ObjectRef) -> Result<DownloadedObject, ObjectStoreError> {
            let objects = self.objects.lock().unwrap();
            let (bytes, generation) = objects
                .get(&obj.canonical_uri())
                .cloned()
                .ok_or_else(|| ObjectStoreError::NotFound(obj.canonical_uri()))?;
            Ok(DownloadedObject {
                size: bytes.len() as i64,
                generation,
                bytes,
            })
        }

        async fn exists(&self, obj: &ObjectRef) -> Result<bool, ObjectStoreError> {
            Ok(self.objects.lock().unwrap().contains_key(&obj.canonical_uri()))
        }

        async fn set_metadata(
            &self,
            obj: &ObjectRef,
            key: &str,
            value: &str,
        ) -> Result<(), ObjectStoreError> {
            self.touched.lock().unwrap().push((
                obj.canonical_uri(),
                key.to_string(),
                value.to_string(),
            ));
            Ok(())
        }

        async fn upload(
            &self,
            obj: &ObjectRef,
            content_type: &str,
            bytes: Vec<u8>,
        ) -> Result<(), ObjectStoreError> {
            self.uploads
                .lock()
                .unwrap()
                .push((obj.canonical_uri(), content_type.to_string(), bytes));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeObjectStore;
    use super::*;

    #[test]
    fn canonical_uri_joins_bucket_and_name() {
        let obj = ObjectRef::new("b", "path/to/o.dcm");
        assert_eq!(obj.canonical_uri(), "b/path/to/o.dcm");
    }

    #[tokio::test]
    async fn fake_store_round_trips_download() {
        let store = FakeObjectStore::default();
        store
            .objects
            .lock()
            .unwrap()
            .insert("b/o.dcm".to_string(), (vec![1, 2, 3], "42".to_string()));
        let downloaded = store.download(&ObjectRef::new("b", "o.dcm")).await.unwrap();
        assert_eq!(downloaded.bytes, vec![1, 2, 3]);
        assert_eq!(downloaded.generation, "42");
    }

    #[tokio::test]
    async fn fake_store_reports_missing_object() {
        let store = FakeObjectStore::default();
        let err = store.download(&ObjectRef::new("b", "missing.dcm")).await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn fake_store_records_metadata_touch() {
        let store = FakeObjectStore::default();
        store
            .set_metadata(&ObjectRef::new("b", "o.dcm"), "reprocess", "2026-07-28T00:00:00Z")
            .await
            .unwrap();
        let touched = store.touched.lock().unwrap();
        assert_eq!(touched.len(), 1);
        assert_eq!(touched[0].1, "reprocess");
    }

    #[test]
    fn not_found_converts_to_invalid_input() {
        let err: IngestError = ObjectStoreError::NotFound("b/o.dcm".into()).into();
        assert!(!err.retryable());
        assert_eq!(err.status(), 422);
    }

    #[test]
    fn transient_converts_to_retryable() {
        let err: IngestError = ObjectStoreError::Transient("connection reset".into()).into();
        assert!(err.retryable());
    }
}
