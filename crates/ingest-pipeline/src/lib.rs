// SPDX-License-Identifier: MIT OR Apache-2.0
//! Orchestration: ties the Event Dispatcher, Ingestion State Machine, DICOM
//! Processor, Embedding Client, and Row Persister into one
//! `processAndPersist` invocation per concrete DICOM blob (spec.md §2, §4.1,
//! §4.2, §4.6).
//!
//! [`Pipeline`] owns the client handles ([`ObjectStoreClient`],
//! [`WarehouseClient`], [`EmbeddingClient`]) that the pure decision logic in
//! [`state_machine`], [`envelope`], and [`persister`] deliberately doesn't
//! know about. [`Pipeline::handle_push`] is the single entry point the
//! daemon's Event Dispatcher route calls.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod persister;
pub mod remediation;
pub mod state_machine;

use envelope::{match_envelope, MatchedEnvelope, PushEnvelope};
use ingest_config::EmbeddingInputConfig;
use ingest_core::ObjectEventType;
use ingest_dicom::{DicomProcessor, EmbeddingTrack, ProcessedDicom};
use ingest_embedding::{EmbeddingClient, EmbeddingInstance};
use ingest_error::IngestError;
use ingest_objectstore::{ObjectRef, ObjectStoreClient};
use ingest_perf::PerfContext;
use ingest_warehouse::WarehouseClient;
use persister::PersistedEmbedding;
use state_machine::ObjectStoreAction;
use std::sync::Arc;
use tracing::info;

/// Outcome of one `processAndPersist` invocation, returned up through the
/// dispatcher for logging/response purposes.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// The id of the row written (or that would have been written — equal
    /// across redeliveries of the same `(path, version)`).
    pub record_id: String,
    /// Canonical path the row is keyed on.
    pub path: String,
}

/// Per-archive-member failure, surfaced alongside any successes so a
/// partially-bad archive still reports which members failed (spec.md §4.3).
#[derive(Debug, Clone)]
pub struct MemberFailure {
    /// The member's name within the archive.
    pub member_name: String,
    /// What went wrong.
    pub reason: String,
}

/// Result of dispatching one push envelope: the ids written plus any
/// per-archive-member failures collected along the way.
#[derive(Debug, Clone, Default)]
pub struct DispatchResult {
    /// Successfully persisted rows.
    pub outcomes: Vec<IngestOutcome>,
    /// Archive members (or sub-invocations) that failed without aborting
    /// the rest of the batch.
    pub member_failures: Vec<MemberFailure>,
}

/// Orchestrates the ingestion path: dispatch, download/expand, process,
/// embed, persist. Cheap to clone (every field is an `Arc`); one instance is
/// built at daemon startup and shared across requests.
#[derive(Clone)]
pub struct Pipeline {
    object_store: Arc<dyn ObjectStoreClient>,
    warehouse: Arc<dyn WarehouseClient>,
    embedding_client: Option<Arc<dyn EmbeddingClient>>,
    dicom_processor: Arc<DicomProcessor>,
    embedding_config: EmbeddingInputConfig,
}

impl Pipeline {
    /// Builds a pipeline from its client handles. `embedding_client` is
    /// `None` when no vector model is configured — every processed instance
    /// is then persisted without an embedding, same as an unsupported SOP
    /// class (spec.md §4.4 step 3's "skip the embedding, not the record").
    pub fn new(
        object_store: Arc<dyn ObjectStoreClient>,
        warehouse: Arc<dyn WarehouseClient>,
        embedding_client: Option<Arc<dyn EmbeddingClient>>,
        dicom_processor: Arc<DicomProcessor>,
        embedding_config: EmbeddingInputConfig,
    ) -> Self {
        Self {
            object_store,
            warehouse,
            embedding_client,
            dicom_processor,
            embedding_config,
        }
    }

    /// Matches and dispatches one push envelope (spec.md §4.1). Acquires a
    /// [`PerfContext`] for the request and returns it alongside the result
    /// so the caller can log/attach the summary.
    pub async fn handle_push(
        &self,
        envelope: &PushEnvelope,
        request_id: impl Into<String>,
    ) -> (Result<DispatchResult, IngestError>, ingest_perf::PerfSummary) {
        let mut perf = PerfContext::start(request_id);
        let matched = match match_envelope(envelope) {
            Ok(matched) => matched,
            Err(e) => {
                perf.checkpoint("schema_match");
                return (Err(e), perf.finish());
            }
        };
        perf.checkpoint("schema_match");

        let result = match matched {
            MatchedEnvelope::ObjectStore { event_type, data } => {
                self.handle_object_store_event(event_type, data, &mut perf).await
            }
            MatchedEnvelope::DicomWeb { path } => self.handle_dicomweb_event(path, &mut perf).await,
        };
        perf.checkpoint("persist");
        (result, perf.finish())
    }

    async fn handle_object_store_event(
        &self,
        event_type: ObjectEventType,
        data: envelope::ObjectStoreNotificationData,
        perf: &mut PerfContext,
    ) -> Result<DispatchResult, IngestError> {
        let generation = data
            .generation
            .as_ref()
            .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|n| n.to_string())))
            .unwrap_or_default();
        let obj = ObjectRef {
            bucket: data.bucket,
            name: data.name,
            generation: Some(generation.clone()),
        };
        let path = obj.canonical_uri();

        match state_machine::decide_action(event_type, &obj.name) {
            ObjectStoreAction::MetadataOnly => {
                let record = persister::build_metadata_only_record(path.clone(), generation, event_type);
                let id = record.id.clone();
                self.warehouse.insert_record(&record).await?;
                Ok(DispatchResult {
                    outcomes: vec![IngestOutcome { record_id: id, path }],
                    member_failures: Vec::new(),
                })
            }
            ObjectStoreAction::DownloadSingle => {
                let downloaded = self.object_store.download(&obj).await?;
                perf.checkpoint("download");
                let outcome = self
                    .process_and_persist(path.clone(), downloaded.generation, event_type, "GCS", &downloaded.bytes)
                    .await?;
                Ok(DispatchResult {
                    outcomes: vec![outcome],
                    member_failures: Vec::new(),
                })
            }
            ObjectStoreAction::DownloadAndExpand => {
                let downloaded = self.object_store.download(&obj).await?;
                perf.checkpoint("download");
                self.expand_and_persist_archive(&path, &downloaded.bytes, &downloaded.generation, event_type)
                    .await
            }
        }
    }

    async fn handle_dicomweb_event(
        &self,
        path: String,
        perf: &mut PerfContext,
    ) -> Result<DispatchResult, IngestError> {
        // spec.md §4.2, §9: DICOMweb notifications carry no generation; the
        // current wall-clock stands in for `version`.
        let version = chrono::Utc::now().timestamp_micros().to_string();
        let bytes = self.download_dicomweb(&path).await?;
        perf.checkpoint("download");
        let outcome = self
            .process_and_persist(path, version, ObjectEventType::ObjectFinalize, "DICOMWEB", &bytes)
            .await?;
        Ok(DispatchResult {
            outcomes: vec![outcome],
            member_failures: Vec::new(),
        })
    }

    async fn download_dicomweb(&self, path: &str) -> Result<Vec<u8>, IngestError> {
        // A bare DICOMweb path is retrieved the same way the object-store
        // path is: this pipeline has no separate REST client, so the path is
        // treated as `{bucket}/{name}` against the configured object store,
        // matching the single-DICOM download used for `finalize` events.
        let (bucket, name) = path
            .split_once('/')
            .ok_or_else(|| IngestError::invalid_input(format!("dicomweb path has no bucket segment: {path}")))?;
        let downloaded = self.object_store.download(&ObjectRef::new(bucket, name)).await?;
        Ok(downloaded.bytes)
    }

    async fn expand_and_persist_archive(
        &self,
        archive_uri: &str,
        bytes: &[u8],
        version: &str,
        event_type: ObjectEventType,
    ) -> Result<DispatchResult, IngestError> {
        let expansion = ingest_archive::expand_archive(bytes, archive_uri)?;
        let mut result = DispatchResult::default();

        for member in expansion.members {
            match self
                .process_and_persist(member.record_path.clone(), version.to_string(), event_type, "GCS", &member.bytes)
                .await
            {
                Ok(outcome) => result.outcomes.push(outcome),
                Err(e) => result.member_failures.push(MemberFailure {
                    member_name: member.member_name,
                    reason: e.to_string(),
                }),
            }
        }
        for failure in expansion.errors {
            result.member_failures.push(MemberFailure {
                member_name: failure.member_name,
                reason: failure.reason,
            });
        }

        info!(
            archive_uri,
            members_ok = result.outcomes.len(),
            members_failed = result.member_failures.len(),
            "archive expansion complete"
        );
        Ok(result)
    }

    /// Runs the DICOM Processor → optional Embedding Client → Row Persister
    /// sequence for one concrete DICOM blob (spec.md §4.4, §4.5, §4.6).
    async fn process_and_persist(
        &self,
        path: String,
        version: String,
        event_type: ObjectEventType,
        input_type: &str,
        bytes: &[u8],
    ) -> Result<IngestOutcome, IngestError> {
        let processed = self.dicom_processor.process(bytes).await?;
        let embedding = self.run_embedding_track(&processed).await?;

        let record = persister::build_processed_record(
            path.clone(),
            version,
            event_type,
            input_type,
            processed.size,
            processed.metadata_json,
            embedding,
        );
        let id = record.id.clone();
        self.warehouse.insert_record(&record).await?;
        Ok(IngestOutcome { record_id: id, path })
    }

    async fn run_embedding_track(&self, processed: &ProcessedDicom) -> Result<Option<PersistedEmbedding>, IngestError> {
        let Some(client) = self.embedding_client.as_ref() else {
            return Ok(None);
        };

        match &processed.embedding_track {
            EmbeddingTrack::None => Ok(None),
            EmbeddingTrack::Text { content } => {
                let vector = client.predict(&EmbeddingInstance::text(content.clone())).await?;
                Ok(Some(PersistedEmbedding {
                    model: self.embedding_config.vector.model.clone(),
                    path: None,
                    size: content.len() as i64,
                    mime_type: "text/plain".to_string(),
                    vector,
                }))
            }
            EmbeddingTrack::Image {
                jpeg_bytes,
                mime_type,
                upload_path,
            } => {
                let obj = ObjectRef::new(self.embedding_config.gcs_bucket_path.clone(), upload_path.clone());
                self.object_store
                    .upload(&obj, mime_type, jpeg_bytes.clone())
                    .await?;
                let gcs_uri = format!("gs://{}", obj.canonical_uri());
                let vector = client.predict(&EmbeddingInstance::image(gcs_uri)).await?;
                Ok(Some(PersistedEmbedding {
                    model: self.embedding_config.vector.model.clone(),
                    path: Some(upload_path.clone()),
                    size: jpeg_bytes.len() as i64,
                    mime_type: mime_type.to_string(),
                    vector,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_dicom::ProcessorOptions;
    use ingest_embedding::test_support::FakeEmbeddingClient;
    use ingest_objectstore::test_support::FakeObjectStore;
    use ingest_warehouse::client::test_support::FakeWarehouse;
    use serde_json::json;

    fn pipeline(embedding_client: Option<Arc<dyn EmbeddingClient>>) -> (Pipeline, Arc<FakeObjectStore>, Arc<FakeWarehouse>) {
        let object_store = Arc::new(FakeObjectStore::default());
        let warehouse = Arc::new(FakeWarehouse::default());
        let processor = Arc::new(DicomProcessor::new(ProcessorOptions::default(), None));
        let pipeline = Pipeline::new(
            object_store.clone(),
            warehouse.clone(),
            embedding_client,
            processor,
            EmbeddingInputConfig {
                gcs_bucket_path: "processed".to_string(),
                ..Default::default()
            },
        );
        (pipeline, object_store, warehouse)
    }

    fn envelope_for(attrs: serde_json::Value, data: &str) -> PushEnvelope {
        use base64::Engine;
        PushEnvelope {
            message: envelope::PushMessage {
                attributes: Some(attrs),
                data: base64::engine::general_purpose::STANDARD.encode(data.as_bytes()),
            },
        }
    }

    #[tokio::test]
    async fn delete_event_persists_metadata_only_row_without_download() {
        let (pipeline, store, warehouse) = pipeline(None);
        let data = serde_json::to_string(&json!({"bucket": "b", "name": "o.dcm", "generation": "7"})).unwrap();
        let envelope = envelope_for(
            json!({"payloadFormat": "JSON_API_V1", "eventType": "delete", "bucketId": "b", "objectId": "o.dcm"}),
            &data,
        );

        let (result, _perf) = pipeline.handle_push(&envelope, "req-1").await;
        let dispatch = result.unwrap();
        assert_eq!(dispatch.outcomes.len(), 1);
        assert!(store.objects.lock().unwrap().is_empty());
        assert_eq!(warehouse.records.lock().unwrap().len(), 1);
        assert!(warehouse.records.lock().unwrap()[0].metadata.is_none());
    }

    #[tokio::test]
    async fn bad_schema_envelope_is_rejected_before_any_io() {
        let (pipeline, store, warehouse) = pipeline(None);
        let envelope = PushEnvelope {
            message: envelope::PushMessage {
                attributes: None,
                data: "not-base64!!".to_string(),
            },
        };
        let (result, _perf) = pipeline.handle_push(&envelope, "req-2").await;
        assert!(result.is_err());
        assert!(store.objects.lock().unwrap().is_empty());
        assert!(warehouse.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn finalize_on_non_dicom_bytes_surfaces_invalid_input_without_partial_row() {
        let (pipeline, store, warehouse) = pipeline(Some(Arc::new(FakeEmbeddingClient::succeeding(vec![0.1]))));
        store
            .objects
            .lock()
            .unwrap()
            .insert("b/o.dcm".to_string(), (b"not a dicom file".to_vec(), "1".to_string()));
        let data = serde_json::to_string(&json!({"bucket": "b", "name": "o.dcm", "generation": "1"})).unwrap();
        let envelope = envelope_for(
            json!({"payloadFormat": "JSON_API_V1", "eventType": "finalize", "bucketId": "b", "objectId": "o.dcm"}),
            &data,
        );

        let (result, _perf) = pipeline.handle_push(&envelope, "req-3").await;
        assert!(result.is_err());
        assert!(warehouse.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn perf_summary_carries_the_request_id() {
        let (pipeline, store, _warehouse) = pipeline(None);
        let _ = &store;
        let data = serde_json::to_string(&json!({"bucket": "b", "name": "o.dcm"})).unwrap();
        let envelope = envelope_for(
            json!({"payloadFormat": "JSON_API_V1", "eventType": "archive", "bucketId": "b", "objectId": "o.dcm"}),
            &data,
        );
        let (_result, perf) = pipeline.handle_push(&envelope, "req-4").await;
        assert_eq!(perf.request_id, "req-4");
        assert!(!perf.checkpoints.is_empty());
    }
}
