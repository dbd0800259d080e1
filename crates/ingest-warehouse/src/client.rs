// SPDX-License-Identifier: MIT OR Apache-2.0
//! Warehouse client trait and BigQuery-backed implementation (spec.md
//! §4.6, §4.8, §4.9, §6).
//!
//! [`WarehouseClient`] is kept narrow, the same way [`ingest_objectstore::ObjectStoreClient`]
//! is: the Row Persister, Admin Query Layer, and DLQ remediation path only
//! ever need to insert a row, run one of the fixed admin queries, or delete
//! dead-letter rows by message id. The BigQuery SDK itself is touched in
//! exactly one `impl` block.

use crate::dlq::DeadLetterRow;
use crate::normalize::{normalize_study_metadata, StudyMetadataTree};
use crate::query::{self, ParamValue};
use async_trait::async_trait;
use ingest_core::IngestionRecord;
use ingest_error::IngestError;
use std::sync::Arc;

/// One grouped row from `studies.search` (spec.md §4.8).
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StudySummary {
    /// `StudyInstanceUID`, if every instance in the group carried one.
    #[serde(rename = "studyInstanceUid")]
    pub study_instance_uid: Option<String>,
    /// Number of instance rows grouped under this study.
    #[serde(rename = "instanceCount")]
    pub instance_count: i64,
    /// Most recent `timestamp` among the grouped rows.
    #[serde(rename = "lastUpdated")]
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

/// One row of `dlq.summary`, grouped by subscription (spec.md §4.9).
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DlqSubscriptionSummary {
    /// Subscription the dead-letters arrived from.
    #[serde(rename = "subscriptionName")]
    pub subscription_name: String,
    /// Row count for this subscription.
    pub total: i64,
    /// Most recent `publish_time` among this subscription's rows.
    #[serde(rename = "lastPublishTime")]
    pub last_publish_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// The warehouse operations the ingestion pipeline and admin layer depend
/// on.
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    /// Inserts (or upserts, since `id` is a deterministic function of
    /// `path`/`version`) one ingestion row (spec.md §4.6).
    async fn insert_record(&self, record: &IngestionRecord) -> Result<(), IngestError>;

    /// `instances.search`.
    async fn search_instances(
        &self,
        key: &str,
        value: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<IngestionRecord>, IngestError>;

    /// `instances.search/counts`.
    async fn search_instances_count(&self, key: &str, value: &str) -> Result<i64, IngestError>;

    /// `studies.search`.
    async fn search_studies(
        &self,
        key: &str,
        value: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StudySummary>, IngestError>;

    /// `studies.search/counts`.
    async fn search_studies_count(&self, key: &str, value: &str) -> Result<i64, IngestError>;

    /// `studies.instances`.
    async fn study_instances(&self, study_uid: &str) -> Result<Vec<IngestionRecord>, IngestError>;

    /// `studies.metadata` — fetches the study's instance rows and folds
    /// them into a normalized tree.
    async fn study_metadata(&self, study_uid: &str) -> Result<StudyMetadataTree, IngestError> {
        let records = self.study_instances(study_uid).await?;
        let maps = records
            .into_iter()
            .filter_map(|r| r.metadata)
            .filter_map(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
            .filter_map(|v| v.as_object().cloned())
            .collect();
        Ok(normalize_study_metadata(maps))
    }

    /// `instances.get` — fetch one row by its derived `id`.
    async fn instance_get(&self, id: &str) -> Result<Option<IngestionRecord>, IngestError>;

    /// Fetch one row by its DICOM identity triple.
    async fn instance_by_uids(
        &self,
        study_uid: &str,
        series_uid: &str,
        sop_uid: &str,
    ) -> Result<Option<IngestionRecord>, IngestError>;

    /// `dlq.items`.
    async fn dlq_items(&self, limit: i64, offset: i64) -> Result<Vec<DeadLetterRow>, IngestError>;

    /// `dlq.count`.
    async fn dlq_count(&self) -> Result<i64, IngestError>;

    /// `dlq.summary`.
    async fn dlq_summary(&self) -> Result<Vec<DlqSubscriptionSummary>, IngestError>;

    /// Deletes dead-letter rows by message id, after a successful requeue
    /// touch (spec.md §4.9).
    async fn delete_dlq_rows(&self, message_ids: &[String]) -> Result<(), IngestError>;

    /// `DELETE /api/instances` — removes rows by their derived `id`.
    async fn delete_instances(&self, ids: &[String]) -> Result<(), IngestError>;

    /// `POST /api/studies/delete` — removes every row belonging to a study.
    async fn delete_study(&self, study_uid: &str) -> Result<(), IngestError>;
}

/// Shared handle type injected into router state and pipeline
/// orchestration.
pub type SharedWarehouse = Arc<dyn WarehouseClient>;

/// BigQuery-backed [`WarehouseClient`].
pub struct BigQueryWarehouse {
    client: google_cloud_bigquery::client::Client,
    project: String,
    ingestion_table: crate::identifiers::TableRef,
    dlq_table: crate::identifiers::TableRef,
}

impl BigQueryWarehouse {
    /// Builds a client using Application Default Credentials.
    pub async fn new(
        project: impl Into<String>,
        ingestion_table: crate::identifiers::TableRef,
        dlq_table: crate::identifiers::TableRef,
    ) -> Result<Self, IngestError> {
        let (config, _) = google_cloud_bigquery::client::ClientConfig::new_with_auth()
            .await
            .map_err(|e| IngestError::internal(format!("bigquery auth setup failed: {e}")))?;
        let client = google_cloud_bigquery::client::Client::new(config)
            .await
            .map_err(|e| IngestError::internal(format!("bigquery client init failed: {e}")))?;
        Ok(Self {
            client,
            project: project.into(),
            ingestion_table,
            dlq_table,
        })
    }

    async fn run_query<T: serde::de::DeserializeOwned>(
        &self,
        composed: query::ComposedQuery,
    ) -> Result<Vec<T>, IngestError> {
        use google_cloud_bigquery::query::{Param, QueryRequest};

        let mut request = QueryRequest::new(composed.sql);
        for (name, value) in composed.params {
            match value {
                ParamValue::Str(s) => request.add_named_param(&name, Param::from(s)),
                ParamValue::Int(i) => request.add_named_param(&name, Param::from(i)),
            }
        }

        let mut iter = self
            .client
            .query::<T>(&self.project, request)
            .await
            .map_err(|e| classify_bigquery_error(&e.to_string()))?;

        let mut rows = Vec::new();
        while let Some(row) = iter
            .next()
            .await
            .map_err(|e| classify_bigquery_error(&e.to_string()))?
        {
            rows.push(row);
        }
        Ok(rows)
    }
}

fn classify_bigquery_error(message: &str) -> IngestError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("401") || lower.contains("403") || lower.contains("forbidden") {
        IngestError::new(ingest_error::ErrorKind::Forbidden, message.to_string())
    } else if lower.contains("429") || lower.contains("timeout") || lower.contains("5") {
        IngestError::transient(message.to_string())
    } else {
        IngestError::internal(message.to_string())
    }
}

#[async_trait]
impl WarehouseClient for BigQueryWarehouse {
    async fn insert_record(&self, record: &IngestionRecord) -> Result<(), IngestError> {
        use google_cloud_bigquery::storage_write::AppendRowsRequestBuilder;

        let stream = self
            .client
            .default_stream(&self.project, &self.ingestion_table.dataset, &self.ingestion_table.table)
            .await
            .map_err(|e| classify_bigquery_error(&e.to_string()))?;
        let request = AppendRowsRequestBuilder::new(record.clone());
        stream
            .append_rows(request)
            .await
            .map_err(|e| classify_bigquery_error(&e.to_string()))?;
        Ok(())
    }

    async fn search_instances(
        &self,
        key: &str,
        value: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<IngestionRecord>, IngestError> {
        let q = query::build_instances_search(&self.ingestion_table, key, value, limit, offset)?;
        self.run_query(q).await
    }

    async fn search_instances_count(&self, key: &str, value: &str) -> Result<i64, IngestError> {
        let q = query::build_instances_search_count(&self.ingestion_table, key, value)?;
        let rows: Vec<CountRow> = self.run_query(q).await?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0))
    }

    async fn search_studies(
        &self,
        key: &str,
        value: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StudySummary>, IngestError> {
        let q = query::build_studies_search(&self.ingestion_table, key, value, limit, offset)?;
        let rows: Vec<StudySearchRow> = self.run_query(q).await?;
        Ok(rows
            .into_iter()
            .map(|r| StudySummary {
                study_instance_uid: r.study_instance_uid,
                instance_count: r.instance_count,
                last_updated: r.last_updated,
            })
            .collect())
    }

    async fn search_studies_count(&self, key: &str, value: &str) -> Result<i64, IngestError> {
        let q = query::build_studies_search_count(&self.ingestion_table, key, value)?;
        let rows: Vec<CountRow> = self.run_query(q).await?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0))
    }

    async fn study_instances(&self, study_uid: &str) -> Result<Vec<IngestionRecord>, IngestError> {
        let q = query::build_study_instances(&self.ingestion_table, study_uid);
        self.run_query(q).await
    }

    async fn instance_get(&self, id: &str) -> Result<Option<IngestionRecord>, IngestError> {
        let q = query::build_instance_get(&self.ingestion_table, id);
        let rows: Vec<IngestionRecord> = self.run_query(q).await?;
        Ok(rows.into_iter().next())
    }

    async fn instance_by_uids(
        &self,
        study_uid: &str,
        series_uid: &str,
        sop_uid: &str,
    ) -> Result<Option<IngestionRecord>, IngestError> {
        let q = query::build_instance_by_uids(&self.ingestion_table, study_uid, series_uid, sop_uid);
        let rows: Vec<IngestionRecord> = self.run_query(q).await?;
        Ok(rows.into_iter().next())
    }

    async fn dlq_items(&self, limit: i64, offset: i64) -> Result<Vec<DeadLetterRow>, IngestError> {
        let q = query::build_dlq_items(&self.dlq_table, limit, offset);
        self.run_query(q).await
    }

    async fn dlq_count(&self) -> Result<i64, IngestError> {
        let q = query::build_dlq_count(&self.dlq_table);
        let rows: Vec<CountRow> = self.run_query(q).await?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0))
    }

    async fn dlq_summary(&self) -> Result<Vec<DlqSubscriptionSummary>, IngestError> {
        let q = query::build_dlq_summary(&self.dlq_table);
        let rows: Vec<DlqSummaryRow> = self.run_query(q).await?;
        Ok(rows
            .into_iter()
            .map(|r| DlqSubscriptionSummary {
                subscription_name: r.subscription_name,
                total: r.total,
                last_publish_time: r.last_publish_time,
            })
            .collect())
    }

    async fn delete_dlq_rows(&self, message_ids: &[String]) -> Result<(), IngestError> {
        if message_ids.is_empty() {
            return Ok(());
        }
        let q = query::build_dlq_delete_by_message_ids(&self.dlq_table, message_ids);
        let _: Vec<serde_json::Value> = self.run_query(q).await?;
        Ok(())
    }

    async fn delete_instances(&self, ids: &[String]) -> Result<(), IngestError> {
        if ids.is_empty() {
            return Ok(());
        }
        let q = query::build_delete_instances_by_ids(&self.ingestion_table, ids);
        let _: Vec<serde_json::Value> = self.run_query(q).await?;
        Ok(())
    }

    async fn delete_study(&self, study_uid: &str) -> Result<(), IngestError> {
        let q = query::build_delete_study(&self.ingestion_table, study_uid);
        let _: Vec<serde_json::Value> = self.run_query(q).await?;
        Ok(())
    }
}

#[derive(Debug, serde::Deserialize)]
struct CountRow {
    total: i64,
}

#[derive(Debug, serde::Deserialize)]
struct StudySearchRow {
    #[serde(rename = "study_instance_uid")]
    study_instance_uid: Option<String>,
    instance_count: i64,
    last_updated: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, serde::Deserialize)]
struct DlqSummaryRow {
    subscription_name: String,
    total: i64,
    last_publish_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// In-memory [`WarehouseClient`] double, exposed for `ingest-pipeline` and
/// `ingest-daemon` test suites under the `test-util` feature.
#[cfg(any(test, feature = "test-util"))]
pub mod test_support {
    use super::*;
    use crate::dlq::dedupe_targets;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// In-memory fake replicating the allow-list, dedup, and grouping
    /// semantics of [`BigQueryWarehouse`] without a real SQL engine.
    #[derive(Default)]
    pub struct FakeWarehouse {
        /// Inserted rows, in insertion order.
        pub records: Mutex<Vec<IngestionRecord>>,
        /// Dead-letter rows available for DLQ queries.
        pub dlq_rows: Mutex<Vec<DeadLetterRow>>,
        /// Message ids removed via `delete_dlq_rows`.
        pub deleted_message_ids: Mutex<Vec<String>>,
    }

    fn metadata_value(record: &IngestionRecord, key: &str) -> Option<String> {
        let raw = record.metadata.as_ref()?;
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        value.get(key)?.as_str().map(str::to_string)
    }

    fn column_value(record: &IngestionRecord, key: &str) -> Option<String> {
        match key {
            "id" => Some(record.id.clone()),
            "path" => Some(record.path.clone()),
            "version" => Some(record.version.clone()),
            "timestamp" => Some(record.timestamp.to_rfc3339()),
            other => metadata_value(record, other),
        }
    }

    #[async_trait]
    impl WarehouseClient for FakeWarehouse {
        async fn insert_record(&self, record: &IngestionRecord) -> Result<(), IngestError> {
            let mut records = self.records.lock().unwrap();
            records.retain(|r| r.id != record.id);
            records.push(record.clone());
            Ok(())
        }

        async fn search_instances(
            &self,
            key: &str,
            value: &str,
            limit: i64,
            offset: i64,
        ) -> Result<Vec<IngestionRecord>, IngestError> {
            query::resolve_search_column(key)?;
            let records = self.records.lock().unwrap();
            let mut matched: Vec<_> = records
                .iter()
                .filter(|r| column_value(r, key).as_deref() == Some(value))
                .cloned()
                .collect();
            matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            Ok(matched
                .into_iter()
                .skip(offset.max(0) as usize)
                .take(limit.max(0) as usize)
                .collect())
        }

        async fn search_instances_count(&self, key: &str, value: &str) -> Result<i64, IngestError> {
            query::resolve_search_column(key)?;
            let records = self.records.lock().unwrap();
            Ok(records
                .iter()
                .filter(|r| column_value(r, key).as_deref() == Some(value))
                .count() as i64)
        }

        async fn search_studies(
            &self,
            key: &str,
            value: &str,
            limit: i64,
            offset: i64,
        ) -> Result<Vec<StudySummary>, IngestError> {
            query::resolve_search_column(key)?;
            let records = self.records.lock().unwrap();
            let mut groups: std::collections::BTreeMap<Option<String>, (i64, chrono::DateTime<chrono::Utc>)> =
                std::collections::BTreeMap::new();
            for r in records
                .iter()
                .filter(|r| column_value(r, key).as_deref() == Some(value))
            {
                let uid = metadata_value(r, "StudyInstanceUID");
                let entry = groups.entry(uid).or_insert((0, r.timestamp));
                entry.0 += 1;
                if r.timestamp > entry.1 {
                    entry.1 = r.timestamp;
                }
            }
            let mut summaries: Vec<_> = groups
                .into_iter()
                .map(|(uid, (count, last))| StudySummary {
                    study_instance_uid: uid,
                    instance_count: count,
                    last_updated: last,
                })
                .collect();
            summaries.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
            Ok(summaries
                .into_iter()
                .skip(offset.max(0) as usize)
                .take(limit.max(0) as usize)
                .collect())
        }

        async fn search_studies_count(&self, key: &str, value: &str) -> Result<i64, IngestError> {
            let all = self.search_studies(key, value, i64::MAX, 0).await?;
            Ok(all.len() as i64)
        }

        async fn study_instances(&self, study_uid: &str) -> Result<Vec<IngestionRecord>, IngestError> {
            let records = self.records.lock().unwrap();
            let mut matched: Vec<_> = records
                .iter()
                .filter(|r| metadata_value(r, "StudyInstanceUID").as_deref() == Some(study_uid))
                .cloned()
                .collect();
            matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            Ok(matched)
        }

        async fn instance_get(&self, id: &str) -> Result<Option<IngestionRecord>, IngestError> {
            Ok(self.records.lock().unwrap().iter().find(|r| r.id == id).cloned())
        }

        async fn instance_by_uids(
            &self,
            study_uid: &str,
            series_uid: &str,
            sop_uid: &str,
        ) -> Result<Option<IngestionRecord>, IngestError> {
            let records = self.records.lock().unwrap();
            Ok(records
                .iter()
                .find(|r| {
                    metadata_value(r, "StudyInstanceUID").as_deref() == Some(study_uid)
                        && metadata_value(r, "SeriesInstanceUID").as_deref() == Some(series_uid)
                        && metadata_value(r, "SOPInstanceUID").as_deref() == Some(sop_uid)
                })
                .cloned())
        }

        async fn dlq_items(&self, limit: i64, offset: i64) -> Result<Vec<DeadLetterRow>, IngestError> {
            let rows = self.dlq_rows.lock().unwrap();
            Ok(rows
                .iter()
                .cloned()
                .skip(offset.max(0) as usize)
                .take(limit.max(0) as usize)
                .collect())
        }

        async fn dlq_count(&self) -> Result<i64, IngestError> {
            Ok(self.dlq_rows.lock().unwrap().len() as i64)
        }

        async fn dlq_summary(&self) -> Result<Vec<DlqSubscriptionSummary>, IngestError> {
            let rows = self.dlq_rows.lock().unwrap();
            let mut by_sub: std::collections::BTreeMap<String, i64> = std::collections::BTreeMap::new();
            for row in rows.iter() {
                *by_sub.entry(row.subscription_name.clone()).or_insert(0) += 1;
            }
            Ok(by_sub
                .into_iter()
                .map(|(subscription_name, total)| DlqSubscriptionSummary {
                    subscription_name,
                    total,
                    last_publish_time: None,
                })
                .collect())
        }

        async fn delete_dlq_rows(&self, message_ids: &[String]) -> Result<(), IngestError> {
            let ids: HashSet<&String> = message_ids.iter().collect();
            self.dlq_rows.lock().unwrap().retain(|r| !ids.contains(&r.message_id));
            self.deleted_message_ids
                .lock()
                .unwrap()
                .extend(message_ids.iter().cloned());
            Ok(())
        }

        async fn delete_instances(&self, ids: &[String]) -> Result<(), IngestError> {
            let ids: HashSet<&String> = ids.iter().collect();
            self.records.lock().unwrap().retain(|r| !ids.contains(&r.id));
            Ok(())
        }

        async fn delete_study(&self, study_uid: &str) -> Result<(), IngestError> {
            self.records
                .lock()
                .unwrap()
                .retain(|r| metadata_value(r, "StudyInstanceUID").as_deref() != Some(study_uid));
            Ok(())
        }
    }

    /// Convenience: dedupe and return remediable targets from the fake's
    /// current DLQ rows, mirroring the read side of remediation.
    pub fn fake_remediable_targets(fake: &FakeWarehouse) -> (Vec<crate::dlq::DeadLetterTarget>, usize) {
        let rows = fake.dlq_rows.lock().unwrap();
        dedupe_targets(&rows)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeWarehouse;
    use super::*;
    use ingest_core::{Info, InputInfo};

    fn record(id: &str, study_uid: &str, patient_id: &str) -> IngestionRecord {
        IngestionRecord {
            id: id.to_string(),
            timestamp: chrono::Utc::now(),
            path: format!("b/{id}.dcm"),
            version: "1".to_string(),
            info: Info {
                event: "OBJECT_FINALIZE".to_string(),
                input: InputInfo::default(),
                embedding: None,
            },
            metadata: Some(
                serde_json::json!({"StudyInstanceUID": study_uid, "PatientID": patient_id}).to_string(),
            ),
            embedding_vector: vec![],
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let wh = FakeWarehouse::default();
        wh.insert_record(&record("id1", "s1", "p1")).await.unwrap();
        let got = wh.instance_get("id1").await.unwrap().unwrap();
        assert_eq!(got.path, "b/id1.dcm");
    }

    #[tokio::test]
    async fn insert_is_idempotent_on_id() {
        let wh = FakeWarehouse::default();
        wh.insert_record(&record("id1", "s1", "p1")).await.unwrap();
        wh.insert_record(&record("id1", "s1", "p1")).await.unwrap();
        assert_eq!(wh.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn search_instances_filters_by_metadata_key() {
        let wh = FakeWarehouse::default();
        wh.insert_record(&record("id1", "s1", "p1")).await.unwrap();
        wh.insert_record(&record("id2", "s1", "p2")).await.unwrap();
        let found = wh.search_instances("PatientID", "p2", 10, 0).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "id2");
    }

    #[tokio::test]
    async fn search_instances_rejects_unsupported_key() {
        let wh = FakeWarehouse::default();
        assert!(wh.search_instances("nope", "x", 10, 0).await.is_err());
    }

    #[tokio::test]
    async fn search_studies_groups_by_study_instance_uid() {
        let wh = FakeWarehouse::default();
        wh.insert_record(&record("id1", "s1", "p1")).await.unwrap();
        wh.insert_record(&record("id2", "s1", "p1")).await.unwrap();
        wh.insert_record(&record("id3", "s2", "p1")).await.unwrap();
        let studies = wh.search_studies("PatientID", "p1", 10, 0).await.unwrap();
        assert_eq!(studies.len(), 2);
        let s1 = studies
            .iter()
            .find(|s| s.study_instance_uid.as_deref() == Some("s1"))
            .unwrap();
        assert_eq!(s1.instance_count, 2);
    }

    #[tokio::test]
    async fn study_metadata_normalizes_instance_rows() {
        let wh = FakeWarehouse::default();
        wh.insert_record(&record("id1", "s1", "p1")).await.unwrap();
        wh.insert_record(&record("id2", "s1", "p1")).await.unwrap();
        let tree = wh.study_metadata("s1").await.unwrap();
        assert_eq!(tree.study["PatientID"], "p1");
    }

    #[tokio::test]
    async fn dlq_delete_removes_matching_rows_only() {
        let wh = FakeWarehouse::default();
        wh.dlq_rows.lock().unwrap().push(DeadLetterRow {
            data: None,
            attributes: Some(serde_json::json!({"bucket": "b", "name": "o"})),
            message_id: "keep".into(),
            subscription_name: "sub".into(),
            publish_time: None,
        });
        wh.dlq_rows.lock().unwrap().push(DeadLetterRow {
            data: None,
            attributes: Some(serde_json::json!({"bucket": "b", "name": "o2"})),
            message_id: "drop".into(),
            subscription_name: "sub".into(),
            publish_time: None,
        });
        wh.delete_dlq_rows(&["drop".to_string()]).await.unwrap();
        assert_eq!(wh.dlq_count().await.unwrap(), 1);
        assert_eq!(wh.deleted_message_ids.lock().unwrap()[0], "drop");
    }

    #[tokio::test]
    async fn dlq_summary_groups_by_subscription() {
        let wh = FakeWarehouse::default();
        for i in 0..3 {
            wh.dlq_rows.lock().unwrap().push(DeadLetterRow {
                data: None,
                attributes: Some(serde_json::json!({"bucket": "b", "name": format!("o{i}")})),
                message_id: format!("m{i}"),
                subscription_name: "sub-a".into(),
                publish_time: None,
            });
        }
        let summary = wh.dlq_summary().await.unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].total, 3);
    }
}
