// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request/response DTOs for the Admin Query Layer's HTTP surface
//! (spec.md §4.8, §6).
//!
//! Handlers in [`crate::build_app`] deserialize these from the request body
//! or path, call straight into `ingest-warehouse`/`ingest-objectstore`, and
//! serialize the result back out. The shapes here intentionally mirror what
//! `ingest-warehouse::client`/`query` already returns — this module adds no
//! business logic of its own, only wire framing.

use ingest_core::IngestionRecord;
use ingest_warehouse::{client::StudySummary, dlq::DeadLetterRow, DlqSubscriptionSummary};
use serde::{Deserialize, Serialize};

/// Body for `instances.search` / `studies.search` (spec.md §4.8).
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    /// Search key: either a top-level column or an allow-listed metadata
    /// tag name (resolved by `ingest_warehouse::query::resolve_search_column`).
    pub key: String,
    /// Value to match.
    pub value: String,
    /// Page size. Defaults to 50.
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Page offset. Defaults to 0.
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Body for `instances.search/counts` / `studies.search/counts`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchCountRequest {
    /// Search key, same rules as [`SearchRequest::key`].
    pub key: String,
    /// Value to match.
    pub value: String,
}

/// `instances.search` response.
#[derive(Debug, Clone, Serialize)]
pub struct InstancesSearchResponse {
    /// Matched rows, most recent first.
    pub items: Vec<IngestionRecord>,
}

/// `studies.search` response.
#[derive(Debug, Clone, Serialize)]
pub struct StudiesSearchResponse {
    /// Matched study summaries, most recently updated first.
    pub items: Vec<StudySummary>,
}

/// Shared shape for both `*/search/counts` responses.
#[derive(Debug, Clone, Serialize)]
pub struct CountResponse {
    /// Total matching rows (ignoring pagination).
    pub total: i64,
}

/// `GET /studies/:uid/instances` response.
#[derive(Debug, Clone, Serialize)]
pub struct StudyInstancesResponse {
    /// Every row belonging to the study, most recent first.
    pub items: Vec<IngestionRecord>,
}

/// `GET /api/instances/:id` response. `None` when no row matches.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceGetResponse {
    /// The row, if found.
    pub instance: Option<IngestionRecord>,
}

/// `GET /api/dlq/items` response.
#[derive(Debug, Clone, Serialize)]
pub struct DlqItemsResponse {
    /// Dead-letter rows, unfiltered beyond pagination.
    pub items: Vec<DeadLetterRowDto>,
}

/// Wire-safe projection of [`DeadLetterRow`] (the warehouse type carries the
/// raw base64 `data` and `attributes` JSON verbatim, which is exactly what
/// an operator triaging the DLQ needs to see).
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterRowDto {
    /// Base64-encoded original message body, if captured.
    pub data: Option<String>,
    /// Pub/Sub message attributes.
    pub attributes: Option<serde_json::Value>,
    /// Pub/Sub message id.
    #[serde(rename = "messageId")]
    pub message_id: String,
    /// Source subscription name.
    #[serde(rename = "subscriptionName")]
    pub subscription_name: String,
    /// When Pub/Sub published the dead-lettered message.
    #[serde(rename = "publishTime")]
    pub publish_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<DeadLetterRow> for DeadLetterRowDto {
    fn from(row: DeadLetterRow) -> Self {
        Self {
            data: row.data,
            attributes: row.attributes,
            message_id: row.message_id,
            subscription_name: row.subscription_name,
            publish_time: row.publish_time,
        }
    }
}

/// `GET /api/dlq/count` response.
#[derive(Debug, Clone, Serialize)]
pub struct DlqCountResponse {
    /// Total dead-letter rows.
    pub total: i64,
}

/// `GET /api/dlq/summary` response.
#[derive(Debug, Clone, Serialize)]
pub struct DlqSummaryResponse {
    /// Per-subscription dead-letter counts.
    pub items: Vec<DlqSubscriptionSummary>,
}

/// Body for `POST /api/dlq/requeue` and `DELETE /api/dlq`: the caller names
/// the dead-letter rows to act on by Pub/Sub message id. The admin surface
/// fetches the full row set and filters to this id set before acting,
/// since `ingest-warehouse` has no by-id point lookup for DLQ rows.
#[derive(Debug, Clone, Deserialize)]
pub struct DlqMessageIdsRequest {
    /// Message ids to requeue or delete.
    #[serde(rename = "messageIds")]
    pub message_ids: Vec<String>,
}

/// `POST /api/dlq/requeue` response (spec.md §8 scenario 6).
#[derive(Debug, Clone, Serialize)]
pub struct DlqRequeueResponse {
    /// Count of distinct files successfully touched and requeued.
    #[serde(rename = "requeuedCount")]
    pub requeued_count: usize,
    /// Count of dead-letter rows deleted as a result.
    #[serde(rename = "deletedMessageCount")]
    pub deleted_message_count: usize,
    /// Per-file failures, if any (a partial success is normal).
    pub failures: Vec<DlqRequeueFailureDto>,
}

/// One file's requeue failure.
#[derive(Debug, Clone, Serialize)]
pub struct DlqRequeueFailureDto {
    /// `{bucket}/{name}` of the file that failed.
    pub target: String,
    /// What went wrong.
    pub reason: String,
}

/// Body for `DELETE /api/instances`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteInstancesRequest {
    /// Derived row ids to delete.
    pub ids: Vec<String>,
}

/// Body for `POST /api/studies/delete`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteStudyRequest {
    /// `StudyInstanceUID` to delete every row for.
    #[serde(rename = "studyInstanceUid")]
    pub study_instance_uid: String,
}

/// Generic acknowledgement body for delete endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct DeletedResponse {
    /// Always `true` — deletes are idempotent, so "0 rows matched" is still
    /// a successful delete, not a 404.
    pub deleted: bool,
}

impl Default for DeletedResponse {
    fn default() -> Self {
        Self { deleted: true }
    }
}

/// Splits a stored ingestion row `path` into its base object URI and, for
/// archive members, the member's basename (spec.md §3 invariant d:
/// `{archive_uri}#{member_name}`).
pub fn split_member_fragment(path: &str) -> (&str, Option<&str>) {
    match path.split_once('#') {
        Some((base, member)) => (base, Some(member)),
        None => (path, None),
    }
}

/// Splits a canonical `{bucket}/{name}` URI into its two parts.
pub fn split_bucket_and_name(uri: &str) -> Option<(&str, &str)> {
    uri.split_once('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_member_fragment_separates_archive_member() {
        let (base, member) = split_member_fragment("b/study.zip#a.dcm");
        assert_eq!(base, "b/study.zip");
        assert_eq!(member, Some("a.dcm"));
    }

    #[test]
    fn split_member_fragment_passes_through_plain_paths() {
        let (base, member) = split_member_fragment("b/o.dcm");
        assert_eq!(base, "b/o.dcm");
        assert_eq!(member, None);
    }

    #[test]
    fn split_bucket_and_name_splits_on_first_slash() {
        let (bucket, name) = split_bucket_and_name("bucket/study/series/o.dcm").unwrap();
        assert_eq!(bucket, "bucket");
        assert_eq!(name, "study/series/o.dcm");
    }

    #[test]
    fn search_request_defaults_limit_and_offset() {
        let req: SearchRequest = serde_json::from_str(r#"{"key":"PatientID","value":"P1"}"#).unwrap();
        assert_eq!(req.limit, 50);
        assert_eq!(req.offset, 0);
    }
}
