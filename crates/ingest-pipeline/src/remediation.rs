// SPDX-License-Identifier: MIT OR Apache-2.0
//! DLQ Remediation: `dlq.requeue` (spec.md §4.9).
//!
//! For each unique dead-lettered object: verify it still exists, touch a
//! metadata key to re-trigger a `metadata_update` notification, then delete
//! the originating dead-letter rows. Per-file failures are collected; a
//! partial success across a batch is the expected common case.

use ingest_error::IngestError;
use ingest_objectstore::{ObjectRef, ObjectStoreClient};
use ingest_warehouse::{dedupe_targets, DeadLetterRow, WarehouseClient};

/// The metadata key touched to re-trigger reprocessing (spec.md §4.9).
const REPROCESS_METADATA_KEY: &str = "reprocess";

/// One file's requeue outcome.
#[derive(Debug, Clone)]
pub struct RequeueFailure {
    /// `{bucket}/{name}` of the file that failed to requeue.
    pub target: String,
    /// What went wrong.
    pub reason: String,
}

/// Summary of a `dlq.requeue` invocation.
#[derive(Debug, Clone, Default)]
pub struct RequeueOutcome {
    /// Files successfully touched and whose dead-letter rows were deleted.
    pub requeued: Vec<String>,
    /// Files that failed verification, touch, or row deletion.
    pub failures: Vec<RequeueFailure>,
    /// Dead-letter rows dropped during dedup because they carried no
    /// recoverable `(bucket, name)` in either `data` or `attributes`.
    pub unrecoverable: usize,
}

/// Runs `dlq.requeue` over a batch of dead-letter rows: dedupe by
/// `bucket/name`, verify existence, touch metadata, then delete the
/// dead-letter rows for every file that was successfully touched.
pub async fn requeue(
    object_store: &dyn ObjectStoreClient,
    warehouse: &dyn WarehouseClient,
    rows: &[DeadLetterRow],
) -> Result<RequeueOutcome, IngestError> {
    let (targets, unrecoverable) = dedupe_targets(rows);
    let mut outcome = RequeueOutcome {
        unrecoverable,
        ..Default::default()
    };

    for target in &targets {
        let obj = ObjectRef {
            bucket: target.bucket.clone(),
            name: target.name.clone(),
            generation: target.generation.clone(),
        };
        let label = obj.canonical_uri();

        match object_store.exists(&obj).await {
            Ok(true) => {}
            Ok(false) => {
                outcome.failures.push(RequeueFailure {
                    target: label,
                    reason: "object no longer exists".to_string(),
                });
                continue;
            }
            Err(e) => {
                outcome.failures.push(RequeueFailure {
                    target: label,
                    reason: e.to_string(),
                });
                continue;
            }
        }

        let touched_at = chrono::Utc::now().to_rfc3339();
        if let Err(e) = object_store.set_metadata(&obj, REPROCESS_METADATA_KEY, &touched_at).await {
            outcome.failures.push(RequeueFailure {
                target: label,
                reason: e.to_string(),
            });
            continue;
        }

        let message_ids: Vec<String> = rows
            .iter()
            .filter(|r| ingest_warehouse::derive_target(r).map(|t| t.bucket == target.bucket && t.name == target.name).unwrap_or(false))
            .map(|r| r.message_id.clone())
            .collect();

        match warehouse.delete_dlq_rows(&message_ids).await {
            Ok(()) => outcome.requeued.push(label),
            Err(e) => outcome.failures.push(RequeueFailure {
                target: label,
                reason: e.to_string(),
            }),
        }
    }

    Ok(outcome)
}
