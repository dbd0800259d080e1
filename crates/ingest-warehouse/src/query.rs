// SPDX-License-Identifier: MIT OR Apache-2.0
//! SQL template composition for the Admin Query Layer (spec.md §4.8).
//!
//! Every query here is built from a fixed template string; the only
//! identifiers ever interpolated directly are ones that already passed
//! [`crate::identifiers`]'s grammar check. Search values are always bound
//! parameters (`@name`), never concatenated into the SQL text.

use crate::identifiers::{validate_metadata_path, TableRef};
use ingest_error::IngestError;

/// A bound query parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// UTF-8 string parameter.
    Str(String),
    /// Signed integer parameter.
    Int(i64),
}

/// A composed query: template text plus its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedQuery {
    /// The SQL text, with `@name` placeholders for every bound value.
    pub sql: String,
    /// Bound parameters, in no particular order.
    pub params: Vec<(String, ParamValue)>,
}

/// Top-level ingestion-row columns the search allow-list exposes directly
/// (spec.md §4.8).
const ALLOWED_TOP_LEVEL_COLUMNS: &[&str] = &["id", "path", "version", "timestamp"];

/// DICOM tag keys the search allow-list exposes as
/// `JSON_VALUE(metadata, '$.Key')` lookups (spec.md §4.8). Anything else
/// fails with 400 "unsafe identifier" / unsupported search key.
const ALLOWED_METADATA_KEYS: &[&str] = &[
    "PatientID",
    "PatientName",
    "StudyInstanceUID",
    "SeriesInstanceUID",
    "SOPInstanceUID",
    "StudyDate",
    "StudyDescription",
    "SeriesDescription",
    "Modality",
    "AccessionNumber",
];

/// Resolves a search `key` to the SQL column expression it maps to, or
/// fails if the key isn't in the allow-list.
pub fn resolve_search_column(key: &str) -> Result<String, IngestError> {
    if ALLOWED_TOP_LEVEL_COLUMNS.contains(&key) {
        return Ok(key.to_string());
    }
    if ALLOWED_METADATA_KEYS.contains(&key) {
        validate_metadata_path(key)
            .map_err(|e| IngestError::invalid_input(format!("unsafe identifier: {e}")))?;
        return Ok(format!("JSON_VALUE(metadata, '$.{key}')"));
    }
    Err(IngestError::invalid_input(format!(
        "unsupported search key: {key}"
    )))
}

/// Builds the latest-row-per-path subquery every search/projection query
/// is layered on top of (spec.md §3: "deduplicated by a window function
/// over (path, version) keeping the most recent timestamp with non-null
/// metadata").
fn latest_rows_cte(table: &TableRef) -> String {
    format!(
        "SELECT * EXCEPT(rn) FROM (
            SELECT *, ROW_NUMBER() OVER (PARTITION BY path ORDER BY timestamp DESC) AS rn
            FROM {table}
            WHERE metadata IS NOT NULL
        ) WHERE rn = 1",
        table = table.qualified()
    )
}

/// `instances.search` (spec.md §4.8, §8 scenario 5).
pub fn build_instances_search(
    table: &TableRef,
    key: &str,
    value: &str,
    limit: i64,
    offset: i64,
) -> Result<ComposedQuery, IngestError> {
    let column = resolve_search_column(key)?;
    let sql = format!(
        "WITH latest AS ({cte})
         SELECT * FROM latest WHERE {column} = @value
         ORDER BY timestamp DESC LIMIT @limit OFFSET @offset",
        cte = latest_rows_cte(table),
    );
    Ok(ComposedQuery {
        sql,
        params: vec![
            ("value".into(), ParamValue::Str(value.to_string())),
            ("limit".into(), ParamValue::Int(limit)),
            ("offset".into(), ParamValue::Int(offset)),
        ],
    })
}

/// `instances.search/counts`.
pub fn build_instances_search_count(
    table: &TableRef,
    key: &str,
    value: &str,
) -> Result<ComposedQuery, IngestError> {
    let column = resolve_search_column(key)?;
    let sql = format!(
        "WITH latest AS ({cte})
         SELECT COUNT(*) AS total FROM latest WHERE {column} = @value",
        cte = latest_rows_cte(table),
    );
    Ok(ComposedQuery {
        sql,
        params: vec![("value".into(), ParamValue::Str(value.to_string()))],
    })
}

/// `studies.search` — groups instances by `StudyInstanceUID`, filtering on
/// the same allow-listed key (spec.md §4.8).
pub fn build_studies_search(
    table: &TableRef,
    key: &str,
    value: &str,
    limit: i64,
    offset: i64,
) -> Result<ComposedQuery, IngestError> {
    let column = resolve_search_column(key)?;
    let sql = format!(
        "WITH latest AS ({cte})
         SELECT JSON_VALUE(metadata, '$.StudyInstanceUID') AS study_instance_uid,
                COUNT(*) AS instance_count,
                MAX(timestamp) AS last_updated
         FROM latest
         WHERE {column} = @value
         GROUP BY study_instance_uid
         ORDER BY last_updated DESC LIMIT @limit OFFSET @offset",
        cte = latest_rows_cte(table),
    );
    Ok(ComposedQuery {
        sql,
        params: vec![
            ("value".into(), ParamValue::Str(value.to_string())),
            ("limit".into(), ParamValue::Int(limit)),
            ("offset".into(), ParamValue::Int(offset)),
        ],
    })
}

/// `studies.search/counts`.
pub fn build_studies_search_count(
    table: &TableRef,
    key: &str,
    value: &str,
) -> Result<ComposedQuery, IngestError> {
    let column = resolve_search_column(key)?;
    let sql = format!(
        "WITH latest AS ({cte})
         SELECT COUNT(DISTINCT JSON_VALUE(metadata, '$.StudyInstanceUID')) AS total
         FROM latest WHERE {column} = @value",
        cte = latest_rows_cte(table),
    );
    Ok(ComposedQuery {
        sql,
        params: vec![("value".into(), ParamValue::Str(value.to_string()))],
    })
}

/// `GET /studies/:uid/instances`.
pub fn build_study_instances(table: &TableRef, study_uid: &str) -> ComposedQuery {
    let sql = format!(
        "WITH latest AS ({cte})
         SELECT * FROM latest WHERE JSON_VALUE(metadata, '$.StudyInstanceUID') = @study_uid
         ORDER BY timestamp DESC",
        cte = latest_rows_cte(table),
    );
    ComposedQuery {
        sql,
        params: vec![("study_uid".into(), ParamValue::Str(study_uid.to_string()))],
    }
}

/// `instances.get` — fetch one row by `id`.
pub fn build_instance_get(table: &TableRef, id: &str) -> ComposedQuery {
    let sql = format!(
        "SELECT * FROM {table} WHERE id = @id ORDER BY timestamp DESC LIMIT 1",
        table = table.qualified()
    );
    ComposedQuery {
        sql,
        params: vec![("id".into(), ParamValue::Str(id.to_string()))],
    }
}

/// `GET /studies/:study/series/:series/instances/:sop` — fetch by the
/// identity triple rather than by `id`, since callers reach this route
/// with DICOM UIDs, not the warehouse's derived id.
pub fn build_instance_by_uids(
    table: &TableRef,
    study_uid: &str,
    series_uid: &str,
    sop_uid: &str,
) -> ComposedQuery {
    let sql = format!(
        "WITH latest AS ({cte})
         SELECT * FROM latest
         WHERE JSON_VALUE(metadata, '$.StudyInstanceUID') = @study_uid
           AND JSON_VALUE(metadata, '$.SeriesInstanceUID') = @series_uid
           AND JSON_VALUE(metadata, '$.SOPInstanceUID') = @sop_uid
         LIMIT 1",
        cte = latest_rows_cte(table),
    );
    ComposedQuery {
        sql,
        params: vec![
            ("study_uid".into(), ParamValue::Str(study_uid.to_string())),
            ("series_uid".into(), ParamValue::Str(series_uid.to_string())),
            ("sop_uid".into(), ParamValue::Str(sop_uid.to_string())),
        ],
    }
}

/// `dlq.items` — paged raw dead-letter rows.
pub fn build_dlq_items(table: &TableRef, limit: i64, offset: i64) -> ComposedQuery {
    let sql = format!(
        "SELECT data, attributes, message_id, subscription_name, publish_time
         FROM {table} ORDER BY publish_time DESC LIMIT @limit OFFSET @offset",
        table = table.qualified()
    );
    ComposedQuery {
        sql,
        params: vec![
            ("limit".into(), ParamValue::Int(limit)),
            ("offset".into(), ParamValue::Int(offset)),
        ],
    }
}

/// `dlq.count`.
pub fn build_dlq_count(table: &TableRef) -> ComposedQuery {
    ComposedQuery {
        sql: format!("SELECT COUNT(*) AS total FROM {}", table.qualified()),
        params: vec![],
    }
}

/// `dlq.summary` — grouped by subscription, for an at-a-glance operator
/// view.
pub fn build_dlq_summary(table: &TableRef) -> ComposedQuery {
    let sql = format!(
        "SELECT subscription_name, COUNT(*) AS total, MAX(publish_time) AS last_publish_time
         FROM {table} GROUP BY subscription_name ORDER BY total DESC",
        table = table.qualified()
    );
    ComposedQuery { sql, params: vec![] }
}

/// `DELETE /api/dlq` (by message id set) — used after a successful
/// requeue touch (spec.md §4.9).
pub fn build_dlq_delete_by_message_ids(table: &TableRef, message_ids: &[String]) -> ComposedQuery {
    let placeholders: Vec<String> = (0..message_ids.len()).map(|i| format!("@id{i}")).collect();
    let sql = format!(
        "DELETE FROM {table} WHERE message_id IN ({list})",
        table = table.qualified(),
        list = placeholders.join(", ")
    );
    let params = message_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (format!("id{i}"), ParamValue::Str(id.clone())))
        .collect();
    ComposedQuery { sql, params }
}

/// `DELETE /api/instances` (by derived `id` set).
pub fn build_delete_instances_by_ids(table: &TableRef, ids: &[String]) -> ComposedQuery {
    let placeholders: Vec<String> = (0..ids.len()).map(|i| format!("@id{i}")).collect();
    let sql = format!(
        "DELETE FROM {table} WHERE id IN ({list})",
        table = table.qualified(),
        list = placeholders.join(", ")
    );
    let params = ids
        .iter()
        .enumerate()
        .map(|(i, id)| (format!("id{i}"), ParamValue::Str(id.clone())))
        .collect();
    ComposedQuery { sql, params }
}

/// `POST /api/studies/delete` — removes every row whose `metadata` carries
/// the given `StudyInstanceUID`.
pub fn build_delete_study(table: &TableRef, study_uid: &str) -> ComposedQuery {
    let sql = format!(
        "DELETE FROM {table} WHERE JSON_VALUE(metadata, '$.StudyInstanceUID') = @study_uid",
        table = table.qualified()
    );
    ComposedQuery {
        sql,
        params: vec![("study_uid".into(), ParamValue::Str(study_uid.to_string()))],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TableRef {
        TableRef::new("proj", "ds", "ingestion").unwrap()
    }

    #[test]
    fn resolve_search_column_accepts_top_level_column() {
        assert_eq!(resolve_search_column("path").unwrap(), "path");
    }

    #[test]
    fn resolve_search_column_maps_allow_listed_metadata_key() {
        assert_eq!(
            resolve_search_column("PatientID").unwrap(),
            "JSON_VALUE(metadata, '$.PatientID')"
        );
    }

    #[test]
    fn resolve_search_column_rejects_unknown_key() {
        let err = resolve_search_column("Robert'); DROP TABLE x;--").unwrap_err();
        assert_eq!(err.status(), 422);
    }

    #[test]
    fn instances_search_binds_value_not_inlined() {
        let q = build_instances_search(&table(), "PatientID", "P1", 20, 0).unwrap();
        assert!(!q.sql.contains("P1"));
        assert!(q.sql.contains("@value"));
        assert!(q
            .params
            .iter()
            .any(|(name, v)| name == "value" && *v == ParamValue::Str("P1".into())));
    }

    #[test]
    fn instances_search_rejects_unsupported_key() {
        assert!(build_instances_search(&table(), "nope", "v", 10, 0).is_err());
    }

    #[test]
    fn studies_search_groups_by_study_instance_uid() {
        let q = build_studies_search(&table(), "Modality", "CT", 20, 0).unwrap();
        assert!(q.sql.contains("GROUP BY study_instance_uid"));
    }

    #[test]
    fn study_instances_binds_uid() {
        let q = build_study_instances(&table(), "1.2.3");
        assert!(!q.sql.contains("1.2.3"));
        assert_eq!(q.params[0].1, ParamValue::Str("1.2.3".into()));
    }

    #[test]
    fn dlq_delete_builds_one_placeholder_per_id() {
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let q = build_dlq_delete_by_message_ids(&table(), &ids);
        assert!(q.sql.contains("@id0"));
        assert!(q.sql.contains("@id1"));
        assert!(q.sql.contains("@id2"));
        assert_eq!(q.params.len(), 3);
    }

    #[test]
    fn latest_rows_cte_filters_null_metadata_and_dedupes_by_path() {
        let cte = latest_rows_cte(&table());
        assert!(cte.contains("WHERE metadata IS NOT NULL"));
        assert!(cte.contains("PARTITION BY path"));
        assert!(cte.contains("rn = 1"));
    }

    #[test]
    fn delete_instances_builds_one_placeholder_per_id() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let q = build_delete_instances_by_ids(&table(), &ids);
        assert!(q.sql.contains("DELETE FROM"));
        assert!(q.sql.contains("@id0"));
        assert!(q.sql.contains("@id1"));
        assert_eq!(q.params.len(), 2);
    }

    #[test]
    fn delete_study_binds_study_uid_param() {
        let q = build_delete_study(&table(), "1.2.3");
        assert!(q.sql.contains("JSON_VALUE(metadata, '$.StudyInstanceUID')"));
        assert_eq!(q.params.len(), 1);
        assert_eq!(q.params[0].0, "study_uid");
    }
}
