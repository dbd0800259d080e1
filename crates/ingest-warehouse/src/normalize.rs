// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic study-metadata tree normalization (spec.md §4.8).
//!
//! `GET /studies/:uid/metadata` folds every instance row belonging to a
//! study into a `study -> series -> instances` tree. Keys an entire series
//! (or the whole study) agree on are hoisted to that level and dropped from
//! the leaves, so a caller sees each fact once instead of once per instance.
//! A fixed blocklist of administrative fields is stripped at every level
//! regardless of agreement, since they're bookkeeping, not DICOM content.

use serde_json::{Map, Value};

/// Administrative fields stripped from every level of the metadata tree,
/// independent of whether the whole series or study agrees on them.
const BLOCKLISTED_FIELDS: &[&str] = &[
    "id",
    "path",
    "version",
    "timestamp",
    "bucket",
    "name",
    "generation",
    "messageId",
];

/// Normalized `study -> series -> instances` metadata tree.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize)]
pub struct StudyMetadataTree {
    /// Keys every instance in the study agrees on.
    pub study: Map<String, Value>,
    /// Per-series common keys plus each series' instance leaves.
    pub series: Vec<SeriesMetadata>,
}

/// One series' worth of hoisted and per-instance metadata.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize)]
pub struct SeriesMetadata {
    /// `SeriesInstanceUID` of this group, if every instance carried one.
    #[serde(rename = "seriesInstanceUID", skip_serializing_if = "Option::is_none")]
    pub series_instance_uid: Option<String>,
    /// Keys every instance in this series agrees on, beyond the study-level
    /// hoist.
    pub common: Map<String, Value>,
    /// Each instance's remaining, non-hoisted metadata.
    pub instances: Vec<Map<String, Value>>,
}

fn strip_blocklisted(map: &mut Map<String, Value>) {
    for field in BLOCKLISTED_FIELDS {
        map.remove(*field);
    }
}

/// Keys present, with the same value, in every map of `maps`. Empty if
/// `maps` is empty — there's nothing to agree on.
fn common_keys(maps: &[Map<String, Value>]) -> Map<String, Value> {
    let mut common = Map::new();
    let Some(first) = maps.first() else {
        return common;
    };
    for (key, value) in first {
        if maps
            .iter()
            .skip(1)
            .all(|m| m.get(key) == Some(value))
        {
            common.insert(key.clone(), value.clone());
        }
    }
    common
}

fn remove_keys(map: &mut Map<String, Value>, keys: &Map<String, Value>) {
    for key in keys.keys() {
        map.remove(key);
    }
}

/// Builds a normalized metadata tree from a study's raw instance metadata
/// objects. Instances without a `SeriesInstanceUID` are grouped under a
/// single `None` series, preserving encounter order within each group.
pub fn normalize_study_metadata(instance_metadata: Vec<Map<String, Value>>) -> StudyMetadataTree {
    let mut cleaned: Vec<Map<String, Value>> = instance_metadata
        .into_iter()
        .map(|mut m| {
            strip_blocklisted(&mut m);
            m
        })
        .collect();

    let study_common = common_keys(&cleaned);
    for m in &mut cleaned {
        remove_keys(m, &study_common);
    }

    let mut order: Vec<Option<String>> = Vec::new();
    let mut groups: std::collections::HashMap<Option<String>, Vec<Map<String, Value>>> =
        std::collections::HashMap::new();
    for m in cleaned {
        let key = m
            .get("SeriesInstanceUID")
            .and_then(Value::as_str)
            .map(str::to_string);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(m);
    }

    let series = order
        .into_iter()
        .map(|key| {
            let mut instances = groups.remove(&key).unwrap_or_default();
            let common = common_keys(&instances);
            for instance in &mut instances {
                remove_keys(instance, &common);
            }
            SeriesMetadata {
                series_instance_uid: key,
                common,
                instances,
            }
        })
        .collect();

    StudyMetadataTree {
        study: study_common,
        series,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(json: Value) -> Map<String, Value> {
        json.as_object().unwrap().clone()
    }

    #[test]
    fn hoists_study_wide_common_keys() {
        let instances = vec![
            obj(json!({"PatientID": "P1", "StudyInstanceUID": "S1", "SeriesInstanceUID": "A", "SOPInstanceUID": "1"})),
            obj(json!({"PatientID": "P1", "StudyInstanceUID": "S1", "SeriesInstanceUID": "A", "SOPInstanceUID": "2"})),
        ];
        let tree = normalize_study_metadata(instances);
        assert_eq!(tree.study["PatientID"], "P1");
        assert_eq!(tree.study["StudyInstanceUID"], "S1");
        assert!(!tree.series[0].instances[0].contains_key("PatientID"));
    }

    #[test]
    fn hoists_series_wide_keys_without_polluting_study_level() {
        let instances = vec![
            obj(json!({"PatientID": "P1", "SeriesInstanceUID": "A", "Modality": "CT", "SOPInstanceUID": "1"})),
            obj(json!({"PatientID": "P1", "SeriesInstanceUID": "A", "Modality": "CT", "SOPInstanceUID": "2"})),
            obj(json!({"PatientID": "P1", "SeriesInstanceUID": "B", "Modality": "MR", "SOPInstanceUID": "3"})),
        ];
        let tree = normalize_study_metadata(instances);
        assert_eq!(tree.study["PatientID"], "P1");
        assert!(!tree.study.contains_key("Modality"));
        assert_eq!(tree.series.len(), 2);
        let series_a = tree.series.iter().find(|s| s.series_instance_uid.as_deref() == Some("A")).unwrap();
        assert_eq!(series_a.common["Modality"], "CT");
    }

    #[test]
    fn strips_blocklisted_fields_at_every_level() {
        let instances = vec![
            obj(json!({"id": "x", "path": "gs://b/o", "version": 3, "PatientID": "P1", "SOPInstanceUID": "1"})),
        ];
        let tree = normalize_study_metadata(instances);
        assert!(!tree.study.contains_key("id"));
        assert!(!tree.study.contains_key("path"));
        assert!(!tree.series[0].instances[0].contains_key("version"));
    }

    #[test]
    fn groups_instances_without_series_uid_under_none() {
        let instances = vec![obj(json!({"SOPInstanceUID": "1"}))];
        let tree = normalize_study_metadata(instances);
        assert_eq!(tree.series.len(), 1);
        assert!(tree.series[0].series_instance_uid.is_none());
    }

    #[test]
    fn empty_input_yields_empty_tree() {
        let tree = normalize_study_metadata(vec![]);
        assert!(tree.study.is_empty());
        assert!(tree.series.is_empty());
    }

    #[test]
    fn preserves_series_encounter_order() {
        let instances = vec![
            obj(json!({"SeriesInstanceUID": "B", "SOPInstanceUID": "1"})),
            obj(json!({"SeriesInstanceUID": "A", "SOPInstanceUID": "2"})),
            obj(json!({"SeriesInstanceUID": "B", "SOPInstanceUID": "3"})),
        ];
        let tree = normalize_study_metadata(instances);
        let uids: Vec<_> = tree.series.iter().map(|s| s.series_instance_uid.clone()).collect();
        assert_eq!(uids, vec![Some("B".to_string()), Some("A".to_string())]);
    }
}
