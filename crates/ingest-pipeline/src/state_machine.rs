// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ingestion State Machine: per-event-type control flow (spec.md §4.2).
//!
//! Pure decision logic lives here; the actual downloads, archive expansion,
//! and persistence are orchestrated by [`crate::Pipeline`], which has the
//! client handles this module doesn't need to know about.

use ingest_core::ObjectEventType;

/// What the object-store handler does with one notification, decided
/// purely from its `eventType` and object name (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStoreAction {
    /// `delete`/`archive`: persist a metadata-only row, no download.
    MetadataOnly,
    /// `finalize`/`metadata_update` on a `.zip`-suffixed object: download,
    /// then expand as an archive.
    DownloadAndExpand,
    /// `finalize`/`metadata_update` on anything else: download, then run
    /// the single-DICOM path.
    DownloadSingle,
}

/// Decides the object-store handler's action (spec.md §4.2 table).
/// `metadata_update` is deliberately handled identically to `finalize`
/// (the remediation path relies on this to re-trigger processing with the
/// same `(path, version)`, converging on the same deterministic `id`).
pub fn decide_action(event_type: ObjectEventType, object_name: &str) -> ObjectStoreAction {
    if event_type.is_metadata_only() {
        return ObjectStoreAction::MetadataOnly;
    }
    if object_name.to_ascii_lowercase().ends_with(".zip") {
        ObjectStoreAction::DownloadAndExpand
    } else {
        ObjectStoreAction::DownloadSingle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_and_archive_are_metadata_only_regardless_of_name() {
        assert_eq!(
            decide_action(ObjectEventType::ObjectDelete, "study.zip"),
            ObjectStoreAction::MetadataOnly
        );
        assert_eq!(
            decide_action(ObjectEventType::ObjectArchive, "instance.dcm"),
            ObjectStoreAction::MetadataOnly
        );
    }

    #[test]
    fn finalize_on_zip_expands_as_archive() {
        assert_eq!(
            decide_action(ObjectEventType::ObjectFinalize, "bucket/study.ZIP"),
            ObjectStoreAction::DownloadAndExpand
        );
    }

    #[test]
    fn finalize_on_dcm_is_single_path() {
        assert_eq!(
            decide_action(ObjectEventType::ObjectFinalize, "bucket/instance.dcm"),
            ObjectStoreAction::DownloadSingle
        );
    }

    #[test]
    fn metadata_update_matches_finalize_behavior() {
        assert_eq!(
            decide_action(ObjectEventType::ObjectMetadataUpdate, "bucket/study.zip"),
            decide_action(ObjectEventType::ObjectFinalize, "bucket/study.zip")
        );
        assert_eq!(
            decide_action(ObjectEventType::ObjectMetadataUpdate, "bucket/instance.dcm"),
            decide_action(ObjectEventType::ObjectFinalize, "bucket/instance.dcm")
        );
    }
}
