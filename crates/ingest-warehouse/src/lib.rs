// SPDX-License-Identifier: MIT OR Apache-2.0
//! Warehouse client, SQL composition, and admin query support for the
//! DICOM ingestion pipeline (spec.md §4.6, §4.8, §4.9, §6).
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod dlq;
pub mod identifiers;
pub mod normalize;
pub mod query;

pub use client::{BigQueryWarehouse, DlqSubscriptionSummary, SharedWarehouse, StudySummary, WarehouseClient};
pub use dlq::{dedupe_targets, derive_target, DeadLetterRow, DeadLetterTarget};
pub use identifiers::{validate_dataset_or_table, validate_metadata_path, validate_project, TableRef, UnsafeIdentifier};
pub use normalize::{normalize_study_metadata, SeriesMetadata, StudyMetadataTree};
pub use query::{ComposedQuery, ParamValue};
