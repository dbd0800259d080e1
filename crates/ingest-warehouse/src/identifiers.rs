// SPDX-License-Identifier: MIT OR Apache-2.0
//! Identifier grammar for admin SQL composition (spec.md §6).
//!
//! Every identifier the Admin Query Layer substitutes directly into a SQL
//! template — dataset, table, project, or a metadata JSON path segment —
//! is validated against a fixed grammar *before* substitution. Values
//! (search terms, UIDs) never go through this path; they're always bound
//! parameters.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// An identifier failed the grammar check.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsafe identifier: {0}")]
pub struct UnsafeIdentifier(pub String);

fn dataset_table_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
}

fn project_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9\-:.]*$").unwrap())
}

/// Validates a dataset or table identifier: `^[A-Za-z_][A-Za-z0-9_]*$`.
pub fn validate_dataset_or_table(id: &str) -> Result<(), UnsafeIdentifier> {
    if dataset_table_re().is_match(id) {
        Ok(())
    } else {
        Err(UnsafeIdentifier(id.to_string()))
    }
}

/// Validates a project identifier: `^[A-Za-z0-9][A-Za-z0-9\-:.]*$`.
pub fn validate_project(id: &str) -> Result<(), UnsafeIdentifier> {
    if project_re().is_match(id) {
        Ok(())
    } else {
        Err(UnsafeIdentifier(id.to_string()))
    }
}

/// Validates a metadata JSON path suffix: every `.`-separated segment must
/// independently match the dataset/table identifier grammar. Used for the
/// search-key allow-list's `JSON_VALUE(metadata, '$.Segment.Segment')`
/// composition.
pub fn validate_metadata_path(path: &str) -> Result<(), UnsafeIdentifier> {
    if path.is_empty() {
        return Err(UnsafeIdentifier(path.to_string()));
    }
    for segment in path.split('.') {
        validate_dataset_or_table(segment).map_err(|_| UnsafeIdentifier(path.to_string()))?;
    }
    Ok(())
}

/// A fully-qualified, grammar-checked `project.dataset.table` reference,
/// safe to interpolate directly into a SQL template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// GCP project id.
    pub project: String,
    /// BigQuery dataset id.
    pub dataset: String,
    /// Table id within the dataset.
    pub table: String,
}

impl TableRef {
    /// Validates all three components and returns a [`TableRef`].
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Result<Self, UnsafeIdentifier> {
        let project = project.into();
        let dataset = dataset.into();
        let table = table.into();
        validate_project(&project)?;
        validate_dataset_or_table(&dataset)?;
        validate_dataset_or_table(&table)?;
        Ok(Self {
            project,
            dataset,
            table,
        })
    }

    /// Backtick-quoted `` `project.dataset.table` `` form for GoogleSQL.
    pub fn qualified(&self) -> String {
        format!("`{}.{}.{}`", self.project, self.dataset, self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_dataset_identifier() {
        assert!(validate_dataset_or_table("ingestion_rows").is_ok());
        assert!(validate_dataset_or_table("_leading_underscore").is_ok());
    }

    #[test]
    fn rejects_identifier_with_backtick() {
        assert!(validate_dataset_or_table("rows`; DROP TABLE x").is_err());
    }

    #[test]
    fn rejects_identifier_with_semicolon() {
        assert!(validate_dataset_or_table("rows;select").is_err());
    }

    #[test]
    fn rejects_identifier_with_sql_comment() {
        assert!(validate_dataset_or_table("rows--comment").is_err());
    }

    #[test]
    fn rejects_identifier_starting_with_digit() {
        assert!(validate_dataset_or_table("1rows").is_err());
    }

    #[test]
    fn accepts_project_identifier_with_colons_and_dots() {
        assert!(validate_project("my-project:region.sub").is_ok());
    }

    #[test]
    fn rejects_project_identifier_with_backtick() {
        assert!(validate_project("proj`").is_err());
    }

    #[test]
    fn metadata_path_validates_every_segment() {
        assert!(validate_metadata_path("StudyInstanceUID").is_ok());
        assert!(validate_metadata_path("Patient.Name").is_ok());
        assert!(validate_metadata_path("Patient.Name;DROP").is_err());
    }

    #[test]
    fn metadata_path_rejects_empty_string() {
        assert!(validate_metadata_path("").is_err());
    }

    #[test]
    fn table_ref_qualifies_with_backticks() {
        let t = TableRef::new("proj", "ds", "tbl").unwrap();
        assert_eq!(t.qualified(), "`proj.ds.tbl`");
    }

    #[test]
    fn table_ref_rejects_unsafe_table_name() {
        assert!(TableRef::new("proj", "ds", "tbl`--").is_err());
    }
}
