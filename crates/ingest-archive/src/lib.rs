// SPDX-License-Identifier: MIT OR Apache-2.0
//! Archive format detection and member extraction (spec.md §4.3).
//!
//! `.dcm` members are streamed to a scoped temporary directory, read back,
//! and handed off as their own ingestion record keyed by `{archive_uri}#
//! {member_name}`. A corrupt archive fails the whole invocation; a bad
//! individual member never does — it's counted and logged instead.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use ingest_core::IngestionRecord;
use ingest_error::IngestError;
use std::io::Read;
use std::path::Path;
use tracing::warn;

/// Archive container format, detected from the object's name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// A `.zip` archive.
    Zip,
    /// A gzip-compressed tar archive (`.tar.gz`/`.tgz`).
    TarGz,
}

impl ArchiveFormat {
    /// Detects the format from an object name's suffix, or `None` if it
    /// isn't a recognised archive extension.
    pub fn detect(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else {
            None
        }
    }
}

/// One successfully extracted `.dcm` member.
#[derive(Debug, Clone)]
pub struct ArchiveMember {
    /// `{archive_uri}#{member_name}` (spec.md §3 invariant d).
    pub record_path: String,
    /// The member's basename, as it appeared in the archive.
    pub member_name: String,
    /// Raw DICOM bytes.
    pub bytes: Vec<u8>,
}

/// A member that failed to extract or read back; counted, never fatal to
/// the archive as a whole.
#[derive(Debug, Clone)]
pub struct ArchiveMemberError {
    /// The member's name within the archive, if known.
    pub member_name: String,
    /// What went wrong.
    pub reason: String,
}

/// Result of expanding one archive.
#[derive(Debug, Clone, Default)]
pub struct ArchiveExpansion {
    /// Extracted `.dcm` members, in archive order.
    pub members: Vec<ArchiveMember>,
    /// Per-member failures, isolated from the rest of the archive.
    pub errors: Vec<ArchiveMemberError>,
}

fn is_dcm_member(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".dcm")
}

fn basename(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
        .to_string()
}

/// Expands an archive's bytes, selecting `.dcm`-suffixed members
/// (case-insensitive) and reading each one back from a scoped temporary
/// directory that's removed on every exit path, success or failure.
pub fn expand_archive(bytes: &[u8], archive_uri: &str) -> Result<ArchiveExpansion, IngestError> {
    let format = ArchiveFormat::detect(archive_uri)
        .ok_or_else(|| IngestError::invalid_input(format!("unrecognised archive suffix: {archive_uri}")))?;

    let workdir = tempfile::Builder::new()
        .prefix("ingest-archive-")
        .tempdir()
        .map_err(|e| IngestError::internal(format!("failed to acquire scoped tempdir: {e}")))?;

    match format {
        ArchiveFormat::Zip => expand_zip(bytes, archive_uri, workdir.path()),
        ArchiveFormat::TarGz => expand_tar_gz(bytes, archive_uri, workdir.path()),
    }
    // `workdir` drops here regardless of the branch's outcome, removing the
    // directory tree.
}

fn expand_zip(bytes: &[u8], archive_uri: &str, workdir: &Path) -> Result<ArchiveExpansion, IngestError> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor)
        .map_err(|e| IngestError::invalid_input(format!("corrupt zip archive: {e}")))?;

    let mut expansion = ArchiveExpansion::default();
    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                expansion.errors.push(ArchiveMemberError {
                    member_name: format!("entry#{index}"),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let entry_name = entry.name().to_string();
        if entry.is_dir() || !is_dcm_member(&entry_name) {
            continue;
        }

        let member_name = basename(&entry_name);
        let dest_path = workdir.join(&member_name);
        match extract_entry(&mut entry, &dest_path).and_then(|_| std::fs::read(&dest_path)) {
            Ok(data) => expansion.members.push(ArchiveMember {
                record_path: IngestionRecord::archive_member_path(archive_uri, &member_name),
                member_name,
                bytes: data,
            }),
            Err(e) => {
                warn!(member = %entry_name, error = %e, "skipping unreadable archive member");
                expansion.errors.push(ArchiveMemberError {
                    member_name,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(expansion)
}

fn extract_entry(entry: &mut impl Read, dest_path: &Path) -> std::io::Result<()> {
    let mut file = std::fs::File::create(dest_path)?;
    std::io::copy(entry, &mut file)?;
    Ok(())
}

fn expand_tar_gz(bytes: &[u8], archive_uri: &str, workdir: &Path) -> Result<ArchiveExpansion, IngestError> {
    let decoder = flate2::read::GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);
    let entries = archive
        .entries()
        .map_err(|e| IngestError::invalid_input(format!("corrupt tar.gz archive: {e}")))?;

    let mut expansion = ArchiveExpansion::default();
    for entry_result in entries {
        let mut entry = match entry_result {
            Ok(entry) => entry,
            Err(e) => {
                expansion.errors.push(ArchiveMemberError {
                    member_name: "<unreadable tar entry>".to_string(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let entry_path = match entry.path() {
            Ok(p) => p.to_string_lossy().into_owned(),
            Err(e) => {
                expansion.errors.push(ArchiveMemberError {
                    member_name: "<unreadable tar entry path>".to_string(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if !entry.header().entry_type().is_file() || !is_dcm_member(&entry_path) {
            continue;
        }

        let member_name = basename(&entry_path);
        let dest_path = workdir.join(&member_name);
        match extract_entry(&mut entry, &dest_path).and_then(|_| std::fs::read(&dest_path)) {
            Ok(data) => expansion.members.push(ArchiveMember {
                record_path: IngestionRecord::archive_member_path(archive_uri, &member_name),
                member_name,
                bytes: data,
            }),
            Err(e) => {
                warn!(member = %entry_path, error = %e, "skipping unreadable archive member");
                expansion.errors.push(ArchiveMemberError {
                    member_name,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(expansion)
}
