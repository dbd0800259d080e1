// SPDX-License-Identifier: MIT OR Apache-2.0
//! Encapsulated PDF track: pull the embedded document bytes out of a parsed
//! object and extract its text (spec.md §4.4 step 2 "ENCAPSULATED_PDF").
//!
//! The metadata's bulk-data URI describes an offset/length into a
//! not-yet-downloaded object; here the whole instance is already resident in
//! memory, so the `EncapsulatedDocument` element (0042,0011) is read
//! directly off the parsed object instead of re-fetching a byte range.

use dicom_core::Tag;
use dicom_core::value::Value as DicomValue;
use dicom_object::{FileDicomObject, InMemDicomObject};
use ingest_error::IngestError;

/// `EncapsulatedDocument` (0042,0011): the raw PDF bytes, stored as an OB
/// element.
const TAG_ENCAPSULATED_DOCUMENT: Tag = Tag(0x0042, 0x0011);

/// An encapsulated PDF's raw bytes plus its extracted text.
#[derive(Debug, Clone)]
pub struct ExtractedPdf {
    /// The embedded document, byte for byte.
    pub bytes: Vec<u8>,
    /// Text pulled from the PDF, concatenated page by page.
    pub text: String,
}

/// Extracts the embedded PDF bytes and their text content.
///
/// Returns `Ok(None)` if the instance carries no `EncapsulatedDocument`
/// element — a malformed-but-otherwise-valid ENCAPSULATED_PDF instance
/// still gets its row persisted, just without an embedding (spec.md §4.4
/// step 2, step 3).
pub fn extract_pdf(obj: &FileDicomObject<InMemDicomObject>) -> Result<Option<ExtractedPdf>, IngestError> {
    let element = match obj.element(TAG_ENCAPSULATED_DOCUMENT) {
        Ok(e) => e,
        Err(_) => return Ok(None),
    };

    let bytes = match element.value() {
        DicomValue::Primitive(prim) => prim.to_bytes().into_owned(),
        _ => {
            return Err(IngestError::invalid_input(
                "EncapsulatedDocument element did not carry a primitive byte value",
            ));
        }
    };
    if bytes.is_empty() {
        return Ok(None);
    }

    let text = pdf_extract::extract_text_from_mem(&bytes)
        .map_err(|e| IngestError::invalid_input(format!("failed to extract text from encapsulated PDF: {e}")))?;

    Ok(Some(ExtractedPdf { bytes, text }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encapsulated_document_tag_is_the_standard_uid() {
        assert_eq!(TAG_ENCAPSULATED_DOCUMENT, Tag(0x0042, 0x0011));
    }
}
