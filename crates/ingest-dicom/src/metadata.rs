// SPDX-License-Identifier: MIT OR Apache-2.0
//! DICOM tag extraction to the `metadata` JSON string (spec.md §3, §4.4
//! step 1).
//!
//! Every element in the parsed object is a candidate for the output map;
//! [`ExtractionOptions`] controls whether private tags, binary-valued
//! elements, and the file-meta-header group are included, and whether keys
//! use the dictionary's common name or the raw `GGGG,EEEE` tag.

use dicom_core::header::HasLength;
use dicom_core::value::Value as DicomValue;
use dicom_core::{Tag, VR};
use dicom_dictionary_std::StandardDataDictionary;
use dicom_object::mem::InMemElement;
use dicom_object::{FileDicomObject, InMemDicomObject};
use ingest_error::IngestError;
use serde_json::{Map, Value as JsonValue};

/// Controls which elements are included in extracted metadata and how keys
/// are named (spec.md §4.4 step 1: "active output options (flags
/// controlling private-tag, binary-tag, meta-header inclusion; common-name
/// mapping)").
#[derive(Debug, Clone, Copy)]
pub struct ExtractionOptions {
    /// Include private (odd group number) elements.
    pub include_private_tags: bool,
    /// Include elements whose VR is a binary/bulk type (OB/OW/OF/UN/etc).
    pub include_binary_tags: bool,
    /// Include the file-meta-header group (0002,xxxx).
    pub include_meta_header: bool,
    /// Key elements by their dictionary common name (`"PatientID"`)
    /// instead of the raw tag (`"0010,0020"`) when a name is known.
    pub use_common_names: bool,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            include_private_tags: false,
            include_binary_tags: false,
            include_meta_header: false,
            use_common_names: true,
        }
    }
}

/// Binary/bulk VRs excluded from the metadata JSON unless
/// `include_binary_tags` is set — their values have no meaningful string
/// projection and can be large.
fn is_binary_vr(vr: VR) -> bool {
    matches!(vr, VR::OB | VR::OW | VR::OF | VR::OD | VR::OL | VR::OV | VR::UN)
}

fn is_private_tag(tag: Tag) -> bool {
    tag.group() % 2 == 1
}

fn is_meta_header_tag(tag: Tag) -> bool {
    tag.group() == 0x0002
}

fn tag_key(tag: Tag, use_common_names: bool) -> String {
    if use_common_names {
        if let Some(entry) = StandardDataDictionary.by_tag(tag) {
            return entry.alias.to_string();
        }
    }
    format!("{:04X},{:04X}", tag.group(), tag.element())
}

/// Converts one element's value to a JSON value: a scalar for single-valued
/// elements, an array for multi-valued ones, or a string placeholder for
/// sequences (sequences carry no embedding-relevant scalar content and are
/// summarized rather than recursively flattened).
fn element_to_json(element: &InMemElement) -> Option<JsonValue> {
    match element.value() {
        DicomValue::Primitive(prim) => {
            let strings = prim.to_multi_str();
            if strings.is_empty() {
                None
            } else if strings.len() == 1 {
                Some(JsonValue::String(strings[0].trim_end_matches('\0').to_string()))
            } else {
                Some(JsonValue::Array(
                    strings
                        .iter()
                        .map(|s| JsonValue::String(s.trim_end_matches('\0').to_string()))
                        .collect(),
                ))
            }
        }
        DicomValue::Sequence(seq) => {
            Some(JsonValue::String(format!("<sequence: {} item(s)>", seq.items().len())))
        }
        DicomValue::PixelSequence(_) => None,
    }
}

/// Extracts a flat JSON object of DICOM tags from a parsed object,
/// filtered and keyed according to `options`.
pub fn extract_metadata(
    obj: &FileDicomObject<InMemDicomObject>,
    options: ExtractionOptions,
) -> Map<String, JsonValue> {
    let mut out = Map::new();
    for element in obj.iter() {
        let tag = element.header().tag;
        if is_meta_header_tag(tag) && !options.include_meta_header {
            continue;
        }
        if is_private_tag(tag) && !options.include_private_tags {
            continue;
        }
        if is_binary_vr(element.header().vr()) && !options.include_binary_tags {
            continue;
        }
        if element.length().is_undefined() && matches!(element.value(), DicomValue::PixelSequence(_)) {
            continue;
        }
        if let Some(value) = element_to_json(element) {
            out.insert(tag_key(tag, options.use_common_names), value);
        }
    }
    out
}

/// Reads a single element's first string value by tag, trimming DICOM's
/// trailing-space/NUL padding. Used for the handful of tags the processor
/// needs to read directly (`SOPClassUID`, the identity triple) rather than
/// through the general extraction map.
pub fn read_tag_string(obj: &FileDicomObject<InMemDicomObject>, tag: Tag) -> Option<String> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.value().to_str().ok())
        .map(|s| s.trim_end_matches(['\0', ' ']).to_string())
        .filter(|s| !s.is_empty())
}

/// Parses a raw DICOM buffer into an in-memory object (spec.md §4.4 step
/// 1: "invoke the parser (external)").
pub fn parse_dicom(bytes: &[u8]) -> Result<FileDicomObject<InMemDicomObject>, IngestError> {
    dicom_object::from_reader(std::io::Cursor::new(bytes))
        .map_err(|e| IngestError::invalid_input(format!("not a valid DICOM object: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_vr_detection_covers_bulk_types() {
        assert!(is_binary_vr(VR::OB));
        assert!(is_binary_vr(VR::UN));
        assert!(!is_binary_vr(VR::CS));
        assert!(!is_binary_vr(VR::LO));
    }

    #[test]
    fn private_tag_detection_is_odd_group() {
        assert!(is_private_tag(Tag(0x0009, 0x0001)));
        assert!(!is_private_tag(Tag(0x0010, 0x0020)));
    }

    #[test]
    fn meta_header_detection_is_group_0002() {
        assert!(is_meta_header_tag(Tag(0x0002, 0x0010)));
        assert!(!is_meta_header_tag(Tag(0x0008, 0x0020)));
    }

    #[test]
    fn tag_key_falls_back_to_raw_tag_when_unknown() {
        let key = tag_key(Tag(0x0009, 0x0001), true);
        assert_eq!(key, "0009,0001");
    }

    #[test]
    fn default_options_exclude_private_binary_and_meta_header() {
        let opts = ExtractionOptions::default();
        assert!(!opts.include_private_tags);
        assert!(!opts.include_binary_tags);
        assert!(!opts.include_meta_header);
        assert!(opts.use_common_names);
    }
}
