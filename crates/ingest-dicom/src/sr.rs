// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structured report track: walk the content-item tree and concatenate
//! text (spec.md §4.4 step 2 "STRUCTURED_REPORT").
//!
//! A DICOM SR document is a tree of content items rooted at
//! `ContentSequence` (0040,A730); each item carries a `ValueType` (TEXT,
//! NUM, CODE, DATE, TIME, PNAME, CONTAINER, ...) and a type-specific value
//! tag. [`ContentSwitches`] controls which value types contribute text.

use dicom_core::Tag;
use dicom_core::value::Value as DicomValue;
use dicom_object::mem::InMemElement;
use dicom_object::{FileDicomObject, InMemDicomObject};

const TAG_VALUE_TYPE: Tag = Tag(0x0040, 0xA040);
const TAG_CONTENT_SEQUENCE: Tag = Tag(0x0040, 0xA730);
const TAG_TEXT_VALUE: Tag = Tag(0x0040, 0xA160);
const TAG_NUMERIC_VALUE: Tag = Tag(0x0040, 0xA30A);
const TAG_CONCEPT_CODE_SEQUENCE: Tag = Tag(0x0040, 0xA168);
const TAG_CODE_MEANING: Tag = Tag(0x0008, 0x0104);
const TAG_DATE: Tag = Tag(0x0040, 0xA121);
const TAG_TIME: Tag = Tag(0x0040, 0xA122);
const TAG_PNAME: Tag = Tag(0x0040, 0xA123);

/// Which `ValueType`s contribute text when walking the content-item tree
/// (spec.md §4.4 step 2: "concatenate per configured switches").
#[derive(Debug, Clone, Copy)]
pub struct ContentSwitches {
    /// Include `TEXT` items.
    pub include_text: bool,
    /// Include `NUM` items.
    pub include_num: bool,
    /// Include `CODE` items (rendered as their `CodeMeaning`).
    pub include_code: bool,
    /// Include `DATE`/`TIME` items.
    pub include_date_time: bool,
    /// Include `PNAME` items.
    pub include_pname: bool,
}

impl Default for ContentSwitches {
    fn default() -> Self {
        Self {
            include_text: true,
            include_num: true,
            include_code: true,
            include_date_time: false,
            include_pname: false,
        }
    }
}

fn element_string(element: &InMemElement) -> Option<String> {
    match element.value() {
        DicomValue::Primitive(prim) => prim.to_str().ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn code_meaning(item: &InMemDicomObject) -> Option<String> {
    let seq_element = item.element(TAG_CONCEPT_CODE_SEQUENCE).ok()?;
    let DicomValue::Sequence(seq) = seq_element.value() else {
        return None;
    };
    let first_item = seq.items().first()?;
    first_item
        .element(TAG_CODE_MEANING)
        .ok()
        .and_then(element_string)
}

/// Walks one content item, appending any contributed text to `out`, then
/// recurses into its nested `ContentSequence`.
fn walk_item(item: &InMemDicomObject, switches: ContentSwitches, out: &mut Vec<String>) {
    let value_type = item
        .element(TAG_VALUE_TYPE)
        .ok()
        .and_then(element_string)
        .unwrap_or_default();

    match value_type.as_str() {
        "TEXT" if switches.include_text => {
            if let Some(text) = item.element(TAG_TEXT_VALUE).ok().and_then(element_string) {
                out.push(text);
            }
        }
        "NUM" if switches.include_num => {
            if let Some(value) = item.element(TAG_NUMERIC_VALUE).ok().and_then(element_string) {
                out.push(value);
            }
        }
        "CODE" if switches.include_code => {
            if let Some(meaning) = code_meaning(item) {
                out.push(meaning);
            }
        }
        "DATE" if switches.include_date_time => {
            if let Some(value) = item.element(TAG_DATE).ok().and_then(element_string) {
                out.push(value);
            }
        }
        "TIME" if switches.include_date_time => {
            if let Some(value) = item.element(TAG_TIME).ok().and_then(element_string) {
                out.push(value);
            }
        }
        "PNAME" if switches.include_pname => {
            if let Some(value) = item.element(TAG_PNAME).ok().and_then(element_string) {
                out.push(value);
            }
        }
        _ => {}
    }

    if let Ok(content_seq) = item.element(TAG_CONTENT_SEQUENCE) {
        if let DicomValue::Sequence(seq) = content_seq.value() {
            for child in seq.items() {
                walk_item(child, switches, out);
            }
        }
    }
}

/// Concatenates text out of a structured-report object's content-item
/// tree, root `ContentSequence` included. Items are joined with newlines,
/// preserving tree-walk order.
pub fn extract_sr_text(obj: &FileDicomObject<InMemDicomObject>, switches: ContentSwitches) -> String {
    let mut out = Vec::new();
    if let Ok(root_seq) = obj.element(TAG_CONTENT_SEQUENCE) {
        if let DicomValue::Sequence(seq) = root_seq.value() {
            for item in seq.items() {
                walk_item(item, switches, &mut out);
            }
        }
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_switches_enable_text_num_and_code() {
        let switches = ContentSwitches::default();
        assert!(switches.include_text);
        assert!(switches.include_num);
        assert!(switches.include_code);
        assert!(!switches.include_date_time);
        assert!(!switches.include_pname);
    }
}
