// SPDX-License-Identifier: MIT OR Apache-2.0
//! SOP class routing and transfer syntax allow-listing (spec.md §4.4 step
//! 2, §4.4 step 4, GLOSSARY).
//!
//! The embedding track a DICOM instance takes is decided entirely by its
//! `SOPClassUID`; this module is the single place that knows which UIDs
//! mean "image", "encapsulated PDF", or "structured report".

/// Which embedding-input track a DICOM instance routes to, decided by its
/// `SOPClassUID` (spec.md §4.4 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SopClassTrack {
    /// Allow-listed image storage class — rendered to JPEG.
    Image,
    /// Encapsulated PDF storage — embedded document bytes extracted.
    EncapsulatedPdf,
    /// Basic Text / Enhanced / Comprehensive structured report.
    StructuredReport,
    /// Anything else — embedding track skipped entirely.
    Other,
}

/// Image storage SOP classes allow-listed for the image embedding track
/// (GLOSSARY "SOP class (image)"): CT, MR, US, CR, DX, MG, XA, NM, PT, SC,
/// RT storage classes.
const IMAGE_SOP_CLASSES: &[&str] = &[
    "1.2.840.10008.5.1.4.1.1.2",     // CT Image Storage
    "1.2.840.10008.5.1.4.1.1.4",     // MR Image Storage
    "1.2.840.10008.5.1.4.1.1.6.1",   // Ultrasound Image Storage
    "1.2.840.10008.5.1.4.1.1.1",     // Computed Radiography Image Storage (CR)
    "1.2.840.10008.5.1.4.1.1.1.1",   // Digital X-Ray Image Storage (DX)
    "1.2.840.10008.5.1.4.1.1.1.2",   // Digital Mammography X-Ray Image Storage (MG)
    "1.2.840.10008.5.1.4.1.1.12.1",  // X-Ray Angiographic Image Storage (XA)
    "1.2.840.10008.5.1.4.1.1.20",    // Nuclear Medicine Image Storage (NM)
    "1.2.840.10008.5.1.4.1.1.128",   // PET Image Storage (PT)
    "1.2.840.10008.5.1.4.1.1.7",     // Secondary Capture Image Storage (SC)
    "1.2.840.10008.5.1.4.1.1.481.1", // RT Image Storage
];

/// Encapsulated PDF storage SOP class.
const ENCAPSULATED_PDF_SOP_CLASS: &str = "1.2.840.10008.5.1.4.1.1.104.1";

/// Structured report SOP classes (GLOSSARY "SOP class (SR)"): Basic Text,
/// Enhanced, Comprehensive.
const SR_SOP_CLASSES: &[&str] = &[
    "1.2.840.10008.5.1.4.1.1.88.11", // Basic Text SR
    "1.2.840.10008.5.1.4.1.1.88.22", // Enhanced SR
    "1.2.840.10008.5.1.4.1.1.88.33", // Comprehensive SR
];

/// Classifies a `SOPClassUID` into its embedding-input track.
pub fn classify(sop_class_uid: &str) -> SopClassTrack {
    let uid = sop_class_uid.trim_end_matches('\0').trim();
    if IMAGE_SOP_CLASSES.contains(&uid) {
        SopClassTrack::Image
    } else if uid == ENCAPSULATED_PDF_SOP_CLASS {
        SopClassTrack::EncapsulatedPdf
    } else if SR_SOP_CLASSES.contains(&uid) {
        SopClassTrack::StructuredReport
    } else {
        SopClassTrack::Other
    }
}

/// Transfer syntaxes the image-rendering pipeline accepts (spec.md §4.4
/// step 4, GLOSSARY "Allowed transfer syntaxes"). Anything outside this
/// list degrades the image track to "no image, record still persisted".
const ALLOWED_TRANSFER_SYNTAXES: &[&str] = &[
    "1.2.840.10008.1.2",      // Implicit VR Little Endian
    "1.2.840.10008.1.2.1",    // Explicit VR Little Endian
    "1.2.840.10008.1.2.1.99", // Deflated Explicit VR Little Endian
    "1.2.840.10008.1.2.2",    // Explicit VR Big Endian
    "1.2.840.10008.1.2.5",    // RLE Lossless
    "1.2.840.10008.1.2.4.50", // JPEG Baseline (Process 1)
    "1.2.840.10008.1.2.4.51", // JPEG Extended (Process 2 & 4)
    "1.2.840.10008.1.2.4.57", // JPEG Lossless, Non-Hierarchical (Process 14)
    "1.2.840.10008.1.2.4.70", // JPEG Lossless, First-Order Prediction (Process 14, SV1)
    "1.2.840.10008.1.2.4.90", // JPEG 2000 Lossless
    "1.2.840.10008.1.2.4.91", // JPEG 2000
];

/// `true` if `transfer_syntax_uid` is on the image pipeline's allow-list.
pub fn is_allowed_transfer_syntax(transfer_syntax_uid: &str) -> bool {
    let uid = transfer_syntax_uid.trim_end_matches('\0').trim();
    ALLOWED_TRANSFER_SYNTAXES.contains(&uid)
}
