// SPDX-License-Identifier: MIT OR Apache-2.0
//! Image track: render pixel data to JPEG for the allow-listed transfer
//! syntaxes (spec.md §4.4 step 2 "IMAGE", step 4).

use crate::sop_class::is_allowed_transfer_syntax;
use dicom_object::{FileDicomObject, InMemDicomObject};
use dicom_pixeldata::PixelDecoder;
use ingest_error::IngestError;

/// JPEG bytes rendered from frame 0 of an image instance's pixel data.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    /// Encoded JPEG bytes.
    pub jpeg_bytes: Vec<u8>,
    /// Always `"image/jpeg"` — kept as a field so callers don't hardcode it.
    pub mime_type: &'static str,
}

/// Renders an image instance's first frame to JPEG, or `None` if the
/// transfer syntax isn't on the allow-list (spec.md §4.4 step 4: "unsupported
/// -> no image, record still persisted without vector").
pub fn render_image(
    obj: &FileDicomObject<InMemDicomObject>,
    transfer_syntax_uid: &str,
) -> Result<Option<RenderedImage>, IngestError> {
    if !is_allowed_transfer_syntax(transfer_syntax_uid) {
        return Ok(None);
    }

    let decoded = obj
        .decode_pixel_data()
        .map_err(|e| IngestError::invalid_input(format!("failed to decode pixel data: {e}")))?;
    let dynamic_image = decoded
        .to_dynamic_image(0)
        .map_err(|e| IngestError::invalid_input(format!("failed to convert frame 0 to an image: {e}")))?;

    let mut jpeg_bytes = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut jpeg_bytes);
    dynamic_image
        .write_to(&mut cursor, image::ImageFormat::Jpeg)
        .map_err(|e| IngestError::internal(format!("failed to encode JPEG: {e}")))?;

    Ok(Some(RenderedImage {
        jpeg_bytes,
        mime_type: "image/jpeg",
    }))
}

/// Builds the processed-data upload path `{study}/{series}/{instance}.jpg`
/// (spec.md §4.4 step 2).
pub fn upload_path(study_instance_uid: &str, series_instance_uid: &str, sop_instance_uid: &str) -> String {
    format!("{study_instance_uid}/{series_instance_uid}/{sop_instance_uid}.jpg")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_path_joins_the_identity_triple() {
        assert_eq!(upload_path("1.2.3", "1.2.3.4", "1.2.3.4.5"), "1.2.3/1.2.3.4/1.2.3.4.5.jpg");
    }

    #[test]
    fn allow_list_rejects_unknown_transfer_syntax_before_any_decode_attempt() {
        // render_image short-circuits on the transfer-syntax check, so an
        // unsupported syntax never needs a parsed object to prove `None`.
        assert!(!is_allowed_transfer_syntax("1.2.840.10008.1.2.4.100"));
    }
}
