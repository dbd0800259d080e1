// SPDX-License-Identifier: MIT OR Apache-2.0
//! DICOM parsing, SOP-class routing, and embedding-input extraction
//! (spec.md §4.4).
//!
//! [`DicomProcessor::process`] is the single entry point: given a raw DICOM
//! buffer it parses the object, extracts metadata, reads the identity
//! triple, and decides + builds the embedding-input artifact (a rendered
//! JPEG, extracted/summarized text, or nothing). It does not upload
//! anything or call the embedding endpoint itself — those require the
//! object-store and embedding clients, which live one layer up.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod image;
pub mod metadata;
pub mod pdf;
pub mod sop_class;
pub mod sr;
pub mod summarize;

use dicom_core::Tag;
use ingest_error::IngestError;
use metadata::ExtractionOptions;
use sop_class::SopClassTrack;
use sr::ContentSwitches;
use std::sync::Arc;
use summarize::SummarizeClient;

const TAG_SOP_CLASS_UID: Tag = Tag(0x0008, 0x0016);
const TAG_STUDY_INSTANCE_UID: Tag = Tag(0x0020, 0x000D);
const TAG_SERIES_INSTANCE_UID: Tag = Tag(0x0020, 0x000E);
const TAG_SOP_INSTANCE_UID: Tag = Tag(0x0008, 0x0018);

/// The embedding-input artifact decided for one processed instance
/// (spec.md §4.4 step 2, step 5).
#[derive(Debug, Clone)]
pub enum EmbeddingTrack {
    /// Rendered JPEG, ready to upload to the processed-data bucket.
    Image {
        /// Encoded JPEG bytes.
        jpeg_bytes: Vec<u8>,
        /// Always `"image/jpeg"`.
        mime_type: &'static str,
        /// `{study}/{series}/{instance}.jpg`, relative to the configured
        /// processed-data bucket root.
        upload_path: String,
    },
    /// Extracted (and possibly summarized) text, ready to embed directly.
    Text {
        /// The text to embed.
        content: String,
    },
    /// No embedding input: unsupported SOP class, unsupported transfer
    /// syntax, no extractable content, or text too long with no
    /// summarization model configured.
    None,
}

/// The identity triple plus SOP/transfer-syntax identifiers read directly
/// off the parsed object, independent of the general metadata extraction.
#[derive(Debug, Clone, Default)]
pub struct DicomIdentity {
    /// `SOPClassUID` (0008,0016).
    pub sop_class_uid: String,
    /// `TransferSyntaxUID`, read from the file-meta header.
    pub transfer_syntax_uid: String,
    /// `StudyInstanceUID` (0020,000D).
    pub study_instance_uid: String,
    /// `SeriesInstanceUID` (0020,000E).
    pub series_instance_uid: String,
    /// `SOPInstanceUID` (0008,0018).
    pub sop_instance_uid: String,
}

/// Result of processing one DICOM instance (spec.md §4.4: "Output: `{
/// metadata_json_string, size, embeddings? }`").
#[derive(Debug, Clone)]
pub struct ProcessedDicom {
    /// Identity and routing identifiers.
    pub identity: DicomIdentity,
    /// The classified embedding track, decided from `sop_class_uid`.
    pub sop_class_track: SopClassTrack,
    /// Extracted metadata, serialised as a JSON object string.
    pub metadata_json: String,
    /// Size of the raw input buffer, in bytes.
    pub size: i64,
    /// The embedding-input artifact, if any.
    pub embedding_track: EmbeddingTrack,
}

/// Processing options bundled together so callers configure a processor
/// once and reuse it across instances.
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    /// Controls which tags land in `metadata_json`.
    pub extraction: ExtractionOptions,
    /// Controls which structured-report content-item value types
    /// contribute text.
    pub content_switches: ContentSwitches,
    /// Text length above which summarization is attempted (spec.md §4.4
    /// step 3 default: 1024).
    pub summarize_max_length: usize,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            extraction: ExtractionOptions::default(),
            content_switches: ContentSwitches::default(),
            summarize_max_length: 1024,
        }
    }
}

/// Parses DICOM buffers into [`ProcessedDicom`] results, deciding and
/// building the embedding-input artifact along the way.
pub struct DicomProcessor {
    options: ProcessorOptions,
    summarize_client: Option<Arc<dyn SummarizeClient>>,
}

impl DicomProcessor {
    /// Builds a processor. `summarize_client` is `None` when no
    /// summarization model is configured — text over the length threshold
    /// is then left unembedded rather than failing the record (spec.md
    /// §4.4 step 3).
    pub fn new(options: ProcessorOptions, summarize_client: Option<Arc<dyn SummarizeClient>>) -> Self {
        Self {
            options,
            summarize_client,
        }
    }

    /// Parses `bytes`, extracts metadata, and decides + builds the
    /// embedding-input artifact.
    pub async fn process(&self, bytes: &[u8]) -> Result<ProcessedDicom, IngestError> {
        let obj = metadata::parse_dicom(bytes)?;

        let identity = DicomIdentity {
            sop_class_uid: metadata::read_tag_string(&obj, TAG_SOP_CLASS_UID).unwrap_or_default(),
            transfer_syntax_uid: obj.meta().transfer_syntax.trim_end_matches('\0').trim().to_string(),
            study_instance_uid: metadata::read_tag_string(&obj, TAG_STUDY_INSTANCE_UID).unwrap_or_default(),
            series_instance_uid: metadata::read_tag_string(&obj, TAG_SERIES_INSTANCE_UID).unwrap_or_default(),
            sop_instance_uid: metadata::read_tag_string(&obj, TAG_SOP_INSTANCE_UID).unwrap_or_default(),
        };

        let metadata_map = metadata::extract_metadata(&obj, self.options.extraction);
        let metadata_json = serde_json::to_string(&metadata_map)
            .map_err(|e| IngestError::internal(format!("failed to serialise extracted metadata: {e}")))?;

        let track = sop_class::classify(&identity.sop_class_uid);
        let embedding_track = self.build_embedding_track(&obj, &identity, track).await?;

        Ok(ProcessedDicom {
            identity,
            sop_class_track: track,
            metadata_json,
            size: bytes.len() as i64,
            embedding_track,
        })
    }

    async fn build_embedding_track(
        &self,
        obj: &dicom_object::FileDicomObject<dicom_object::InMemDicomObject>,
        identity: &DicomIdentity,
        track: SopClassTrack,
    ) -> Result<EmbeddingTrack, IngestError> {
        match track {
            SopClassTrack::Image => {
                let rendered = image::render_image(obj, &identity.transfer_syntax_uid)?;
                Ok(match rendered {
                    Some(rendered) => EmbeddingTrack::Image {
                        upload_path: image::upload_path(
                            &identity.study_instance_uid,
                            &identity.series_instance_uid,
                            &identity.sop_instance_uid,
                        ),
                        jpeg_bytes: rendered.jpeg_bytes,
                        mime_type: rendered.mime_type,
                    },
                    None => EmbeddingTrack::None,
                })
            }
            SopClassTrack::EncapsulatedPdf => {
                let extracted = pdf::extract_pdf(obj)?;
                match extracted {
                    Some(extracted) => self.text_track_from(&extracted.text).await,
                    None => Ok(EmbeddingTrack::None),
                }
            }
            SopClassTrack::StructuredReport => {
                let text = sr::extract_sr_text(obj, self.options.content_switches);
                if text.is_empty() {
                    Ok(EmbeddingTrack::None)
                } else {
                    self.text_track_from(&text).await
                }
            }
            SopClassTrack::Other => Ok(EmbeddingTrack::None),
        }
    }

    async fn text_track_from(&self, text: &str) -> Result<EmbeddingTrack, IngestError> {
        let client = self.summarize_client.as_deref();
        let policy_result =
            summarize::apply_summarization_policy(text, self.options.summarize_max_length, client).await?;
        Ok(match policy_result {
            Some(content) => EmbeddingTrack::Text { content },
            None => EmbeddingTrack::None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_processor_options_use_1024_summarize_threshold() {
        let options = ProcessorOptions::default();
        assert_eq!(options.summarize_max_length, 1024);
    }

    #[tokio::test]
    async fn process_rejects_non_dicom_bytes_as_invalid_input() {
        let processor = DicomProcessor::new(ProcessorOptions::default(), None);
        let err = processor.process(b"not a dicom file").await.unwrap_err();
        assert!(!err.retryable());
        assert_eq!(err.status(), 422);
    }
}
