//! Unified error taxonomy for the DICOM ingestion pipeline.
//!
//! Every error raised anywhere in the pipeline carries an [`ErrorKind`] (a
//! machine-readable, stable tag), a human-readable message, an optional
//! cause chain, and arbitrary key-value context. [`ErrorKind::retryable`]
//! and [`ErrorKind::status`] are the two facts the rest of the system needs
//! to know about an error: whether the transport should redeliver, and what
//! HTTP status to answer with.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Machine-readable, stable error kind (spec.md §7).
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The push envelope didn't match either the object-store or the
    /// dicomweb notification schema.
    BadSchema,
    /// Malformed DICOM, unparseable archive, bad GCS URI, or similar —
    /// permanent, caused by the input itself.
    InvalidInput,
    /// Unrecognised SOP class when embedding was required.
    UnsupportedPayload,
    /// Caller isn't authenticated.
    Unauthorized,
    /// Caller is authenticated but not authorized for this operation.
    Forbidden,
    /// The upstream vendor API (embedding/summarization) is not enabled
    /// for the configured project.
    ApiNotEnabled,
    /// Timeouts, 429s, connection resets — safe to retry.
    Transient,
    /// Uncategorised. Treated as retryable (fail-open in favor of
    /// redelivery over silent data loss, per spec.md §7).
    Internal,
}

impl ErrorKind {
    /// `true` if the transport should be allowed to redeliver.
    pub fn retryable(self) -> bool {
        matches!(self, Self::Transient | Self::Internal)
    }

    /// Default HTTP status for this kind (spec.md §7).
    pub fn status(self) -> u16 {
        match self {
            Self::BadSchema => 400,
            Self::InvalidInput | Self::UnsupportedPayload => 422,
            Self::Unauthorized | Self::Forbidden | Self::ApiNotEnabled => 422,
            Self::Transient | Self::Internal => 500,
        }
    }

    /// Stable SCREAMING_SNAKE_CASE tag, matching the wire `code` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadSchema => "BAD_SCHEMA",
            Self::InvalidInput => "INVALID_INPUT",
            Self::UnsupportedPayload => "UNSUPPORTED_PAYLOAD",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::ApiNotEnabled => "API_NOT_ENABLED",
            Self::Transient => "TRANSIENT",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// IngestError
// ---------------------------------------------------------------------------

/// A classified pipeline error with message-id correlation and arbitrary
/// structured context, for operator-facing diagnostics and log correlation.
#[derive(Debug)]
pub struct IngestError {
    kind: ErrorKind,
    message: String,
    /// Present for `ApiNotEnabled`/`Unauthorized`/`Forbidden` when a
    /// remediation link is known (spec.md §4.5, §7).
    remediation_url: Option<String>,
    context: BTreeMap<String, serde_json::Value>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl IngestError {
    /// Starts building an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            remediation_url: None,
            context: BTreeMap::new(),
            source: None,
        }
    }

    /// Shorthand for [`ErrorKind::BadSchema`].
    pub fn bad_schema(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadSchema, message)
    }

    /// Shorthand for [`ErrorKind::InvalidInput`].
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    /// Shorthand for [`ErrorKind::UnsupportedPayload`].
    pub fn unsupported_payload(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedPayload, message)
    }

    /// Shorthand for [`ErrorKind::Transient`].
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    /// Shorthand for [`ErrorKind::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attaches a remediation URL (vendor-API-not-enabled style errors).
    pub fn with_remediation(mut self, url: impl Into<String>) -> Self {
        self.remediation_url = Some(url.into());
        self
    }

    /// Attaches a key-value context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attaches an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The classified kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// `true` if the transport should be allowed to redeliver.
    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }

    /// HTTP status this error maps to.
    pub fn status(&self) -> u16 {
        self.kind.status()
    }

    /// Serializable `{code, messageId, reason}` wire record (spec.md §7).
    pub fn to_dto(&self, message_id: impl Into<String>) -> ErrorDto {
        ErrorDto {
            code: self.kind.as_str().to_string(),
            message_id: message_id.into(),
            reason: self.message.clone(),
            remediation_url: self.remediation_url.clone(),
        }
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Serializable snapshot of an [`IngestError`] matching the `{code,
/// messageId, reason}` HTTP/WS error body (spec.md §7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDto {
    /// Stable error kind tag.
    pub code: String,
    #[serde(rename = "messageId")]
    /// Correlates this error with the originating request/WS message.
    pub message_id: String,
    /// Human-readable explanation.
    pub reason: String,
    #[serde(rename = "remediationUrl", skip_serializing_if = "Option::is_none")]
    /// Present for auth/API-not-enabled errors with a known fix-it link.
    pub remediation_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_schema_maps_to_400_and_is_not_retryable() {
        let err = IngestError::bad_schema("missing attributes.eventType");
        assert_eq!(err.status(), 400);
        assert!(!err.retryable());
    }

    #[test]
    fn transient_maps_to_500_and_is_retryable() {
        let err = IngestError::transient("connection reset");
        assert_eq!(err.status(), 500);
        assert!(err.retryable());
    }

    #[test]
    fn internal_is_retryable_fail_open() {
        let err = IngestError::internal("unclassified panic payload");
        assert!(err.retryable());
    }

    #[test]
    fn invalid_input_is_permanent() {
        let err = IngestError::invalid_input("not a valid DICOM");
        assert_eq!(err.status(), 422);
        assert!(!err.retryable());
    }

    #[test]
    fn dto_round_trips_through_json() {
        let err = IngestError::new(ErrorKind::ApiNotEnabled, "vertex ai api disabled")
            .with_remediation("https://console.cloud.google.com/apis/library/aiplatform");
        let dto = err.to_dto("msg-123");
        let json = serde_json::to_value(&dto).unwrap();
        assert_eq!(json["code"], "API_NOT_ENABLED");
        assert_eq!(json["messageId"], "msg-123");
        assert!(json["remediationUrl"].is_string());

        let back: ErrorDto = serde_json::from_value(json).unwrap();
        assert_eq!(back, dto);
    }

    #[test]
    fn context_entries_are_queryable() {
        let err = IngestError::invalid_input("bad bucket path").with_context("bucket", "b");
        assert_eq!(err.context.get("bucket").unwrap(), "b");
    }

    #[test]
    fn source_chain_is_preserved() {
        let io_err = std::io::Error::other("boom");
        let err = IngestError::internal("download failed").with_source(io_err);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn all_kinds_have_a_stable_str_tag() {
        let kinds = [
            ErrorKind::BadSchema,
            ErrorKind::InvalidInput,
            ErrorKind::UnsupportedPayload,
            ErrorKind::Unauthorized,
            ErrorKind::Forbidden,
            ErrorKind::ApiNotEnabled,
            ErrorKind::Transient,
            ErrorKind::Internal,
        ];
        for kind in kinds {
            assert!(kind.as_str().chars().all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }
}
