// SPDX-License-Identifier: MIT OR Apache-2.0
//! Embedding model client with retry/backoff (spec.md §4.5).
//!
//! Single operation: send an instance, get back a vector. The vendor API's
//! shape (one prediction, carrying exactly one of `imageEmbedding` or
//! `textEmbedding`) and its failure modes are isolated behind
//! [`EmbeddingClient`] so the rest of the pipeline only ever sees
//! `predict(instance) -> Vec<f32>`.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use ingest_error::{ErrorKind, IngestError};
use ingest_retry::{retry_async, RetryConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-attempt timeout for the embedding endpoint (spec.md §4.5).
const PREDICT_TIMEOUT: Duration = Duration::from_secs(30);

/// One embedding request instance. Either an image reference or summarized
/// text, matching the vendor API's discriminated instance shape.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EmbeddingInstance {
    /// GCS-hosted image to embed.
    Image {
        /// `gs://bucket/object` URI.
        #[serde(rename = "image")]
        image: ImageRef,
    },
    /// Already-extracted/summarized text to embed.
    Text {
        /// Plain text content.
        text: String,
    },
}

/// Wrapper matching the vendor API's `{ image: { gcsUri } }` instance shape.
#[derive(Debug, Clone, Serialize)]
pub struct ImageRef {
    /// `gs://bucket/object` URI.
    #[serde(rename = "gcsUri")]
    pub gcs_uri: String,
}

impl EmbeddingInstance {
    /// Builds an image instance from a GCS URI.
    pub fn image(gcs_uri: impl Into<String>) -> Self {
        Self::Image {
            image: ImageRef { gcs_uri: gcs_uri.into() },
        }
    }

    /// Builds a text instance.
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text { text: content.into() }
    }
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    instances: [&'a EmbeddingInstance; 1],
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(rename = "imageEmbedding")]
    image_embedding: Option<Vec<f32>>,
    #[serde(rename = "textEmbedding")]
    text_embedding: Option<Vec<f32>>,
}

/// An error from a single embedding attempt, before retry classification.
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("embedding api not enabled: {0}")]
    ApiNotEnabled(String),
    #[error("embedding request unauthorized: {0}")]
    Unauthorized(String),
    #[error("embedding request rejected: {0}")]
    Rejected(String),
    #[error("embedding request failed transiently: {0}")]
    Transient(String),
    #[error("embedding response malformed: {0}")]
    Malformed(String),
}

fn is_retryable(err: &AttemptError) -> bool {
    matches!(err, AttemptError::Transient(_))
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> AttemptError {
    let lower = body.to_ascii_lowercase();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        AttemptError::Unauthorized(body.to_string())
    } else if status == reqwest::StatusCode::FORBIDDEN {
        if lower.contains("api") && (lower.contains("disabled") || lower.contains("not enabled")) {
            AttemptError::ApiNotEnabled(body.to_string())
        } else {
            AttemptError::Unauthorized(body.to_string())
        }
    } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS || lower.contains("resource exhausted") {
        AttemptError::Transient(body.to_string())
    } else if status.is_server_error() {
        AttemptError::Transient(body.to_string())
    } else {
        AttemptError::Rejected(format!("{status}: {body}"))
    }
}

impl From<AttemptError> for IngestError {
    fn from(err: AttemptError) -> Self {
        match err {
            AttemptError::ApiNotEnabled(msg) => IngestError::new(ErrorKind::ApiNotEnabled, msg)
                .with_remediation("https://console.cloud.google.com/apis/library/aiplatform.googleapis.com"),
            AttemptError::Unauthorized(msg) => IngestError::new(ErrorKind::Unauthorized, msg),
            AttemptError::Rejected(msg) => IngestError::invalid_input(msg),
            AttemptError::Transient(msg) => IngestError::transient(msg),
            AttemptError::Malformed(msg) => IngestError::internal(msg),
        }
    }
}

/// The embedding operation the DICOM processor depends on.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Sends one instance and returns its embedding vector.
    async fn predict(&self, instance: &EmbeddingInstance) -> Result<Vec<f32>, IngestError>;
}

/// HTTP-backed [`EmbeddingClient`] against a Vertex-AI-shaped prediction
/// endpoint, with the bounded retry-with-backoff policy from spec.md §4.5.
pub struct VertexEmbeddingClient {
    http: reqwest::Client,
    endpoint: String,
    bearer_token_provider: Box<dyn Fn() -> String + Send + Sync>,
    retry: RetryConfig,
}

impl VertexEmbeddingClient {
    /// Builds a client against `endpoint` (the full predict URL), using
    /// `bearer_token_provider` to mint a fresh bearer token per attempt and
    /// `retry` for the backoff policy (spec.md §6 retry tuning).
    pub fn new(
        endpoint: impl Into<String>,
        bearer_token_provider: impl Fn() -> String + Send + Sync + 'static,
        retry: RetryConfig,
    ) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(PREDICT_TIMEOUT)
                .build()
                .expect("reqwest client configuration is static and always valid"),
            endpoint: endpoint.into(),
            bearer_token_provider: Box::new(bearer_token_provider),
            retry,
        }
    }

    async fn attempt(&self, instance: &EmbeddingInstance) -> Result<Vec<f32>, AttemptError> {
        let token = (self.bearer_token_provider)();
        let request = PredictRequest { instances: [instance] };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    AttemptError::Transient(e.to_string())
                } else {
                    AttemptError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let parsed: PredictResponse =
            serde_json::from_str(&body).map_err(|e| AttemptError::Malformed(e.to_string()))?;
        let prediction = parsed
            .predictions
            .into_iter()
            .next()
            .ok_or_else(|| AttemptError::Malformed("predictions array is empty".to_string()))?;

        match (prediction.image_embedding, prediction.text_embedding) {
            (Some(v), None) => Ok(v),
            (None, Some(v)) => Ok(v),
            (None, None) => Err(AttemptError::Malformed(
                "prediction carried neither imageEmbedding nor textEmbedding".to_string(),
            )),
            (Some(_), Some(_)) => Err(AttemptError::Malformed(
                "prediction carried both imageEmbedding and textEmbedding".to_string(),
            )),
        }
    }
}

#[async_trait]
impl EmbeddingClient for VertexEmbeddingClient {
    async fn predict(&self, instance: &EmbeddingInstance) -> Result<Vec<f32>, IngestError> {
        let outcome = retry_async(&self.retry, || self.attempt(instance), is_retryable).await;
        outcome.map(|o| o.value).map_err(IngestError::from)
    }
}

/// In-memory [`EmbeddingClient`] double for pipeline/daemon tests, exposed
/// under the `test-util` feature.
#[cfg(any(test, feature = "test-util"))]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Fake client returning a fixed vector, or failing, per configuration.
    pub struct FakeEmbeddingClient {
        /// Vector returned on success.
        pub vector: Vec<f32>,
        /// If set, every call fails with this error instead.
        pub fail_with: Option<IngestError>,
        /// Every instance passed to `predict`, for assertions.
        pub calls: Mutex<Vec<EmbeddingInstance>>,
    }

    impl FakeEmbeddingClient {
        /// A fake that always succeeds with `vector`.
        pub fn succeeding(vector: Vec<f32>) -> Self {
            Self {
                vector,
                fail_with: None,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EmbeddingClient for FakeEmbeddingClient {
        async fn predict(&self, instance: &EmbeddingInstance) -> Result<Vec<f32>, IngestError> {
            self.calls.lock().unwrap().push(instance.clone());
            if let Some(err) = &self.fail_with {
                return Err(IngestError::new(err.kind(), err.to_string()));
            }
            Ok(self.vector.clone())
        }
    }
}
