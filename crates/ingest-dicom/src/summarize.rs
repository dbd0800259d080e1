// SPDX-License-Identifier: MIT OR Apache-2.0
//! Text summarization client (spec.md §4.4 step 3): extracted text above
//! the configured threshold is summarized before embedding, so the
//! embedding model sees a bounded amount of text.
//!
//! Mirrors the embedding client's shape: a small [`SummarizeClient`] trait,
//! an HTTP implementation with the same retry-with-backoff policy, and a
//! test double.

use async_trait::async_trait;
use ingest_error::{ErrorKind, IngestError};
use ingest_retry::{retry_async, RetryConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-attempt timeout for the summarization endpoint, matching the
/// embedding client's budget (spec.md §4.5 describes the embedding client's
/// 30 s timeout; summarization shares the same upstream vendor and is held
/// to the same bound).
const SUMMARIZE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct SummarizeRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SummarizeResponse {
    summary: String,
}

#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("summarization api not enabled: {0}")]
    ApiNotEnabled(String),
    #[error("summarization request unauthorized: {0}")]
    Unauthorized(String),
    #[error("summarization request rejected: {0}")]
    Rejected(String),
    #[error("summarization request failed transiently: {0}")]
    Transient(String),
    #[error("summarization response malformed: {0}")]
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

/// The summarization operation the structured-report/PDF tracks depend on.
#[async_trait]
pub trait SummarizeClient: Send + Sync {
    /// Summarizes `text`, returning a shorter replacement.
    async fn summarize(&self, text: &str) -> Result<String, IngestError>;
}

/// HTTP-backed [`SummarizeClient`], with the same bounded retry-with-backoff
/// policy used for the embedding endpoint.
pub struct HttpSummarizeClient {
    http: reqwest::Client,
    endpoint: String,
    bearer_token_provider: Box<dyn Fn() -> String + Send + Sync>,
    retry: RetryConfig,
}

impl HttpSummarizeClient {
    /// Builds a client against `endpoint` (the full summarize URL).
    pub fn new(
        endpoint: impl Into<String>,
        bearer_token_provider: impl Fn() -> String + Send + Sync + 'static,
        retry: RetryConfig,
    ) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(SUMMARIZE_TIMEOUT)
                .build()
                .expect("reqwest client configuration is static and always valid"),
            endpoint: endpoint.into(),
            bearer_token_provider: Box::new(bearer_token_provider),
            retry,
        }
    }

    async fn attempt(&self, text: &str) -> Result<String, AttemptError> {
        let token = (self.bearer_token_provider)();
        let request = SummarizeRequest { text };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let parsed: SummarizeResponse =
            serde_json::from_str(&body).map_err(|e| AttemptError::Malformed(e.to_string()))?;
        Ok(parsed.summary)
    }
}

#[async_trait]
impl SummarizeClient for HttpSummarizeClient {
    async fn summarize(&self, text: &str) -> Result<String, IngestError> {
        let outcome = retry_async(&self.retry, || self.attempt(text), is_retryable).await;
        outcome.map(|o| o.value).map_err(IngestError::from)
    }
}

/// Applies the summarization policy (spec.md §4.4 step 3): summarize iff
/// `text.len() > max_length` and a client is configured; otherwise return
/// the text unchanged, or `None` if it's too long and no client is
/// available (the embedding is skipped for this item, not the whole
/// record).
pub async fn apply_summarization_policy(
    text: &str,
    max_length: usize,
    client: Option<&(dyn SummarizeClient)>,
) -> Result<Option<String>, IngestError> {
    if text.len() <= max_length {
        return Ok(Some(text.to_string()));
    }
    match client {
        Some(client) => client.summarize(text).await.map(Some),
        None => Ok(None),
    }
}

/// In-memory [`SummarizeClient`] double, exposed under the `test-util`
/// feature.
#[cfg(any(test, feature = "test-util"))]
pub mod test_support {
    use super::*;

    /// Fake client that truncates to a fixed length, or fails.
    pub struct FakeSummarizeClient {
        /// Length to truncate summaries to.
        pub truncate_to: usize,
        /// If set, every call fails with this error instead.
        pub fail_with: Option<IngestError>,
    }

    #[async_trait]
    impl SummarizeClient for FakeSummarizeClient {
        async fn summarize(&self, text: &str) -> Result<String, IngestError> {
            if let Some(err) = &self.fail_with {
                return Err(IngestError::new(err.kind(), err.to_string()));
            }
            Ok(text.chars().take(self.truncate_to).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_support::FakeSummarizeClient;

    #[tokio::test]
    async fn short_text_passes_through_unsummarized() {
        let result = apply_summarization_policy("short", 1024, None).await.unwrap();
        assert_eq!(result, Some("short".to_string()));
    }

    #[tokio::test]
    async fn long_text_without_client_is_skipped() {
        let long_text = "x".repeat(2000);
        let result = apply_summarization_policy(&long_text, 1024, None).await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn long_text_with_client_is_summarized() {
        let long_text = "x".repeat(2000);
        let client = FakeSummarizeClient {
            truncate_to: 10,
            fail_with: None,
        };
        let result = apply_summarization_policy(&long_text, 1024, Some(&client))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.len(), 10);
    }

    #[tokio::test]
    async fn summarization_failure_propagates() {
        let long_text = "x".repeat(2000);
        let client = FakeSummarizeClient {
            truncate_to: 10,
            fail_with: Some(IngestError::transient("upstream reset")),
        };
        let err = apply_summarization_policy(&long_text, 1024, Some(&client))
            .await
            .unwrap_err();
        assert!(err.retryable());
    }
}
