// SPDX-License-Identifier: MIT OR Apache-2.0
//! Exponential backoff with jitter, used by the Embedding Client (spec.md
//! §4.5) and available to any other upstream call that needs the same
//! retryable/permanent split.

mod retry;

pub use retry::{compute_delay, retry_async, RetryConfig, RetryAttempt, RetryMetadata, RetryOutcome};
