// SPDX-License-Identifier: MIT OR Apache-2.0
//! Generic exponential-backoff-with-jitter retry loop.
//!
//! The Embedding Client (spec.md §4.5) retries up to a configurable number
//! of attempts on 429/"resource exhausted" style failures, with delay
//! `base * 2^(k-1) + jitter`. This module implements that loop generically
//! over any error type, so it can also back the summarization call, which
//! shares the same retry policy shape with its own tuning knobs.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a bounded-retry upstream call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the initial attempt.
    /// `0` means only the initial attempt (no retries).
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    /// Maximum delay cap for exponential backoff.
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    /// Overall wall-clock timeout across all attempts.
    #[serde(with = "duration_millis")]
    pub overall_timeout: Duration,
    /// Jitter factor in `[0.0, 1.0]`. 0 = no jitter, 1 = full jitter.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    /// spec.md §4.5 / §6: default 5 attempts, 500ms base delay.
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            overall_timeout: Duration::from_secs(60),
            jitter_factor: 1.0,
        }
    }
}

/// Serde helper — `Duration` as integer milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(val: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        val.as_millis().serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let ms: u64 = u64::deserialize(de)?;
        Ok(Duration::from_millis(ms))
    }
}

// ── Metadata ────────────────────────────────────────────────────────

/// Record of a single failed attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// Zero-indexed attempt number.
    pub attempt: u32,
    /// Error message from this attempt.
    pub error: String,
    /// Backoff delay applied before the next attempt.
    #[serde(with = "duration_millis")]
    pub delay: Duration,
}

/// Metadata captured across all retry attempts, useful for operator
/// diagnostics when an ingestion record's embedding step degraded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryMetadata {
    /// Total number of attempts made (including the successful one).
    pub total_attempts: u32,
    /// Records of each *failed* attempt.
    pub failed_attempts: Vec<RetryAttempt>,
    /// Wall-clock time spanning all attempts.
    #[serde(with = "duration_millis")]
    pub total_duration: Duration,
}

// ── Outcome ─────────────────────────────────────────────────────────

/// Result of a retry-enabled operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The successfully produced value.
    pub value: T,
    /// Retry metadata (empty `failed_attempts` when the first attempt succeeds).
    pub metadata: RetryMetadata,
}

// ── Backoff computation ─────────────────────────────────────────────

/// Computes the backoff delay for a given zero-indexed attempt number:
/// `base * 2^attempt`, capped at `max_delay`, then reduced by a
/// pseudo-random jitter in `[0, delay * jitter_factor)`.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt);
    let delay_ms = (config.base_delay.as_millis() as u64).saturating_mul(exp);
    let capped_ms = delay_ms.min(config.max_delay.as_millis() as u64);

    let jitter_factor = config.jitter_factor.clamp(0.0, 1.0);
    if jitter_factor > 0.0 && capped_ms > 0 {
        let jitter_range = (capped_ms as f64 * jitter_factor) as u64;
        // Cheap pseudo-random: system-clock nanos mixed with attempt index.
        // Not cryptographic — only needs to avoid thundering-herd retries.
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64;
        let pseudo = nanos.wrapping_mul(attempt as u64 + 1);
        let jitter = if jitter_range > 0 {
            pseudo % jitter_range
        } else {
            0
        };
        Duration::from_millis(capped_ms.saturating_sub(jitter))
    } else {
        Duration::from_millis(capped_ms)
    }
}

// ── Core retry loop ─────────────────────────────────────────────────

/// Generic retry loop. Calls `op` up to `max_retries + 1` times with
/// exponential backoff, returning the first successful result along with
/// metadata about failed attempts.
///
/// `retryable` decides whether a given error should trigger a retry; a
/// non-retryable error is returned immediately without backing off
/// (spec.md §4.5: "any other failure propagates immediately").
pub async fn retry_async<T, E, F, Fut>(
    config: &RetryConfig,
    mut op: F,
    retryable: impl Fn(&E) -> bool,
) -> Result<RetryOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let max_attempts = config.max_retries + 1;
    let mut failed_attempts = Vec::new();

    for attempt in 0..max_attempts {
        if start.elapsed() >= config.overall_timeout {
            warn!(target: "ingest.retry", attempt, "overall timeout exceeded before attempt");
        }

        debug!(target: "ingest.retry", attempt, max_attempts, "attempting upstream call");

        match op().await {
            Ok(value) => {
                let total_duration = start.elapsed();
                debug!(
                    target: "ingest.retry",
                    attempt,
                    total_duration_ms = total_duration.as_millis() as u64,
                    "upstream call succeeded"
                );
                return Ok(RetryOutcome {
                    value,
                    metadata: RetryMetadata {
                        total_attempts: attempt + 1,
                        failed_attempts,
                        total_duration,
                    },
                });
            }
            Err(err) => {
                let is_last = attempt + 1 >= max_attempts;

                if !retryable(&err) {
                    debug!(target: "ingest.retry", error = %err, "non-retryable error, giving up");
                    return Err(err);
                }

                if is_last {
                    warn!(target: "ingest.retry", error = %err, attempt, "max retries exhausted");
                    return Err(err);
                }

                let delay = compute_delay(config, attempt);
                warn!(
                    target: "ingest.retry",
                    error = %err,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retryable error, backing off"
                );

                failed_attempts.push(RetryAttempt {
                    attempt,
                    error: err.to_string(),
                    delay,
                });

                let remaining = config.overall_timeout.saturating_sub(start.elapsed());
                if delay > remaining {
                    return Err(err);
                }

                tokio::time::sleep(delay).await;
            }
        }
    }

    // Unreachable: the loop above always returns before exhausting
    // `max_attempts` iterations.
    unreachable!("retry_async loop must return within max_attempts iterations")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(String);
    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    #[test]
    fn compute_delay_doubles_and_caps() {
        let cfg = RetryConfig {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            overall_timeout: Duration::from_secs(60),
            jitter_factor: 0.0,
        };
        assert_eq!(compute_delay(&cfg, 0), Duration::from_millis(100));
        assert_eq!(compute_delay(&cfg, 1), Duration::from_millis(200));
        assert_eq!(compute_delay(&cfg, 2), Duration::from_millis(400));
        // 100 * 2^3 = 800, capped to 500
        assert_eq!(compute_delay(&cfg, 3), Duration::from_millis(500));
    }

    #[test]
    fn compute_delay_with_jitter_never_exceeds_nominal() {
        let cfg = RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            overall_timeout: Duration::from_secs(60),
            jitter_factor: 1.0,
        };
        for attempt in 0..4 {
            let nominal = (cfg.base_delay.as_millis() as u64) * 2u64.pow(attempt);
            let delay = compute_delay(&cfg, attempt);
            assert!(delay.as_millis() as u64 <= nominal);
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_succeeds() {
        let cfg = RetryConfig::default();
        let outcome = retry_async(&cfg, || async { Ok::<_, Flaky>(42) }, |_: &Flaky| true)
            .await
            .unwrap();
        assert_eq!(outcome.value, 42);
        assert_eq!(outcome.metadata.total_attempts, 1);
        assert!(outcome.metadata.failed_attempts.is_empty());
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let cfg = RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            overall_timeout: Duration::from_secs(5),
            jitter_factor: 0.0,
        };
        let attempts = AtomicU32::new(0);
        let outcome = retry_async(
            &cfg,
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Flaky("429 resource exhausted".into()))
                    } else {
                        Ok(7)
                    }
                }
            },
            |_: &Flaky| true,
        )
        .await
        .unwrap();
        assert_eq!(outcome.value, 7);
        assert_eq!(outcome.metadata.total_attempts, 3);
        assert_eq!(outcome.metadata.failed_attempts.len(), 2);
    }

    #[tokio::test]
    async fn non_retryable_error_propagates_immediately() {
        let cfg = RetryConfig::default();
        let attempts = AtomicU32::new(0);
        let result = retry_async(
            &cfg,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<i32, _>(Flaky("permanent".into())) }
            },
            |_: &Flaky| false,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries_exhausted() {
        let cfg = RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            overall_timeout: Duration::from_secs(5),
            jitter_factor: 0.0,
        };
        let attempts = AtomicU32::new(0);
        let result: Result<RetryOutcome<i32>, Flaky> = retry_async(
            &cfg,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(Flaky("still failing".into())) }
            },
            |_: &Flaky| true,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
