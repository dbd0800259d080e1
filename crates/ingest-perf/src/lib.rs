// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-request performance context (spec.md §4.1).
//!
//! Every push request acquires a [`PerfContext`] and records named
//! checkpoints with monotonic timestamps as it moves through dispatch,
//! download, and persistence. A gap of more than [`HOT_GAP_THRESHOLD`]
//! between two consecutive checkpoints is flagged "hot" — logged via
//! `tracing::warn!` and surfaced in the summary so operators can see which
//! stage of a slow request actually stalled.

use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::warn;

/// Gap between consecutive checkpoints above which a stage is "hot"
/// (spec.md §4.1).
pub const HOT_GAP_THRESHOLD: Duration = Duration::from_millis(100);

/// One named checkpoint, with its offset from context creation and the gap
/// since the previous checkpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Checkpoint {
    /// Caller-supplied checkpoint name (e.g. `"schema_match"`,
    /// `"download"`, `"persist"`).
    pub name: String,
    /// Milliseconds elapsed since the context was created.
    pub offset_ms: u64,
    /// Milliseconds elapsed since the previous checkpoint (or since
    /// creation, for the first checkpoint).
    pub gap_ms: u64,
    /// `true` if `gap_ms` exceeded [`HOT_GAP_THRESHOLD`].
    pub hot: bool,
}

/// Per-request performance context. Owned by the handler for the lifetime
/// of one push request; never shared across requests (spec.md §5).
#[derive(Debug)]
pub struct PerfContext {
    request_id: String,
    started_at: Instant,
    last: Instant,
    checkpoints: Vec<Checkpoint>,
}

/// Summary emitted once a request completes.
#[derive(Debug, Clone, Serialize)]
pub struct PerfSummary {
    /// Correlates this summary with the originating request.
    pub request_id: String,
    /// Total wall-clock duration from context creation to `finish`.
    pub total_ms: u64,
    /// Every recorded checkpoint, in order.
    pub checkpoints: Vec<Checkpoint>,
    /// `true` if any checkpoint gap was hot.
    pub had_hot_gap: bool,
}

impl PerfContext {
    /// Starts a new context for the given request id.
    pub fn start(request_id: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            request_id: request_id.into(),
            started_at: now,
            last: now,
            checkpoints: Vec::new(),
        }
    }

    /// Records a named checkpoint at the current instant, logging a
    /// `tracing::warn!` if the gap since the previous checkpoint exceeds
    /// [`HOT_GAP_THRESHOLD`].
    pub fn checkpoint(&mut self, name: impl Into<String>) {
        let name = name.into();
        let now = Instant::now();
        let gap = now.duration_since(self.last);
        let offset = now.duration_since(self.started_at);
        let hot = gap > HOT_GAP_THRESHOLD;
        if hot {
            warn!(
                request_id = %self.request_id,
                checkpoint = %name,
                gap_ms = gap.as_millis() as u64,
                "hot checkpoint gap"
            );
        }
        self.checkpoints.push(Checkpoint {
            name,
            offset_ms: offset.as_millis() as u64,
            gap_ms: gap.as_millis() as u64,
            hot,
        });
        self.last = now;
    }

    /// Finalizes the context, returning a [`PerfSummary`] for the caller to
    /// log or attach to the response.
    pub fn finish(self) -> PerfSummary {
        let total = Instant::now().duration_since(self.started_at);
        let had_hot_gap = self.checkpoints.iter().any(|c| c.hot);
        PerfSummary {
            request_id: self.request_id,
            total_ms: total.as_millis() as u64,
            checkpoints: self.checkpoints,
            had_hot_gap,
        }
    }
}
