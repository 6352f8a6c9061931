// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Throttled runtime statistics for lexers, encoders and senders.
//!
//! There is no remote stats consumer in this pipeline (unlike a node graph
//! with a UI to push updates to), so [`StatsTracker`] logs a summary line
//! through `tracing` instead of sending an update over a channel. The
//! throttling policy — every 10 seconds or every 1000 items — is kept as-is.

use std::time::{Duration, Instant};

/// Counters for one pipeline stage (a lexer, an encoder, or a sender).
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub received: u64,
    pub sent: u64,
    pub discarded: u64,
    pub errored: u64,
}

/// Wraps [`Stats`] with throttled `tracing` emission.
pub struct StatsTracker {
    stage: &'static str,
    stats: Stats,
    start: Instant,
    last_log: Instant,
}

impl StatsTracker {
    const LOG_INTERVAL: Duration = Duration::from_secs(10);
    const LOG_ITEM_THRESHOLD: u64 = 1000;

    #[must_use]
    pub fn new(stage: &'static str) -> Self {
        let now = Instant::now();
        Self {
            stage,
            stats: Stats::default(),
            start: now,
            last_log: now,
        }
    }

    pub fn received(&mut self) {
        self.stats.received += 1;
    }

    pub fn sent(&mut self) {
        self.stats.sent += 1;
    }

    pub fn discarded(&mut self) {
        self.stats.discarded += 1;
    }

    pub fn errored(&mut self) {
        self.stats.errored += 1;
    }

    /// Logs a summary if the throttle interval or item count has elapsed
    /// since the last log. Call after processing each item.
    pub fn maybe_log(&mut self) {
        let due = self.last_log.elapsed() >= Self::LOG_INTERVAL
            || self.stats.received % Self::LOG_ITEM_THRESHOLD == 0;
        if due && self.stats.received > 0 {
            self.force_log();
        }
    }

    /// Logs a summary unconditionally, e.g. on shutdown.
    pub fn force_log(&mut self) {
        let elapsed = self.start.elapsed().as_secs_f64();
        tracing::info!(
            stage = self.stage,
            received = self.stats.received,
            sent = self.stats.sent,
            discarded = self.stats.discarded,
            errored = self.stats.errored,
            elapsed_secs = elapsed,
            "stage stats"
        );
        self.last_log = Instant::now();
    }

    #[must_use]
    pub fn snapshot(&self) -> Stats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let mut tracker = StatsTracker::new("test");
        tracker.received();
        tracker.received();
        tracker.sent();
        tracker.discarded();
        tracker.errored();
        let snap = tracker.snapshot();
        assert_eq!(snap.received, 2);
        assert_eq!(snap.sent, 1);
        assert_eq!(snap.discarded, 1);
        assert_eq!(snap.errored, 1);
    }
}
