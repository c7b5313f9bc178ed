//! Metrics sinks notified by the coordinator

use super::types::{JobOutcome, QueueCounts};
use std::time::Duration;
use tracing::debug;

/// Receives queue measurements after every state transition
///
/// Counts are delivered one call at a time, in the order the transitions
/// happened, after the coordinator's state lock is released. Implementations
/// must not block and must not call back into the queue.
pub trait QueueMetricsSink: Send + Sync {
    /// Executing and queued counts after an admission, dequeue or completion
    fn record_counts(&self, counts: QueueCounts);

    /// A worker finished
    fn record_outcome(&self, _outcome: JobOutcome, _elapsed: Duration) {}
}

/// Sink that writes counts to the tracing log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMetricsSink;

impl QueueMetricsSink for LogMetricsSink {
    fn record_counts(&self, counts: QueueCounts) {
        debug!(
            executing = counts.executing,
            queued = counts.queued,
            "job queue counts"
        );
    }

    fn record_outcome(&self, outcome: JobOutcome, elapsed: Duration) {
        debug!(outcome = outcome.as_str(), elapsed = ?elapsed, "job finished");
    }
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsSink;

impl QueueMetricsSink for NoopMetricsSink {
    fn record_counts(&self, _counts: QueueCounts) {}
}
