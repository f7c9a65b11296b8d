//! Pipeline stages and progress reporting.
//!
//! The orchestrator emits events at stage boundaries and per partition;
//! sinks decide what to do with them. The default sink forwards to
//! `tracing` so embedders get structured logs without wiring anything up.

use std::fmt;
use std::time::Duration;

use crate::date::TradeDate;

/// The five pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// S1 — fetch and persist raw daily snapshots.
    Ingest,
    /// S2 — per-symbol adjustment factors.
    Adjust,
    /// S3 — cross-sectional liquidity ranks.
    Rank,
    /// S4a — ephemeral cumulative multiplier cache.
    CumulativeCache,
    /// S4b — persistent universe tables.
    Universes,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Adjust => "adjust",
            Stage::Rank => "rank",
            Stage::CumulativeCache => "cumulative_cache",
            Stage::Universes => "universes",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of completed work inside a stage.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub date: Option<TradeDate>,
    pub rows: usize,
    pub elapsed: Duration,
}

/// Receiver for pipeline progress.
pub trait ProgressSink: Send + Sync {
    fn on_stage_start(&self, stage: Stage);

    fn on_partition(&self, event: &ProgressEvent);

    fn on_stage_complete(&self, stage: Stage, partitions: usize, elapsed: Duration);
}

/// Default sink: structured log records via `tracing`.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn on_stage_start(&self, stage: Stage) {
        tracing::info!(stage = %stage, "stage started");
    }

    fn on_partition(&self, event: &ProgressEvent) {
        match event.date {
            Some(date) => tracing::debug!(
                stage = %event.stage,
                %date,
                rows = event.rows,
                elapsed_ms = event.elapsed.as_millis() as u64,
                "partition written"
            ),
            None => tracing::debug!(
                stage = %event.stage,
                rows = event.rows,
                elapsed_ms = event.elapsed.as_millis() as u64,
                "partition written"
            ),
        }
    }

    fn on_stage_complete(&self, stage: Stage, partitions: usize, elapsed: Duration) {
        tracing::info!(
            stage = %stage,
            partitions,
            elapsed_ms = elapsed.as_millis() as u64,
            "stage complete"
        );
    }
}

/// Sink that drops everything. Used by tests.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_stage_start(&self, _stage: Stage) {}
    fn on_partition(&self, _event: &ProgressEvent) {}
    fn on_stage_complete(&self, _stage: Stage, _partitions: usize, _elapsed: Duration) {}
}
