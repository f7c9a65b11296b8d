//! Pipeline orchestrator.
//!
//! Owns the write side of the store for the duration of a `prepare` call:
//! takes the advisory lock, reconciles any interrupted rewrite, sweeps S1
//! over the calendar window (per-date failures are collected, not
//! propagated), then runs S2 → S3 → S4a → S4b. A cancellation flag observed
//! between dates stops the sweep after the current date; nothing partial is
//! ever published.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use krxdb_core::date::TradeDate;
use krxdb_core::error::{KdbError, Result};
use krxdb_core::events::{ProgressEvent, ProgressSink, Stage, TracingSink};
use krxdb_core::store::{
    partition_stage, partitions_in_window, reconcile, LockState, PartitionStage, StoreLayout,
    StoreLock, Table,
};

use crate::fetch::SnapshotFetcher;
use crate::pipeline::adjust::enrich_adjustments;
use crate::pipeline::cumulative::rebuild_cache;
use crate::pipeline::ingest::{ingest_day, IngestOutcome};
use crate::pipeline::rank::enrich_ranks;
use crate::pipeline::universes::build_universes;

static DEFAULT_SINK: TracingSink = TracingSink;

/// Result of an S1 sweep plus the enrichment that followed.
///
/// Per-date ingestion failures land in `failed`; the store stays usable for
/// every date that succeeded.
#[derive(Debug, Default)]
pub struct PrepareSummary {
    /// Dates fetched and written this run.
    pub ingested: Vec<TradeDate>,
    /// Dates skipped because a committed partition already existed.
    pub skipped: Vec<TradeDate>,
    /// Dates the upstream reported as non-trading.
    pub non_trading: Vec<TradeDate>,
    /// Dates that failed to ingest, with their errors.
    pub failed: Vec<(TradeDate, KdbError)>,
    /// Whether the run was cut short by cancellation.
    pub cancelled: bool,
}

impl PrepareSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}

pub struct Orchestrator<'a> {
    layout: StoreLayout,
    fetcher: &'a dyn SnapshotFetcher,
    sink: &'a dyn ProgressSink,
    cancel: Option<Arc<AtomicBool>>,
    force_refetch: bool,
}

impl<'a> Orchestrator<'a> {
    pub fn new(layout: StoreLayout, fetcher: &'a dyn SnapshotFetcher) -> Self {
        Self {
            layout,
            fetcher,
            sink: &DEFAULT_SINK,
            cancel: None,
            force_refetch: false,
        }
    }

    pub fn with_sink(mut self, sink: &'a dyn ProgressSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_force_refetch(mut self, force: bool) -> Self {
        self.force_refetch = force;
        self
    }

    /// Run the full pipeline over the inclusive window.
    pub fn prepare(&self, window: (TradeDate, TradeDate)) -> Result<PrepareSummary> {
        let (start, end) = window;
        if start > end {
            return Err(KdbError::Config(format!(
                "window start {start} is after end {end}"
            )));
        }

        let _lock = self.acquire_lock()?;
        reconcile(&self.layout)?;

        let mut summary = self.ingest_sweep(window);
        if summary.cancelled {
            return Ok(summary);
        }

        let adjust_targets = self.adjust_targets(window, &summary)?;
        let stage_start = Instant::now();
        self.sink.on_stage_start(Stage::Adjust);
        let adjusted = enrich_adjustments(&self.layout, end, &adjust_targets, self.sink)?;
        self.sink
            .on_stage_complete(Stage::Adjust, adjusted.len(), stage_start.elapsed());

        let stage_start = Instant::now();
        self.sink.on_stage_start(Stage::Rank);
        let ranked = enrich_ranks(&self.layout, window, self.sink)?;
        self.sink
            .on_stage_complete(Stage::Rank, ranked.len(), stage_start.elapsed());

        let stage_start = Instant::now();
        self.sink.on_stage_start(Stage::CumulativeCache);
        let cached = rebuild_cache(&self.layout, window, self.sink)?;
        self.sink
            .on_stage_complete(Stage::CumulativeCache, cached.len(), stage_start.elapsed());

        let refreshed: BTreeSet<TradeDate> = ranked.iter().map(|(date, _)| *date).collect();
        let stage_start = Instant::now();
        self.sink.on_stage_start(Stage::Universes);
        let universes = build_universes(&self.layout, window, &refreshed, self.sink)?;
        self.sink
            .on_stage_complete(Stage::Universes, universes.len(), stage_start.elapsed());

        if !summary.failed.is_empty() {
            tracing::warn!(
                failed = summary.failed.len(),
                "prepare finished with per-date failures"
            );
        }
        Ok(summary)
    }

    fn ingest_sweep(&self, window: (TradeDate, TradeDate)) -> PrepareSummary {
        let (start, end) = window;
        let mut summary = PrepareSummary::default();

        let stage_start = Instant::now();
        self.sink.on_stage_start(Stage::Ingest);
        for date in TradeDate::range_inclusive(start, end) {
            if self.cancelled() {
                summary.cancelled = true;
                break;
            }
            let started = Instant::now();
            match ingest_day(&self.layout, self.fetcher, date, self.force_refetch) {
                Ok(IngestOutcome::Written(rows)) => {
                    self.sink.on_partition(&ProgressEvent {
                        stage: Stage::Ingest,
                        date: Some(date),
                        rows,
                        elapsed: started.elapsed(),
                    });
                    summary.ingested.push(date);
                }
                Ok(IngestOutcome::AlreadyPresent) => summary.skipped.push(date),
                Ok(IngestOutcome::NonTrading) => summary.non_trading.push(date),
                Err(e) => {
                    tracing::warn!(date = %date, error = %e, "ingestion failed; sweep continues");
                    summary.failed.push((date, e));
                }
            }
        }
        self.sink
            .on_stage_complete(Stage::Ingest, summary.ingested.len(), stage_start.elapsed());
        summary
    }

    /// Dates whose `ADJ_FACTOR` must be (re)computed: raw partitions, plus
    /// the first present date after each newly ingested one, whose factor
    /// depends on the predecessor close that may have just changed.
    fn adjust_targets(
        &self,
        window: (TradeDate, TradeDate),
        summary: &PrepareSummary,
    ) -> Result<Vec<TradeDate>> {
        let present = partitions_in_window(&self.layout, Table::Snapshots, window)?;
        let mut targets: BTreeSet<TradeDate> = present
            .iter()
            .copied()
            .filter(|d| {
                partition_stage(&self.layout, Table::Snapshots, *d) == Some(PartitionStage::Raw)
            })
            .collect();

        for &ingested in &summary.ingested {
            if let Some(&successor) = present.iter().find(|d| **d > ingested) {
                targets.insert(successor);
            }
        }
        Ok(targets.into_iter().collect())
    }

    fn acquire_lock(&self) -> Result<StoreLock> {
        match StoreLock::try_acquire(&self.layout)? {
            LockState::Acquired(lock) => Ok(lock),
            LockState::Held(info) => Err(KdbError::Busy {
                pid: info.pid,
                path: self.layout.lock_path(),
            }),
            LockState::Stale(info) => {
                tracing::warn!(pid = info.pid, "breaking stale writer lock");
                reconcile(&self.layout)?;
                StoreLock::break_stale(&self.layout)?;
                match StoreLock::try_acquire(&self.layout)? {
                    LockState::Acquired(lock) => Ok(lock),
                    LockState::Held(info) | LockState::Stale(info) => Err(KdbError::Busy {
                        pid: info.pid,
                        path: self.layout.lock_path(),
                    }),
                }
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}
