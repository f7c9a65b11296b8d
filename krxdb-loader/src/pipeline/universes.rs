//! Stage S4b — universe table build.
//!
//! Persistent and idempotent: a ranked date is projected to its boolean tier
//! flags when its universe partition is missing, or when its ranks were
//! rewritten in this run. Rebuilding an existing date is bit-identical.

use std::collections::BTreeSet;
use std::time::Instant;

use rayon::prelude::*;

use krxdb_core::date::TradeDate;
use krxdb_core::error::{KdbError, Result};
use krxdb_core::events::{ProgressEvent, ProgressSink, Stage};
use krxdb_core::snapshot::{COL_LIQUIDITY_RANK, COL_SYMBOL};
use krxdb_core::store::{
    partition_stage, partitions_in_window, read_partition, write_partition, PartitionStage,
    StoreLayout, Table,
};
use krxdb_core::transforms::universe::universe_flags;

/// Build universe partitions for ranked dates in the window.
///
/// `refreshed` holds dates whose ranks were rewritten this run; their
/// universe partitions are rebuilt even if present.
pub fn build_universes(
    layout: &StoreLayout,
    window: (TradeDate, TradeDate),
    refreshed: &BTreeSet<TradeDate>,
    sink: &dyn ProgressSink,
) -> Result<Vec<(TradeDate, usize)>> {
    let targets: Vec<TradeDate> = partitions_in_window(layout, Table::Snapshots, window)?
        .into_iter()
        .filter(|d| partition_stage(layout, Table::Snapshots, *d) == Some(PartitionStage::Ranked))
        .filter(|d| {
            refreshed.contains(d) || partition_stage(layout, Table::Universes, *d).is_none()
        })
        .collect();

    targets
        .par_iter()
        .map(|&date| {
            let started = Instant::now();
            let rows = build_one(layout, date)?;
            sink.on_partition(&ProgressEvent {
                stage: Stage::Universes,
                date: Some(date),
                rows,
                elapsed: started.elapsed(),
            });
            Ok((date, rows))
        })
        .collect()
}

fn build_one(layout: &StoreLayout, date: TradeDate) -> Result<usize> {
    let df = read_partition(
        layout,
        Table::Snapshots,
        date,
        Some(&[COL_SYMBOL, COL_LIQUIDITY_RANK]),
    )?;

    let partition = Table::Snapshots.partition_dir(layout, date);
    let symbols = df
        .column(COL_SYMBOL)
        .map_err(|e| KdbError::corruption(&partition, e))?;
    let ranks = df
        .column(COL_LIQUIDITY_RANK)
        .map_err(|e| KdbError::corruption(&partition, e))?;

    let mut flags = universe_flags(symbols, ranks)?;
    write_partition(layout, Table::Universes, date, &mut flags, PartitionStage::Complete)
}
