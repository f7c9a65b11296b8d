//! Stage S2 — adjustment factor enrichment.
//!
//! The factor at a symbol's first in-window date needs the predecessor close
//! from *before* the window, so the computation scans every partition from
//! the store's earliest date up to the window end in one pass, then rewrites
//! only the target partitions.

use std::collections::HashMap;
use std::time::Instant;

use polars::prelude::*;

use krxdb_core::date::{TradeDate, PARTITION_KEY};
use krxdb_core::error::{KdbError, Result};
use krxdb_core::events::{ProgressEvent, ProgressSink, Stage};
use krxdb_core::snapshot::{COL_ADJ_FACTOR, COL_BASE_PRICE, COL_CLOSE, COL_SYMBOL};
use krxdb_core::store::{
    discover_partitions, read_partition, scan, write_partition, PartitionStage, ScanOptions,
    StoreLayout, Table,
};
use krxdb_core::transforms::adjustment::{lag_adjustment_factors, FactorInput};

/// Attach `ADJ_FACTOR` to the given target partitions.
///
/// Targets are chosen by the orchestrator (freshly ingested dates plus any
/// date whose predecessor changed). Recomputation is deterministic from the
/// stored integers, so rewriting an already-adjusted partition is safe and
/// bit-identical.
pub fn enrich_adjustments(
    layout: &StoreLayout,
    window_end: TradeDate,
    targets: &[TradeDate],
    sink: &dyn ProgressSink,
) -> Result<Vec<(TradeDate, usize)>> {
    if targets.is_empty() {
        return Ok(Vec::new());
    }

    let factors = factor_map(layout, window_end)?;

    let mut written = Vec::with_capacity(targets.len());
    for &date in targets {
        let started = Instant::now();
        let mut df = read_partition(layout, Table::Snapshots, date, None)?;

        let symbols = df
            .column(COL_SYMBOL)
            .and_then(|c| c.str())
            .map_err(|e| KdbError::corruption(Table::Snapshots.partition_dir(layout, date), e))?
            .iter()
            .map(|sym| sym.map(str::to_string))
            .collect::<Vec<_>>();

        let column: Vec<Option<f64>> = symbols
            .iter()
            .map(|sym| {
                sym.as_deref()
                    .and_then(|s| factors.get(&(date, s.to_string())).copied().flatten())
            })
            .collect();

        df.replace(COL_ADJ_FACTOR, Series::new(COL_ADJ_FACTOR.into(), column))
            .map_err(|e| KdbError::corruption(Table::Snapshots.partition_dir(layout, date), e))?;

        let rows = write_partition(layout, Table::Snapshots, date, &mut df, PartitionStage::Adjusted)?;
        sink.on_partition(&ProgressEvent {
            stage: Stage::Adjust,
            date: Some(date),
            rows,
            elapsed: started.elapsed(),
        });
        written.push((date, rows));
    }
    Ok(written)
}

/// Factors for every (date, symbol) present in the store up to `window_end`.
fn factor_map(
    layout: &StoreLayout,
    window_end: TradeDate,
) -> Result<HashMap<(TradeDate, String), Option<f64>>> {
    let all = discover_partitions(layout, Table::Snapshots)?;
    let Some(&earliest) = all.first() else {
        return Ok(HashMap::new());
    };

    let long = scan(
        layout,
        Table::Snapshots,
        (earliest, window_end),
        &ScanOptions::columns(&[PARTITION_KEY, COL_SYMBOL, COL_BASE_PRICE, COL_CLOSE]),
    )?;
    if long.height() == 0 {
        return Ok(HashMap::new());
    }

    let dates = long.column(PARTITION_KEY).unwrap().str().unwrap();
    let symbols = long.column(COL_SYMBOL).unwrap().str().unwrap();
    let bases = long.column(COL_BASE_PRICE).unwrap().i64().unwrap();
    let closes = long.column(COL_CLOSE).unwrap().i64().unwrap();

    let mut inputs = Vec::with_capacity(long.height());
    for i in 0..long.height() {
        let (Some(date), Some(symbol)) = (dates.get(i), symbols.get(i)) else {
            continue;
        };
        inputs.push(FactorInput {
            date: TradeDate::parse(date)?,
            symbol: symbol.to_string(),
            base_price: bases.get(i),
            close: closes.get(i),
        });
    }

    Ok(lag_adjustment_factors(inputs)
        .into_iter()
        .map(|f| ((f.date, f.symbol), f.factor))
        .collect())
}
