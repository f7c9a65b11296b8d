//! Stage S4a — ephemeral cumulative adjustment cache.
//!
//! The multipliers are only meaningful relative to the loader's window, so
//! the whole table is torn down and rebuilt on every prepare. It is never
//! merged or updated in place.

use std::collections::BTreeMap;
use std::time::Instant;

use polars::prelude::*;

use krxdb_core::date::{TradeDate, PARTITION_KEY};
use krxdb_core::error::{KdbError, Result};
use krxdb_core::events::{ProgressEvent, ProgressSink, Stage};
use krxdb_core::snapshot::{COL_ADJ_FACTOR, COL_CUM_MULTIPLIER, COL_SYMBOL};
use krxdb_core::store::{scan, write_partition, PartitionStage, ScanOptions, StoreLayout, Table};
use krxdb_core::transforms::adjustment::{cumulative_multipliers, FactorObs};

/// Rebuild the cumulative multiplier cache for the window.
pub fn rebuild_cache(
    layout: &StoreLayout,
    window: (TradeDate, TradeDate),
    sink: &dyn ProgressSink,
) -> Result<Vec<(TradeDate, usize)>> {
    let root = Table::CumulativeAdjustments.root(layout);
    match std::fs::remove_dir_all(&root) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(KdbError::store("cache_clear", &root, e)),
    }

    let long = scan(
        layout,
        Table::Snapshots,
        window,
        &ScanOptions::columns(&[PARTITION_KEY, COL_SYMBOL, COL_ADJ_FACTOR]),
    )?;
    if long.height() == 0 {
        return Ok(Vec::new());
    }

    let dates = long.column(PARTITION_KEY).unwrap().str().unwrap();
    let symbols = long.column(COL_SYMBOL).unwrap().str().unwrap();
    let factors = long.column(COL_ADJ_FACTOR).unwrap().f64().unwrap();

    let mut obs = Vec::with_capacity(long.height());
    for i in 0..long.height() {
        let (Some(date), Some(symbol)) = (dates.get(i), symbols.get(i)) else {
            continue;
        };
        obs.push(FactorObs {
            date: TradeDate::parse(date)?,
            symbol: symbol.to_string(),
            factor: factors.get(i),
        });
    }

    let mut by_date: BTreeMap<TradeDate, Vec<(String, f64)>> = BTreeMap::new();
    for cum in cumulative_multipliers(obs) {
        by_date
            .entry(cum.date)
            .or_default()
            .push((cum.symbol, cum.multiplier));
    }

    let mut written = Vec::with_capacity(by_date.len());
    for (date, mut rows) in by_date {
        let started = Instant::now();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        let symbols: Vec<String> = rows.iter().map(|(s, _)| s.clone()).collect();
        let multipliers: Vec<f64> = rows.iter().map(|(_, m)| *m).collect();
        let mut df = DataFrame::new(vec![
            Column::new(COL_SYMBOL.into(), symbols),
            Column::new(COL_CUM_MULTIPLIER.into(), multipliers),
        ])
        .map_err(|e| KdbError::Payload(format!("cumulative frame: {e}")))?;

        let count = write_partition(
            layout,
            Table::CumulativeAdjustments,
            date,
            &mut df,
            PartitionStage::Complete,
        )?;
        sink.on_partition(&ProgressEvent {
            stage: Stage::CumulativeCache,
            date: Some(date),
            rows: count,
            elapsed: started.elapsed(),
        });
        written.push((date, count));
    }
    Ok(written)
}
