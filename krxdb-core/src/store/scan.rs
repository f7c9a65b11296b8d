//! Pruning scan over a partitioned table.
//!
//! Three levels of pruning:
//! - Partition: only `TRD_DD=` directories inside the window are opened.
//! - Row group: a symbol filter is pushed into the lazy Parquet scan, where
//!   the min/max statistics of the symbol-sorted row groups skip whole
//!   groups without decoding.
//! - Column: only requested columns are decoded.
//!
//! The partition key is not stored in the files; scans inject `TRD_DD` as a
//! string column from the directory name. Missing partitions (holidays) are
//! skipped silently; a partition that exists but cannot be decoded aborts
//! the scan with a `Corruption` error naming it.

use polars::io::HiveOptions;
use polars::prelude::*;

use crate::date::{TradeDate, PARTITION_KEY};
use crate::error::{KdbError, Result};
use crate::snapshot::COL_SYMBOL;
use crate::store::atomic::{partition_dates_under, partition_stage, DATA_FILE};
use crate::store::{StoreLayout, Table};

/// Optional row and column restrictions for a scan.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Restrict to these symbols (row-group pruning applies).
    pub symbols: Option<Vec<String>>,
    /// Restrict to these columns; `TRD_DD` is always present in the result.
    pub columns: Option<Vec<String>>,
}

impl ScanOptions {
    pub fn columns(cols: &[&str]) -> Self {
        ScanOptions {
            symbols: None,
            columns: Some(cols.iter().map(|c| c.to_string()).collect()),
        }
    }

    pub fn with_symbols(mut self, symbols: &[&str]) -> Self {
        self.symbols = Some(symbols.iter().map(|s| s.to_string()).collect());
        self
    }
}

/// All committed partition dates of a table, ascending.
pub fn discover_partitions(layout: &StoreLayout, table: Table) -> Result<Vec<TradeDate>> {
    let dates = partition_dates_under(&table.root(layout))?;
    Ok(dates
        .into_iter()
        .filter(|d| partition_stage(layout, table, *d).is_some())
        .collect())
}

/// Committed partition dates inside the inclusive window, ascending.
pub fn partitions_in_window(
    layout: &StoreLayout,
    table: Table,
    window: (TradeDate, TradeDate),
) -> Result<Vec<TradeDate>> {
    let (start, end) = window;
    Ok(discover_partitions(layout, table)?
        .into_iter()
        .filter(|d| *d >= start && *d <= end)
        .collect())
}

/// Scan a table over a date window into one long-format frame.
///
/// Result rows are ordered (date ascending, symbol ascending within date):
/// partitions are visited in date order and written symbol-sorted. Returns
/// an empty frame when no partition falls inside the window.
pub fn scan(
    layout: &StoreLayout,
    table: Table,
    window: (TradeDate, TradeDate),
    opts: &ScanOptions,
) -> Result<DataFrame> {
    let dates = partitions_in_window(layout, table, window)?;

    // The partition key is not in the files; project the remaining columns.
    // A request for the key alone degrades to a full read so row counts
    // survive.
    let file_columns: Option<Vec<String>> = opts
        .columns
        .as_ref()
        .map(|cols| {
            cols.iter()
                .filter(|c| c.as_str() != PARTITION_KEY)
                .cloned()
                .collect::<Vec<_>>()
        })
        .filter(|cols| !cols.is_empty());

    let mut out: Option<DataFrame> = None;
    for date in dates {
        let df = scan_partition(layout, table, date, &file_columns, &opts.symbols)?;
        match out.as_mut() {
            None => out = Some(df),
            Some(acc) => {
                acc.vstack_mut(&df)
                    .map_err(|e| KdbError::corruption(table.partition_dir(layout, date), e))?;
            }
        }
    }

    Ok(out.unwrap_or_default())
}

fn scan_partition(
    layout: &StoreLayout,
    table: Table,
    date: TradeDate,
    file_columns: &Option<Vec<String>>,
    symbols: &Option<Vec<String>>,
) -> Result<DataFrame> {
    let dir = table.partition_dir(layout, date);
    let path = dir.join(DATA_FILE);

    let scan_args = ScanArgsParquet {
        hive_options: HiveOptions {
            enabled: Some(false),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut lf = LazyFrame::scan_parquet(&path, scan_args)
        .map_err(|e| KdbError::corruption(&dir, e))?;

    if let Some(cols) = file_columns {
        lf = lf.select(cols.iter().map(|c| col(c.as_str())).collect::<Vec<_>>());
    }
    if let Some(symbols) = symbols {
        let wanted = Series::new(COL_SYMBOL.into(), symbols.clone());
        lf = lf.filter(col(COL_SYMBOL).is_in(lit(wanted)));
    }

    let mut df = lf.collect().map_err(|e| KdbError::corruption(&dir, e))?;

    let key = Column::new(PARTITION_KEY.into(), vec![date.to_string(); df.height()]);
    df.insert_column(0, key)
        .map_err(|e| KdbError::corruption(&dir, e))?;
    Ok(df)
}
