//! Range-locked DataLoader.
//!
//! Opening a loader prepares the store for a fixed `[start, end]` window and
//! builds the window's cumulative-adjustment cache; queries are then cheap
//! filter/mask/pivot passes over published partitions. The cache is only
//! valid for this window; a different range means a new loader.
//!
//! Queries take no locks and may run concurrently; the write lock is held
//! only while `open` runs the pipeline.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use polars::prelude::*;

use krxdb_core::date::{TradeDate, PARTITION_KEY};
use krxdb_core::error::{KdbError, Result};
use krxdb_core::events::ProgressSink;
use krxdb_core::snapshot::{COL_CUM_MULTIPLIER, COL_LIQUIDITY_RANK, COL_SYMBOL};
use krxdb_core::store::{partitions_in_window, scan, ScanOptions, StoreLayout, Table};

use crate::config::LoaderConfig;
use crate::fetch::SnapshotFetcher;
use crate::fields::{universe_flag_column, universe_threshold, FieldRegistry};
use crate::pipeline::orchestrator::{Orchestrator, PrepareSummary};
use crate::shape::pivot_wide;

/// Universe selection for a query.
#[derive(Debug, Clone)]
pub enum Universe {
    /// A pre-computed liquidity tier (`top_100` … `top_1000`), applied
    /// per date: membership follows each date's own cross-section.
    Named(String),
    /// An explicit symbol list applied uniformly across dates.
    Symbols(Vec<String>),
}

impl Universe {
    pub fn named(name: impl Into<String>) -> Self {
        Universe::Named(name.into())
    }

    pub fn symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Universe::Symbols(symbols.into_iter().map(Into::into).collect())
    }
}

/// Query options for [`DataLoader::get`].
#[derive(Debug, Clone)]
pub struct GetOptions {
    pub universe: Option<Universe>,
    /// Sub-window; must lie inside the loader window. Defaults to the full
    /// loader window.
    pub window: Option<(TradeDate, TradeDate)>,
    /// Apply cumulative corporate-action adjustment (price fields only).
    pub adjusted: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            universe: None,
            window: None,
            adjusted: true,
        }
    }
}

/// A prepared, range-locked handle over the store.
#[derive(Debug)]
pub struct DataLoader {
    layout: StoreLayout,
    registry: FieldRegistry,
    window: (TradeDate, TradeDate),
    summary: PrepareSummary,
}

impl DataLoader {
    /// Prepare the store for `[start, end]` and return a query handle.
    ///
    /// Fails with `Busy` when another writer holds the store, and with
    /// `Config` for an inverted window or a malformed fields file.
    pub fn open(
        config: &LoaderConfig,
        fetcher: &dyn SnapshotFetcher,
        start: TradeDate,
        end: TradeDate,
    ) -> Result<Self> {
        Self::open_with(config, fetcher, start, end, None, None)
    }

    /// [`DataLoader::open`] with a custom progress sink and cancellation flag.
    pub fn open_with(
        config: &LoaderConfig,
        fetcher: &dyn SnapshotFetcher,
        start: TradeDate,
        end: TradeDate,
        sink: Option<&dyn ProgressSink>,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<Self> {
        let registry = match &config.fields_file {
            Some(path) => FieldRegistry::with_overlay_file(path)?,
            None => FieldRegistry::builtin(),
        };

        let layout = config.layout();
        let mut orchestrator = Orchestrator::new(layout.clone(), fetcher)
            .with_force_refetch(config.force_refetch);
        if let Some(sink) = sink {
            orchestrator = orchestrator.with_sink(sink);
        }
        if let Some(cancel) = cancel {
            orchestrator = orchestrator.with_cancel(cancel);
        }
        let summary = orchestrator.prepare((start, end))?;

        Ok(Self {
            layout,
            registry,
            window: (start, end),
            summary,
        })
    }

    pub fn window(&self) -> (TradeDate, TradeDate) {
        self.window
    }

    /// What the preparation pipeline did, including per-date failures.
    pub fn prepare_summary(&self) -> &PrepareSummary {
        &self.summary
    }

    /// Trading dates present in the store within the loader window.
    pub fn trading_dates(&self) -> Result<Vec<TradeDate>> {
        partitions_in_window(&self.layout, Table::Snapshots, self.window)
    }

    /// Query a field as a wide frame: `TRD_DD` index ascending, one column
    /// per symbol ascending, nulls where a symbol has no observation.
    pub fn get(&self, field: &str, opts: &GetOptions) -> Result<DataFrame> {
        let mapping = self.registry.resolve(field)?.clone();
        let window = self.clamp_window(opts.window)?;

        let mut scan_opts =
            ScanOptions::columns(&[PARTITION_KEY, COL_SYMBOL, mapping.column.as_str()]);
        if let Some(Universe::Symbols(symbols)) = &opts.universe {
            scan_opts.symbols = Some(symbols.clone());
        }

        let mut long = scan(&self.layout, mapping.table, window, &scan_opts)?;

        if let Some(Universe::Named(name)) = &opts.universe {
            long = self.apply_named_universe(long, name, window)?;
        }

        if opts.adjusted && mapping.adjustable && long.height() > 0 {
            long = self.apply_adjustments(long, &mapping.column, window)?;
        }

        pivot_wide(&long, &mapping.column)
    }

    /// Per-date member lists of a named universe, ordered by liquidity rank.
    pub fn universe_symbols(
        &self,
        name: &str,
        window: Option<(TradeDate, TradeDate)>,
    ) -> Result<BTreeMap<TradeDate, Vec<String>>> {
        let threshold = universe_threshold(name)?;
        let window = self.clamp_window(window)?;

        let long = scan(
            &self.layout,
            Table::Snapshots,
            window,
            &ScanOptions::columns(&[PARTITION_KEY, COL_SYMBOL, COL_LIQUIDITY_RANK]),
        )?;
        if long.height() == 0 {
            return Ok(BTreeMap::new());
        }

        let dates = long.column(PARTITION_KEY).unwrap().str().unwrap();
        let symbols = long.column(COL_SYMBOL).unwrap().str().unwrap();
        let ranks = long.column(COL_LIQUIDITY_RANK).unwrap().i32().unwrap();

        let mut grouped: BTreeMap<TradeDate, Vec<(i32, String)>> = BTreeMap::new();
        for i in 0..long.height() {
            let (Some(date), Some(symbol), Some(rank)) =
                (dates.get(i), symbols.get(i), ranks.get(i))
            else {
                continue;
            };
            if rank <= threshold {
                grouped
                    .entry(TradeDate::parse(date)?)
                    .or_default()
                    .push((rank, symbol.to_string()));
            }
        }

        Ok(grouped
            .into_iter()
            .map(|(date, mut members)| {
                members.sort();
                (
                    date,
                    members.into_iter().map(|(_, symbol)| symbol).collect(),
                )
            })
            .collect())
    }

    fn clamp_window(
        &self,
        requested: Option<(TradeDate, TradeDate)>,
    ) -> Result<(TradeDate, TradeDate)> {
        let (win_start, win_end) = self.window;
        let Some((req_start, req_end)) = requested else {
            return Ok(self.window);
        };
        if req_start < win_start || req_end > win_end || req_start > req_end {
            return Err(KdbError::Window {
                req_start,
                req_end,
                win_start,
                win_end,
            });
        }
        Ok((req_start, req_end))
    }

    /// Keep only (date, symbol) pairs that were in the universe on that
    /// date. Membership is a per-date semi-join, so a symbol drifts in and
    /// out as its liquidity changes.
    fn apply_named_universe(
        &self,
        long: DataFrame,
        name: &str,
        window: (TradeDate, TradeDate),
    ) -> Result<DataFrame> {
        let flag_column = universe_flag_column(name)?;
        if long.height() == 0 {
            return Ok(long);
        }

        let universe = scan(
            &self.layout,
            Table::Universes,
            window,
            &ScanOptions::columns(&[PARTITION_KEY, COL_SYMBOL, flag_column]),
        )?;

        let mut members: HashSet<(String, String)> = HashSet::new();
        if universe.height() > 0 {
            let dates = universe.column(PARTITION_KEY).unwrap().str().unwrap();
            let symbols = universe.column(COL_SYMBOL).unwrap().str().unwrap();
            let flags = universe
                .column(flag_column)
                .and_then(|c| c.bool())
                .map_err(|e| KdbError::Payload(format!("universe flag column: {e}")))?;
            for i in 0..universe.height() {
                if let (Some(date), Some(symbol), Some(true)) =
                    (dates.get(i), symbols.get(i), flags.get(i))
                {
                    members.insert((date.to_string(), symbol.to_string()));
                }
            }
        }

        let dates = long.column(PARTITION_KEY).unwrap().str().unwrap();
        let symbols = long.column(COL_SYMBOL).unwrap().str().unwrap();
        let keep: Vec<bool> = dates
            .iter()
            .zip(symbols.iter())
            .map(|(date, symbol)| match (date, symbol) {
                (Some(date), Some(symbol)) => {
                    members.contains(&(date.to_string(), symbol.to_string()))
                }
                _ => false,
            })
            .collect();
        let mask = BooleanChunked::from_slice("mask".into(), &keep);

        long.filter(&mask)
            .map_err(|e| KdbError::Payload(format!("universe mask: {e}")))
    }

    /// Multiply raw prices up to the window-end scale and round half-to-even
    /// back to integer won. Rows with no cached multiplier (no corporate
    /// action visible) scale by 1.
    fn apply_adjustments(
        &self,
        mut long: DataFrame,
        value_column: &str,
        window: (TradeDate, TradeDate),
    ) -> Result<DataFrame> {
        let cache = scan(
            &self.layout,
            Table::CumulativeAdjustments,
            window,
            &ScanOptions::columns(&[PARTITION_KEY, COL_SYMBOL, COL_CUM_MULTIPLIER]),
        )?;

        let mut multipliers: HashMap<(String, String), f64> = HashMap::new();
        if cache.height() > 0 {
            let dates = cache.column(PARTITION_KEY).unwrap().str().unwrap();
            let symbols = cache.column(COL_SYMBOL).unwrap().str().unwrap();
            let values = cache.column(COL_CUM_MULTIPLIER).unwrap().f64().unwrap();
            for i in 0..cache.height() {
                if let (Some(date), Some(symbol), Some(multiplier)) =
                    (dates.get(i), symbols.get(i), values.get(i))
                {
                    multipliers.insert((date.to_string(), symbol.to_string()), multiplier);
                }
            }
        }

        let values = long
            .column(value_column)
            .and_then(|c| c.i64())
            .map_err(|e| {
                KdbError::Payload(format!("adjustable field must be integer-priced: {e}"))
            })?;
        let dates = long.column(PARTITION_KEY).unwrap().str().unwrap();
        let symbols = long.column(COL_SYMBOL).unwrap().str().unwrap();

        let mut adjusted: Vec<Option<i64>> = Vec::with_capacity(long.height());
        for i in 0..long.height() {
            let value = values.get(i);
            let scaled = match (value, dates.get(i), symbols.get(i)) {
                (Some(value), Some(date), Some(symbol)) => {
                    let multiplier = multipliers
                        .get(&(date.to_string(), symbol.to_string()))
                        .copied()
                        .unwrap_or(1.0);
                    Some((value as f64 * multiplier).round_ties_even() as i64)
                }
                _ => value,
            };
            adjusted.push(scaled);
        }

        long.replace(value_column, Series::new(value_column.into(), adjusted))
            .map_err(|e| KdbError::Payload(format!("adjustment apply: {e}")))?;
        Ok(long)
    }
}

impl Drop for DataLoader {
    fn drop(&mut self) {
        // The cumulative cache (and any staging/backup debris) is only
        // meaningful for this loader's window.
        let _ = std::fs::remove_dir_all(&self.layout.ephemeral_root);
    }
}
