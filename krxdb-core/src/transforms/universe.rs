//! Universe membership flags.
//!
//! Boolean columns instead of one row per (date, symbol, universe): a
//! "top 100 on date D" filter becomes a byte-wide predicate, and the subset
//! property (top 100 ⊆ top 200 ⊆ …) is visible in the data itself.

use polars::prelude::*;

use crate::error::{KdbError, Result};
use crate::snapshot::COL_SYMBOL;

/// Liquidity tiers and their flag column names, ascending.
pub const UNIVERSE_TIERS: [(i32, &str); 4] = [
    (100, "in_top_100"),
    (200, "in_top_200"),
    (500, "in_top_500"),
    (1000, "in_top_1000"),
];

/// Build one date's universe partition from `(symbol, liquidity_rank)`.
///
/// A null rank (partition not yet ranked, which the normal stage ordering
/// rules out) excludes the symbol from every tier. Output is sorted by
/// symbol.
pub fn universe_flags(symbols: &Column, ranks: &Column) -> Result<DataFrame> {
    let symbols = symbols
        .str()
        .map_err(|e| KdbError::Payload(format!("universe symbols column: {e}")))?;
    let ranks = ranks
        .i32()
        .map_err(|e| KdbError::Payload(format!("universe ranks column: {e}")))?;

    let mut rows: Vec<(&str, Option<i32>)> = symbols
        .iter()
        .zip(ranks.iter())
        .filter_map(|(sym, rank)| sym.map(|s| (s, rank)))
        .collect();
    rows.sort_by_key(|(sym, _)| *sym);

    let out_symbols: Vec<&str> = rows.iter().map(|(s, _)| *s).collect();
    let mut columns = vec![Column::new(COL_SYMBOL.into(), out_symbols)];
    for (threshold, name) in UNIVERSE_TIERS {
        let flags: Vec<bool> = rows
            .iter()
            .map(|(_, rank)| rank.map(|r| r <= threshold).unwrap_or(false))
            .collect();
        columns.push(Column::new(name.into(), flags));
    }

    DataFrame::new(columns).map_err(|e| KdbError::Payload(format!("universe frame: {e}")))
}
