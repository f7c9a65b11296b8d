//! Corporate-action adjustment math.
//!
//! Two computations, both per symbol:
//!
//! - The single-period factor `BAS_PRC_t / TDD_CLSPRC_{t-1}` over consecutive
//!   observations (LAG semantics). Normally exactly 1; deviates on corporate
//!   action days (0.02 for a 50:1 split).
//! - The range-dependent cumulative multiplier: the product of factors
//!   *strictly after* t within the query window. The factor at t describes
//!   the transition into t, so the close at t is already on the post-t scale
//!   and its own factor is excluded. `cum(last_date) = 1` by construction.
//!
//! Both run their arithmetic through `Decimal` and convert to `f64` only at
//! the boundary, so products of many near-1 factors with occasional 0.02
//! events stay exact well past the required 1e-6.

use std::collections::BTreeMap;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::date::TradeDate;

/// One observation feeding the factor computation.
#[derive(Debug, Clone)]
pub struct FactorInput {
    pub date: TradeDate,
    pub symbol: String,
    pub base_price: Option<i64>,
    pub close: Option<i64>,
}

/// A computed factor. `None` for a symbol's first observation, or when the
/// prior close is zero or missing.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorValue {
    pub date: TradeDate,
    pub symbol: String,
    pub factor: Option<f64>,
}

/// Compute per-symbol LAG adjustment factors.
///
/// Input order does not matter; observations are grouped by symbol and
/// sorted by date internally. The caller is responsible for including
/// enough history left of its window of interest so each symbol's
/// predecessor is present.
pub fn lag_adjustment_factors(rows: Vec<FactorInput>) -> Vec<FactorValue> {
    let mut by_symbol: BTreeMap<String, Vec<FactorInput>> = BTreeMap::new();
    for row in rows {
        by_symbol.entry(row.symbol.clone()).or_default().push(row);
    }

    let mut out = Vec::new();
    for (symbol, mut obs) in by_symbol {
        obs.sort_by_key(|r| r.date);
        let mut prev_close: Option<i64> = None;
        for row in obs {
            let factor = match (row.base_price, prev_close) {
                (Some(base), Some(prev)) if prev != 0 => {
                    (Decimal::from(base) / Decimal::from(prev)).to_f64()
                }
                (Some(_), Some(0)) => {
                    tracing::warn!(
                        symbol = %symbol,
                        date = %row.date,
                        "prior close is zero; adjustment factor left null"
                    );
                    None
                }
                _ => None,
            };
            out.push(FactorValue {
                date: row.date,
                symbol: symbol.clone(),
                factor,
            });
            prev_close = row.close;
        }
    }
    out
}

/// One in-window factor observation feeding the cumulative computation.
#[derive(Debug, Clone)]
pub struct FactorObs {
    pub date: TradeDate,
    pub symbol: String,
    pub factor: Option<f64>,
}

/// A cumulative multiplier for one (date, symbol) under the given window.
#[derive(Debug, Clone, PartialEq)]
pub struct CumMultiplier {
    pub date: TradeDate,
    pub symbol: String,
    pub multiplier: f64,
}

/// Reverse cumulative product of adjustment factors within a window.
///
/// `cum(t_k) = 1`; `cum(t_i) = cum(t_{i+1}) * f_{i+1}`. Null factors count
/// as 1 (no corporate action). The result depends on which factors are
/// visible in the window: widening the window past a later split changes
/// every earlier multiplier for that symbol. That is the point.
pub fn cumulative_multipliers(obs: Vec<FactorObs>) -> Vec<CumMultiplier> {
    let mut by_symbol: BTreeMap<String, Vec<(TradeDate, Option<f64>)>> = BTreeMap::new();
    for o in obs {
        by_symbol
            .entry(o.symbol)
            .or_default()
            .push((o.date, o.factor));
    }

    let mut out = Vec::new();
    for (symbol, mut series) in by_symbol {
        series.sort_by_key(|(date, _)| *date);

        let mut running = Decimal::ONE;
        let mut rev = Vec::with_capacity(series.len());
        for (date, factor) in series.into_iter().rev() {
            rev.push(CumMultiplier {
                date,
                symbol: symbol.clone(),
                multiplier: running.to_f64().unwrap_or(1.0),
            });
            let f = factor
                .and_then(Decimal::from_f64)
                .unwrap_or(Decimal::ONE);
            running *= f;
        }
        rev.reverse();
        out.extend(rev);
    }
    out
}
