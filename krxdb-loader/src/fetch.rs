//! Upstream fetcher contract.
//!
//! The pipeline never talks to the network itself; it consumes this
//! capability. A day with zero records is a non-trading day (holiday or
//! weekend); that is the upstream convention, not an error. Implementations
//! map their transport failures to `KdbError::Fetch` with the date attached.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{json, Value};

use krxdb_core::date::TradeDate;
use krxdb_core::error::{KdbError, Result};
use krxdb_core::snapshot;

/// One upstream record: untyped field map, exactly as the endpoint returns
/// it. The codec in `krxdb_core::snapshot` turns it into a typed row.
pub type RawRecord = serde_json::Map<String, Value>;

/// Capability to fetch one day's full cross-sectional snapshot.
pub trait SnapshotFetcher: Send + Sync {
    /// All listed securities' records for `date`, or empty for a
    /// non-trading day.
    fn fetch_day(&self, date: TradeDate) -> Result<Vec<RawRecord>>;
}

/// Deterministic in-memory fetcher for tests and offline fixtures.
///
/// Days that were never registered behave as non-trading days; days
/// registered as failing return a `Fetch` error, which is how tests exercise
/// the orchestrator's per-date failure isolation.
#[derive(Default)]
pub struct FixtureFetcher {
    days: BTreeMap<TradeDate, Vec<RawRecord>>,
    failing: BTreeSet<TradeDate>,
    calls: AtomicUsize,
}

impl FixtureFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_day(mut self, date: TradeDate, records: Vec<RawRecord>) -> Self {
        self.days.insert(date, records);
        self
    }

    pub fn with_failing_day(mut self, date: TradeDate) -> Self {
        self.failing.insert(date);
        self
    }

    /// Number of `fetch_day` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl SnapshotFetcher for FixtureFetcher {
    fn fetch_day(&self, date: TradeDate) -> Result<Vec<RawRecord>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.failing.contains(&date) {
            return Err(KdbError::Fetch {
                date,
                reason: "fixture configured to fail".into(),
            });
        }
        Ok(self.days.get(&date).cloned().unwrap_or_default())
    }
}

/// Build a fixture record in the upstream wire shape, numerics formatted
/// with thousands separators the way the endpoint emits them.
pub fn fixture_record(
    symbol: &str,
    name: &str,
    base_price: i64,
    close: i64,
    traded_volume: i64,
    traded_value: i64,
) -> RawRecord {
    let change = close - base_price;
    let value = json!({
        snapshot::COL_SYMBOL: symbol,
        snapshot::COL_NAME: name,
        snapshot::COL_MARKET: "KOSPI",
        snapshot::COL_BASE_PRICE: group_digits(base_price),
        snapshot::COL_CLOSE: group_digits(close),
        snapshot::COL_CHANGE: group_digits(change),
        snapshot::COL_FLUC_RATE: format!("{:.2}", percent_change(base_price, change)),
        snapshot::COL_FLUC_TYPE: if change >= 0 { "1" } else { "2" },
        snapshot::COL_VOLUME: group_digits(traded_volume),
        snapshot::COL_VALUE: group_digits(traded_value),
    });
    value.as_object().unwrap().clone()
}

fn percent_change(base: i64, change: i64) -> f64 {
    if base == 0 {
        0.0
    } else {
        change as f64 / base as f64 * 100.0
    }
}

/// `1234567` → `"1,234,567"`, sign preserved.
fn group_digits(n: i64) -> String {
    let negative = n < 0;
    let digits = n.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if negative {
        format!("-{grouped}")
    } else {
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krxdb_core::snapshot::decode_record;

    fn d(s: &str) -> TradeDate {
        TradeDate::parse(s).unwrap()
    }

    #[test]
    fn digit_grouping() {
        assert_eq!(group_digits(0), "0");
        assert_eq!(group_digits(999), "999");
        assert_eq!(group_digits(1_000), "1,000");
        assert_eq!(group_digits(2_650_000), "2,650,000");
        assert_eq!(group_digits(-50_000), "-50,000");
    }

    #[test]
    fn fixture_records_decode_through_the_codec() {
        let rec = fixture_record("005930", "삼성전자", 2_650_000, 2_600_000, 100, 260_000_000);
        let row = decode_record(&rec).unwrap();
        assert_eq!(row.bas_prc, 2_650_000);
        assert_eq!(row.tdd_clsprc, 2_600_000);
        assert_eq!(row.cmpprevdd_prc, -50_000);
    }

    #[test]
    fn unregistered_day_is_non_trading() {
        let fetcher = FixtureFetcher::new();
        assert!(fetcher.fetch_day(d("20240101")).unwrap().is_empty());
        assert_eq!(fetcher.fetch_count(), 1);
    }

    #[test]
    fn failing_day_carries_the_date() {
        let fetcher = FixtureFetcher::new().with_failing_day(d("20240102"));
        match fetcher.fetch_day(d("20240102")) {
            Err(KdbError::Fetch { date, .. }) => assert_eq!(date, d("20240102")),
            other => panic!("expected fetch error, got {other:?}"),
        }
    }
}
