//! Trading-date newtype.
//!
//! The wire and on-disk form is always `YYYYMMDD`; partition directories are
//! named `TRD_DD=YYYYMMDD`. A `TradeDate` is just a calendar date; whether
//! the market actually traded on it is a property of the store (a partition
//! exists), not of the type.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::KdbError;

/// Prefix of every partition directory name.
pub const PARTITION_KEY: &str = "TRD_DD";

const WIRE_FORMAT: &str = "%Y%m%d";

/// A calendar date in the `YYYYMMDD` wire form used throughout the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TradeDate(NaiveDate);

impl TradeDate {
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(TradeDate)
    }

    /// Parse the `YYYYMMDD` wire form.
    pub fn parse(s: &str) -> Result<Self, KdbError> {
        NaiveDate::parse_from_str(s, WIRE_FORMAT)
            .map(TradeDate)
            .map_err(|_| KdbError::Config(format!("invalid trade date '{s}' (expected YYYYMMDD)")))
    }

    pub fn as_naive(&self) -> NaiveDate {
        self.0
    }

    /// Partition directory name: `TRD_DD=YYYYMMDD`.
    pub fn partition_name(&self) -> String {
        format!("{PARTITION_KEY}={self}")
    }

    /// Parse a partition directory name back into a date.
    ///
    /// Returns `None` for anything that is not a well-formed partition name;
    /// callers use this to skip stray directories during discovery.
    pub fn from_partition_name(name: &str) -> Option<Self> {
        let value = name.strip_prefix(PARTITION_KEY)?.strip_prefix('=')?;
        Self::parse(value).ok()
    }

    pub fn succ(&self) -> Self {
        TradeDate(self.0 + Duration::days(1))
    }

    /// Inclusive calendar-day iteration over `[start, end]`.
    pub fn range_inclusive(start: TradeDate, end: TradeDate) -> impl Iterator<Item = TradeDate> {
        let mut current = start;
        std::iter::from_fn(move || {
            if current > end {
                return None;
            }
            let out = current;
            current = current.succ();
            Some(out)
        })
    }
}

impl fmt::Display for TradeDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(WIRE_FORMAT))
    }
}

impl FromStr for TradeDate {
    type Err = KdbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for TradeDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TradeDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_roundtrip() {
        let d = TradeDate::parse("20240102").unwrap();
        assert_eq!(d.to_string(), "20240102");
        assert_eq!(d, TradeDate::from_ymd(2024, 1, 2).unwrap());
    }

    #[test]
    fn partition_name_roundtrip() {
        let d = TradeDate::parse("20180504").unwrap();
        assert_eq!(d.partition_name(), "TRD_DD=20180504");
        assert_eq!(TradeDate::from_partition_name("TRD_DD=20180504"), Some(d));
        assert_eq!(TradeDate::from_partition_name("SYM=20180504"), None);
        assert_eq!(TradeDate::from_partition_name("TRD_DD=notadate"), None);
    }

    #[test]
    fn rejects_malformed_dates() {
        assert!(TradeDate::parse("2024-01-02").is_err());
        assert!(TradeDate::parse("20241301").is_err());
        assert!(TradeDate::parse("").is_err());
    }

    #[test]
    fn range_is_inclusive_and_ordered() {
        let start = TradeDate::parse("20240228").unwrap();
        let end = TradeDate::parse("20240302").unwrap();
        let days: Vec<String> = TradeDate::range_inclusive(start, end)
            .map(|d| d.to_string())
            .collect();
        // 2024 is a leap year
        assert_eq!(
            days,
            vec!["20240228", "20240229", "20240301", "20240302"]
        );
    }

    #[test]
    fn ordering_matches_string_ordering() {
        let a = TradeDate::parse("20231229").unwrap();
        let b = TradeDate::parse("20240102").unwrap();
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }
}
