//! Snapshot schema and row codec.
//!
//! Upstream records arrive as untyped JSON maps with locale-formatted
//! numerics ("2,650,000"). Everything downstream of this module operates on
//! the typed `SnapshotRow` or on the fixed columnar schema; parsing and
//! validation happen exactly once, at the ingestion boundary.
//!
//! The physical schema is the full enriched layout: the two enrichment
//! columns (`ADJ_FACTOR`, `LIQUIDITY_RANK`) are written as null placeholders
//! by stage S1 and filled by S2/S3. The partition key (`TRD_DD`) is never
//! stored in the file; the scan layer injects it from the directory name.

use polars::prelude::*;
use serde_json::Value;

use crate::error::{KdbError, Result};

pub const COL_SYMBOL: &str = "ISU_SRT_CD";
pub const COL_NAME: &str = "ISU_ABBRV";
pub const COL_MARKET: &str = "MKT_NM";
pub const COL_BASE_PRICE: &str = "BAS_PRC";
pub const COL_CLOSE: &str = "TDD_CLSPRC";
pub const COL_CHANGE: &str = "CMPPREVDD_PRC";
pub const COL_FLUC_RATE: &str = "FLUC_RT";
pub const COL_FLUC_TYPE: &str = "FLUC_TP";
pub const COL_VOLUME: &str = "ACC_TRDVOL";
pub const COL_VALUE: &str = "ACC_TRDVAL";
pub const COL_ADJ_FACTOR: &str = "ADJ_FACTOR";
pub const COL_LIQUIDITY_RANK: &str = "LIQUIDITY_RANK";

/// Column name in the ephemeral cumulative-adjustment cache.
pub const COL_CUM_MULTIPLIER: &str = "CUM_ADJ_MULTIPLIER";

/// Market segment of a listed security.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Market {
    Kospi,
    Kosdaq,
    Konex,
}

impl Market {
    /// Accepts both the display names and the short market identifiers
    /// KRX endpoints use (`STK`/`KSQ`/`KNX`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "KOSPI" | "STK" => Some(Market::Kospi),
            "KOSDAQ" | "KSQ" => Some(Market::Kosdaq),
            "KONEX" | "KNX" => Some(Market::Konex),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Kospi => "KOSPI",
            Market::Kosdaq => "KOSDAQ",
            Market::Konex => "KONEX",
        }
    }
}

/// One (trading_date, security) observation, fully typed.
///
/// The trading date is not a field: a row only exists inside a partition,
/// and the partition directory carries the date.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub isu_srt_cd: String,
    pub isu_abbrv: String,
    pub mkt: Market,
    pub bas_prc: i64,
    pub tdd_clsprc: i64,
    pub cmpprevdd_prc: i64,
    pub fluc_rt: String,
    pub fluc_tp: String,
    pub acc_trdvol: i64,
    pub acc_trdval: i64,
}

/// Parse a KRX numeric field: integer, or string with thousands separators.
///
/// Tolerant of `"-"` and empty strings (returns `None`); the caller decides
/// whether absence is fatal.
pub fn parse_krx_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let cleaned = s.replace(',', "");
            let trimmed = cleaned.trim();
            if trimmed.is_empty() || trimmed == "-" {
                return None;
            }
            trimmed.parse::<i64>().ok()
        }
        _ => None,
    }
}

fn require_str(record: &serde_json::Map<String, Value>, key: &str) -> Result<String> {
    match record.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) | None => Err(KdbError::Payload(format!("missing required field {key}"))),
    }
}

fn require_int(record: &serde_json::Map<String, Value>, key: &str) -> Result<i64> {
    let value = record
        .get(key)
        .ok_or_else(|| KdbError::Payload(format!("missing required field {key}")))?;
    parse_krx_int(value)
        .ok_or_else(|| KdbError::Payload(format!("field {key} is not numeric: {value}")))
}

/// Decode one upstream record into a typed row.
///
/// Unknown fields are ignored; a missing or uncoercible required field is a
/// `Payload` error that is fatal for the whole day's ingestion.
pub fn decode_record(record: &serde_json::Map<String, Value>) -> Result<SnapshotRow> {
    let mkt_raw = require_str(record, COL_MARKET)?;
    let mkt = Market::parse(&mkt_raw)
        .ok_or_else(|| KdbError::Payload(format!("unknown market identifier '{mkt_raw}'")))?;

    Ok(SnapshotRow {
        isu_srt_cd: require_str(record, COL_SYMBOL)?,
        isu_abbrv: require_str(record, COL_NAME)?,
        mkt,
        bas_prc: require_int(record, COL_BASE_PRICE)?,
        tdd_clsprc: require_int(record, COL_CLOSE)?,
        cmpprevdd_prc: require_int(record, COL_CHANGE)?,
        fluc_rt: require_str(record, COL_FLUC_RATE)?,
        fluc_tp: require_str(record, COL_FLUC_TYPE)?,
        acc_trdvol: require_int(record, COL_VOLUME)?,
        acc_trdval: require_int(record, COL_VALUE)?,
    })
}

/// The canonical physical schema of a snapshot partition file.
pub fn snapshot_schema() -> Schema {
    Schema::from_iter(vec![
        Field::new(COL_SYMBOL.into(), DataType::String),
        Field::new(COL_NAME.into(), DataType::String),
        Field::new(COL_MARKET.into(), DataType::String),
        Field::new(COL_BASE_PRICE.into(), DataType::Int64),
        Field::new(COL_CLOSE.into(), DataType::Int64),
        Field::new(COL_CHANGE.into(), DataType::Int64),
        Field::new(COL_FLUC_RATE.into(), DataType::String),
        Field::new(COL_FLUC_TYPE.into(), DataType::String),
        Field::new(COL_VOLUME.into(), DataType::Int64),
        Field::new(COL_VALUE.into(), DataType::Int64),
        Field::new(COL_ADJ_FACTOR.into(), DataType::Float64),
        Field::new(COL_LIQUIDITY_RANK.into(), DataType::Int32),
    ])
}

/// Convert decoded rows into a partition payload with null enrichment
/// columns. Rows are sorted by symbol so row-group statistics support
/// symbol pruning on read.
pub fn rows_to_dataframe(rows: &[SnapshotRow]) -> Result<DataFrame> {
    let mut rows: Vec<&SnapshotRow> = rows.iter().collect();
    rows.sort_by(|a, b| a.isu_srt_cd.cmp(&b.isu_srt_cd));

    let n = rows.len();
    let symbols: Vec<&str> = rows.iter().map(|r| r.isu_srt_cd.as_str()).collect();
    let names: Vec<&str> = rows.iter().map(|r| r.isu_abbrv.as_str()).collect();
    let markets: Vec<&str> = rows.iter().map(|r| r.mkt.as_str()).collect();
    let base_prices: Vec<i64> = rows.iter().map(|r| r.bas_prc).collect();
    let closes: Vec<i64> = rows.iter().map(|r| r.tdd_clsprc).collect();
    let changes: Vec<i64> = rows.iter().map(|r| r.cmpprevdd_prc).collect();
    let fluc_rates: Vec<&str> = rows.iter().map(|r| r.fluc_rt.as_str()).collect();
    let fluc_types: Vec<&str> = rows.iter().map(|r| r.fluc_tp.as_str()).collect();
    let volumes: Vec<i64> = rows.iter().map(|r| r.acc_trdvol).collect();
    let values: Vec<i64> = rows.iter().map(|r| r.acc_trdval).collect();

    DataFrame::new(vec![
        Column::new(COL_SYMBOL.into(), symbols),
        Column::new(COL_NAME.into(), names),
        Column::new(COL_MARKET.into(), markets),
        Column::new(COL_BASE_PRICE.into(), base_prices),
        Column::new(COL_CLOSE.into(), closes),
        Column::new(COL_CHANGE.into(), changes),
        Column::new(COL_FLUC_RATE.into(), fluc_rates),
        Column::new(COL_FLUC_TYPE.into(), fluc_types),
        Column::new(COL_VOLUME.into(), volumes),
        Column::new(COL_VALUE.into(), values),
        Column::new(COL_ADJ_FACTOR.into(), vec![None::<f64>; n]),
        Column::new(COL_LIQUIDITY_RANK.into(), vec![None::<i32>; n]),
    ])
    .map_err(|e| KdbError::Payload(format!("snapshot frame construction: {e}")))
}
