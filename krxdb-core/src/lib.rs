//! krxdb core engine
//!
//! Storage and enrichment layer for a local Korean-market daily equities
//! database:
//! - Snapshot schema and typed row codec
//! - Hive-partitioned Parquet store with atomic partition rewrites,
//!   advisory write lock, and startup reconciliation
//! - Pruning scan engine (partition / row-group / column)
//! - Pure transforms: corporate-action adjustment factors, range-dependent
//!   cumulative multipliers, cross-sectional liquidity ranks, universe flags

pub mod date;
pub mod error;
pub mod events;
pub mod snapshot;
pub mod store;
pub mod transforms;

pub use date::TradeDate;
pub use error::{KdbError, Result};
