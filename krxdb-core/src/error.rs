//! Error taxonomy for the store and pipeline.
//!
//! One enum, one variant per failure kind a caller can meaningfully match
//! on. Per-date pipeline failures are collected into a summary by the
//! orchestrator rather than propagated through this type.

use std::path::PathBuf;

use thiserror::Error;

use crate::date::TradeDate;

pub type Result<T, E = KdbError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum KdbError {
    /// Malformed configuration, field registry, or paths.
    #[error("config error: {0}")]
    Config(String),

    /// The external fetcher failed for a date.
    #[error("fetch failed for {date}: {reason}")]
    Fetch { date: TradeDate, reason: String },

    /// Upstream record missing required fields or failing numeric coercion.
    #[error("payload error: {0}")]
    Payload(String),

    /// A filesystem operation failed.
    #[error("store error during {stage} at {}: {reason}", .path.display())]
    Store {
        stage: &'static str,
        path: PathBuf,
        reason: String,
    },

    /// A partition file exists but cannot be decoded.
    #[error("corrupt partition {}: {reason}", .partition.display())]
    Corruption { partition: PathBuf, reason: String },

    /// Query sub-window outside the loader window.
    #[error(
        "query window [{req_start}, {req_end}] outside loader window [{win_start}, {win_end}]"
    )]
    Window {
        req_start: TradeDate,
        req_end: TradeDate,
        win_start: TradeDate,
        win_end: TradeDate,
    },

    /// Unknown field or universe name.
    #[error("unknown field '{field}' (known: {})", .known.join(", "))]
    Registry { field: String, known: Vec<String> },

    /// Another writer holds the advisory lock on the store.
    #[error("store busy: writer pid {pid} holds {}", .path.display())]
    Busy { pid: u32, path: PathBuf },
}

impl KdbError {
    pub fn store(stage: &'static str, path: impl Into<PathBuf>, err: impl ToString) -> Self {
        KdbError::Store {
            stage,
            path: path.into(),
            reason: err.to_string(),
        }
    }

    pub fn corruption(partition: impl Into<PathBuf>, err: impl ToString) -> Self {
        KdbError::Corruption {
            partition: partition.into(),
            reason: err.to_string(),
        }
    }
}
