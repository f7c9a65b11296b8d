//! Atomic partition writes and startup reconciliation.
//!
//! Write protocol for one partition:
//!
//! 1. Build the partition under the staging root (Parquet file, then the
//!    commit marker, written last).
//! 2. If a prior version exists, move it aside to the backup root.
//! 3. Move the staged directory into place with a single directory rename.
//! 4. Delete the backup (best-effort).
//!
//! The marker carries the partition's enrichment stage, so readers can tell
//! raw partitions from adjusted/ranked ones without opening the file, and a
//! directory without a marker is never a valid partition. When the rename in
//! step 3 crosses filesystems the move degrades to a recursive copy that
//! writes the marker last, preserving the "no marker, no partition" rule.
//!
//! Reconciliation reverses any interrupted write: staging debris is dropped,
//! torn (unmarked) partitions are removed, displaced backups are restored
//! when the foreground partition is missing and deleted otherwise.

use std::fs;
use std::path::{Path, PathBuf};

use polars::prelude::*;

use crate::date::TradeDate;
use crate::error::{KdbError, Result};
use crate::store::{StoreLayout, Table, ALL_TABLES};

pub const DATA_FILE: &str = "data.parquet";
pub const COMMIT_MARKER: &str = "_COMMITTED";

/// Target rows per Parquet row group; keeps min/max symbol statistics tight
/// enough for row-group pruning.
pub const ROW_GROUP_SIZE: usize = 1000;

const ZSTD_LEVEL: i32 = 3;

/// Enrichment level recorded in the commit marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PartitionStage {
    /// S1 output: enrichment columns are null placeholders.
    Raw,
    /// S2 output: adjustment factors filled.
    Adjusted,
    /// S3 output: liquidity ranks filled.
    Ranked,
    /// Derived tables (universes, cumulative cache).
    Complete,
}

impl PartitionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionStage::Raw => "raw",
            PartitionStage::Adjusted => "adjusted",
            PartitionStage::Ranked => "ranked",
            PartitionStage::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "raw" => Some(PartitionStage::Raw),
            "adjusted" => Some(PartitionStage::Adjusted),
            "ranked" => Some(PartitionStage::Ranked),
            "complete" => Some(PartitionStage::Complete),
            _ => None,
        }
    }
}

/// Write one partition through the staging/backup/publish pathway.
///
/// Returns the number of rows written. Callers are responsible for row
/// content; symbol-ascending order is expected (the snapshot codec and the
/// derived-table builders both produce it).
pub fn write_partition(
    layout: &StoreLayout,
    table: Table,
    date: TradeDate,
    df: &mut DataFrame,
    stage: PartitionStage,
) -> Result<usize> {
    let staged = table.staging_dir(layout, date);
    if staged.exists() {
        fs::remove_dir_all(&staged).map_err(|e| KdbError::store("stage", &staged, e))?;
    }
    fs::create_dir_all(&staged).map_err(|e| KdbError::store("stage", &staged, e))?;

    let data_path = staged.join(DATA_FILE);
    write_parquet(df, &data_path)?;
    fs::write(staged.join(COMMIT_MARKER), stage.as_str())
        .map_err(|e| KdbError::store("stage", &staged, e))?;

    publish(layout, table, date, &staged)?;
    Ok(df.height())
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<()> {
    let file = fs::File::create(path).map_err(|e| KdbError::store("stage", path, e))?;
    let level =
        ZstdLevel::try_new(ZSTD_LEVEL).map_err(|e| KdbError::store("stage", path, e))?;
    ParquetWriter::new(file)
        .with_row_group_size(Some(ROW_GROUP_SIZE))
        .with_compression(ParquetCompression::Zstd(Some(level)))
        .with_statistics(StatisticsOptions::full())
        .finish(df)
        .map_err(|e| KdbError::store("stage", path, e))?;
    Ok(())
}

fn publish(layout: &StoreLayout, table: Table, date: TradeDate, staged: &Path) -> Result<()> {
    let final_dir = table.partition_dir(layout, date);
    let backup = table.backup_dir(layout, date);

    if final_dir.exists() {
        if backup.exists() {
            fs::remove_dir_all(&backup).map_err(|e| KdbError::store("backup", &backup, e))?;
        }
        move_dir(&final_dir, &backup, "backup")?;
    }

    move_dir(staged, &final_dir, "publish")?;

    // Best-effort: a leftover backup is cleaned by the next reconciliation.
    let _ = fs::remove_dir_all(&backup);
    Ok(())
}

/// Move a partition directory, preferring a single rename. Falls back to a
/// recursive copy (marker written last) when the rename fails, e.g. across
/// filesystems.
fn move_dir(src: &Path, dst: &Path, stage: &'static str) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| KdbError::store(stage, parent, e))?;
    }
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            copy_dir_marker_last(src, dst, stage)?;
            fs::remove_dir_all(src).map_err(|e| KdbError::store(stage, src, e))?;
            Ok(())
        }
    }
}

fn copy_dir_marker_last(src: &Path, dst: &Path, stage: &'static str) -> Result<()> {
    fs::create_dir_all(dst).map_err(|e| KdbError::store(stage, dst, e))?;
    let entries = fs::read_dir(src).map_err(|e| KdbError::store(stage, src, e))?;
    let mut marker: Option<PathBuf> = None;
    for entry in entries {
        let entry = entry.map_err(|e| KdbError::store(stage, src, e))?;
        let path = entry.path();
        if entry.file_name() == COMMIT_MARKER {
            marker = Some(path);
            continue;
        }
        fs::copy(&path, dst.join(entry.file_name()))
            .map_err(|e| KdbError::store(stage, &path, e))?;
    }
    if let Some(marker) = marker {
        fs::copy(&marker, dst.join(COMMIT_MARKER))
            .map_err(|e| KdbError::store(stage, &marker, e))?;
    }
    Ok(())
}

/// Read a partition's enrichment stage from its commit marker.
///
/// `None` means the partition does not exist (or is torn and will be removed
/// by reconciliation).
pub fn partition_stage(layout: &StoreLayout, table: Table, date: TradeDate) -> Option<PartitionStage> {
    let dir = table.partition_dir(layout, date);
    if !dir.join(DATA_FILE).exists() {
        return None;
    }
    let body = fs::read_to_string(dir.join(COMMIT_MARKER)).ok()?;
    PartitionStage::parse(&body)
}

/// Eagerly read one partition's file, optionally projecting columns.
pub fn read_partition(
    layout: &StoreLayout,
    table: Table,
    date: TradeDate,
    columns: Option<&[&str]>,
) -> Result<DataFrame> {
    let dir = table.partition_dir(layout, date);
    let path = dir.join(DATA_FILE);
    let file = fs::File::open(&path).map_err(|e| KdbError::corruption(&dir, e))?;
    let mut reader = ParquetReader::new(file);
    if let Some(cols) = columns {
        reader = reader.with_columns(Some(cols.iter().map(|c| c.to_string()).collect()));
    }
    reader.finish().map_err(|e| KdbError::corruption(&dir, e))
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Backups moved back into place because the foreground was missing.
    pub restored: usize,
    /// Leftover backups deleted.
    pub dropped_backups: usize,
    /// Staged partitions discarded.
    pub cleaned_staging: usize,
    /// Unmarked (torn) foreground partitions removed.
    pub removed_torn: usize,
}

/// Bring the store back to a coherent state after a crash.
///
/// Must run before any writes; the orchestrator calls it on every startup.
pub fn reconcile(layout: &StoreLayout) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    for table in ALL_TABLES {
        // Torn foreground partitions first, so a backup can take their place
        for date in list_partition_dirs(&table.root(layout))? {
            let dir = table.partition_dir(layout, date);
            if partition_stage(layout, table, date).is_none() {
                fs::remove_dir_all(&dir).map_err(|e| KdbError::store("reconcile", &dir, e))?;
                report.removed_torn += 1;
            }
        }

        let backup_root = if table.mirror().is_empty() {
            layout.backup_root()
        } else {
            layout.backup_root().join(table.mirror())
        };
        for date in list_partition_dirs(&backup_root)? {
            let backup = table.backup_dir(layout, date);
            let final_dir = table.partition_dir(layout, date);
            if final_dir.exists() {
                fs::remove_dir_all(&backup)
                    .map_err(|e| KdbError::store("reconcile", &backup, e))?;
                report.dropped_backups += 1;
            } else {
                move_dir(&backup, &final_dir, "reconcile")?;
                report.restored += 1;
            }
        }

        let staging_root = if table.mirror().is_empty() {
            layout.staging_root()
        } else {
            layout.staging_root().join(table.mirror())
        };
        for date in list_partition_dirs(&staging_root)? {
            let staged = table.staging_dir(layout, date);
            fs::remove_dir_all(&staged)
                .map_err(|e| KdbError::store("reconcile", &staged, e))?;
            report.cleaned_staging += 1;
        }
    }

    Ok(report)
}

/// Dates of `TRD_DD=` directories directly under `root`, sorted ascending.
/// Anything else (other tables, the lockfile) is skipped.
pub(crate) fn list_partition_dirs(root: &Path) -> Result<Vec<TradeDate>> {
    let mut dates = Vec::new();
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dates),
        Err(e) => return Err(KdbError::store("list", root, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| KdbError::store("list", root, e))?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(date) = entry
            .file_name()
            .to_str()
            .and_then(TradeDate::from_partition_name)
        {
            dates.push(date);
        }
    }
    dates.sort();
    Ok(dates)
}

pub(crate) use list_partition_dirs as partition_dates_under;
