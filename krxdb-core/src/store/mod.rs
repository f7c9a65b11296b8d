//! Partitioned on-disk store.
//!
//! Layout (all partition keys textual `TRD_DD=YYYYMMDD`):
//!
//! ```text
//! <db_root>/
//!   TRD_DD=YYYYMMDD/            snapshots (one partition per trading date)
//!   universes/TRD_DD=YYYYMMDD/  persistent universe flags
//!   .lock                       advisory writer lock
//! <ephemeral_root>/
//!   cumulative_adjustments/TRD_DD=YYYYMMDD/   per-window multiplier cache
//!   staging/...                 in-flight partition writes (transient)
//!   backup/...                  displaced partitions during rewrite (transient)
//! ```
//!
//! Every partition directory holds one Parquet file plus a commit marker;
//! see [`atomic`] for the write protocol and [`scan`] for reads.

pub mod atomic;
pub mod lock;
pub mod scan;

use std::path::{Path, PathBuf};

use crate::date::TradeDate;

pub use atomic::{
    partition_stage, read_partition, reconcile, write_partition, PartitionStage, ReconcileReport,
    COMMIT_MARKER, DATA_FILE,
};
pub use lock::{LockState, StoreLock};
pub use scan::{discover_partitions, partitions_in_window, scan, ScanOptions};

/// Root paths of one database instance.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    pub db_root: PathBuf,
    pub ephemeral_root: PathBuf,
}

impl StoreLayout {
    pub fn new(db_root: impl Into<PathBuf>, ephemeral_root: impl Into<PathBuf>) -> Self {
        Self {
            db_root: db_root.into(),
            ephemeral_root: ephemeral_root.into(),
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        self.db_root.join(".lock")
    }

    pub fn staging_root(&self) -> PathBuf {
        self.ephemeral_root.join("staging")
    }

    pub fn backup_root(&self) -> PathBuf {
        self.ephemeral_root.join("backup")
    }
}

/// The three partitioned tables the store manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Snapshots,
    Universes,
    /// Ephemeral: valid only for the window of the loader that built it.
    CumulativeAdjustments,
}

pub const ALL_TABLES: [Table; 3] = [
    Table::Snapshots,
    Table::Universes,
    Table::CumulativeAdjustments,
];

impl Table {
    /// Path of this table relative to its database root. The snapshot table
    /// lives directly at the root, so its mirror is empty.
    pub fn mirror(&self) -> &'static str {
        match self {
            Table::Snapshots => "",
            Table::Universes => "universes",
            Table::CumulativeAdjustments => "cumulative_adjustments",
        }
    }

    pub fn root(&self, layout: &StoreLayout) -> PathBuf {
        match self {
            Table::Snapshots => layout.db_root.clone(),
            Table::Universes => layout.db_root.join(self.mirror()),
            Table::CumulativeAdjustments => layout.ephemeral_root.join(self.mirror()),
        }
    }

    pub fn partition_dir(&self, layout: &StoreLayout, date: TradeDate) -> PathBuf {
        self.root(layout).join(date.partition_name())
    }

    fn mirrored(&self, under: &Path, date: TradeDate) -> PathBuf {
        if self.mirror().is_empty() {
            under.join(date.partition_name())
        } else {
            under.join(self.mirror()).join(date.partition_name())
        }
    }

    pub fn staging_dir(&self, layout: &StoreLayout, date: TradeDate) -> PathBuf {
        self.mirrored(&layout.staging_root(), date)
    }

    pub fn backup_dir(&self, layout: &StoreLayout, date: TradeDate) -> PathBuf {
        self.mirrored(&layout.backup_root(), date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let layout = StoreLayout::new("/data/krx_db", "/data/temp");
        let d = TradeDate::parse("20240102").unwrap();

        assert_eq!(
            Table::Snapshots.partition_dir(&layout, d),
            PathBuf::from("/data/krx_db/TRD_DD=20240102")
        );
        assert_eq!(
            Table::Universes.partition_dir(&layout, d),
            PathBuf::from("/data/krx_db/universes/TRD_DD=20240102")
        );
        assert_eq!(
            Table::CumulativeAdjustments.partition_dir(&layout, d),
            PathBuf::from("/data/temp/cumulative_adjustments/TRD_DD=20240102")
        );
        assert_eq!(
            Table::Snapshots.staging_dir(&layout, d),
            PathBuf::from("/data/temp/staging/TRD_DD=20240102")
        );
        assert_eq!(
            Table::Universes.backup_dir(&layout, d),
            PathBuf::from("/data/temp/backup/universes/TRD_DD=20240102")
        );
        assert_eq!(layout.lock_path(), PathBuf::from("/data/krx_db/.lock"));
    }
}
