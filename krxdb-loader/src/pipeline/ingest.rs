//! Stage S1 — ingest one day's snapshot.

use krxdb_core::date::TradeDate;
use krxdb_core::error::Result;
use krxdb_core::snapshot::{decode_record, rows_to_dataframe, SnapshotRow};
use krxdb_core::store::{partition_stage, write_partition, PartitionStage, StoreLayout, Table};

use crate::fetch::SnapshotFetcher;

/// What happened for one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A partition was fetched, decoded, and published.
    Written(usize),
    /// A committed partition already exists and `force` was not set.
    AlreadyPresent,
    /// The upstream returned zero records; no partition is created.
    NonTrading,
}

/// Fetch, decode, and persist one trading date.
///
/// A schema violation in any record aborts the whole date, since a partial
/// cross-section would poison every downstream ranking.
pub fn ingest_day(
    layout: &StoreLayout,
    fetcher: &dyn SnapshotFetcher,
    date: TradeDate,
    force: bool,
) -> Result<IngestOutcome> {
    if !force && partition_stage(layout, Table::Snapshots, date).is_some() {
        return Ok(IngestOutcome::AlreadyPresent);
    }

    let records = fetcher.fetch_day(date)?;
    if records.is_empty() {
        return Ok(IngestOutcome::NonTrading);
    }

    let rows: Vec<SnapshotRow> = records
        .iter()
        .map(decode_record)
        .collect::<Result<Vec<_>>>()?;

    let mut df = rows_to_dataframe(&rows)?;
    let written = write_partition(layout, Table::Snapshots, date, &mut df, PartitionStage::Raw)?;
    Ok(IngestOutcome::Written(written))
}
