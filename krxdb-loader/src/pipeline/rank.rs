//! Stage S3 — liquidity rank enrichment.
//!
//! Each date's ranking is a pure function of that date's cross-section, so
//! dates fan out across the rayon pool; every partition is still published
//! by exactly one worker through the atomic pathway.

use std::time::Instant;

use rayon::prelude::*;

use krxdb_core::date::TradeDate;
use krxdb_core::error::{KdbError, Result};
use krxdb_core::events::{ProgressEvent, ProgressSink, Stage};
use krxdb_core::snapshot::{COL_LIQUIDITY_RANK, COL_VALUE};
use krxdb_core::store::{
    partition_stage, partitions_in_window, read_partition, write_partition, PartitionStage,
    StoreLayout, Table,
};
use krxdb_core::transforms::ranking::liquidity_ranks;

/// Rank every adjusted-but-unranked partition in the window.
pub fn enrich_ranks(
    layout: &StoreLayout,
    window: (TradeDate, TradeDate),
    sink: &dyn ProgressSink,
) -> Result<Vec<(TradeDate, usize)>> {
    let targets: Vec<TradeDate> = partitions_in_window(layout, Table::Snapshots, window)?
        .into_iter()
        .filter(|d| {
            partition_stage(layout, Table::Snapshots, *d) == Some(PartitionStage::Adjusted)
        })
        .collect();

    targets
        .par_iter()
        .map(|&date| {
            let started = Instant::now();
            let rows = rank_partition(layout, date)?;
            sink.on_partition(&ProgressEvent {
                stage: Stage::Rank,
                date: Some(date),
                rows,
                elapsed: started.elapsed(),
            });
            Ok((date, rows))
        })
        .collect()
}

fn rank_partition(layout: &StoreLayout, date: TradeDate) -> Result<usize> {
    let mut df = read_partition(layout, Table::Snapshots, date, None)?;

    let traded_value = df
        .column(COL_VALUE)
        .map_err(|e| KdbError::corruption(Table::Snapshots.partition_dir(layout, date), e))?;
    let ranks = liquidity_ranks(traded_value)?;

    df.replace(COL_LIQUIDITY_RANK, ranks.take_materialized_series())
        .map_err(|e| KdbError::corruption(Table::Snapshots.partition_dir(layout, date), e))?;

    write_partition(layout, Table::Snapshots, date, &mut df, PartitionStage::Ranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{fixture_record, FixtureFetcher};
    use crate::pipeline::{adjust::enrich_adjustments, ingest::ingest_day};
    use krxdb_core::events::NullSink;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_layout() -> StoreLayout {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!("krxdb_rank_{}_{id}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        StoreLayout::new(root.join("db"), root.join("temp"))
    }

    fn d(s: &str) -> TradeDate {
        TradeDate::parse(s).unwrap()
    }

    fn seed_one_day(layout: &StoreLayout, values: &[(&str, i64)]) {
        let records = values
            .iter()
            .map(|(sym, value)| fixture_record(sym, "종목", 100, 100, 10, *value))
            .collect();
        let fetcher = FixtureFetcher::new().with_day(d("20240102"), records);
        ingest_day(layout, &fetcher, d("20240102"), false).unwrap();
        enrich_adjustments(layout, d("20240102"), &[d("20240102")], &NullSink).unwrap();
    }

    fn ranks(layout: &StoreLayout) -> Vec<(String, i32)> {
        let df = read_partition(
            layout,
            Table::Snapshots,
            d("20240102"),
            Some(&["ISU_SRT_CD", COL_LIQUIDITY_RANK]),
        )
        .unwrap();
        let syms = df.column("ISU_SRT_CD").unwrap();
        let syms = syms.str().unwrap();
        let ranks = df.column(COL_LIQUIDITY_RANK).unwrap();
        let ranks = ranks.i32().unwrap();
        (0..df.height())
            .map(|i| (syms.get(i).unwrap().to_string(), ranks.get(i).unwrap()))
            .collect()
    }

    #[test]
    fn ranks_are_dense_descending_by_value() {
        let layout = temp_layout();
        seed_one_day(
            &layout,
            &[("000660", 200), ("005930", 900), ("035720", 200), ("068270", 50)],
        );

        let written = enrich_ranks(&layout, (d("20240101"), d("20240131")), &NullSink).unwrap();
        assert_eq!(written, vec![(d("20240102"), 4)]);

        let got = ranks(&layout);
        // rows stay symbol-sorted; ties share rank 2, no gap before rank 3
        assert_eq!(
            got,
            vec![
                ("000660".to_string(), 2),
                ("005930".to_string(), 1),
                ("035720".to_string(), 2),
                ("068270".to_string(), 3),
            ]
        );
        assert_eq!(
            partition_stage(&layout, Table::Snapshots, d("20240102")),
            Some(PartitionStage::Ranked)
        );
    }

    #[test]
    fn halted_symbol_gets_worst_rank() {
        let layout = temp_layout();
        seed_one_day(&layout, &[("000660", 500), ("005930", 900), ("HALT00", 0)]);

        enrich_ranks(&layout, (d("20240101"), d("20240131")), &NullSink).unwrap();
        let got = ranks(&layout);
        assert!(got.contains(&("HALT00".to_string(), 3)));
    }

    #[test]
    fn already_ranked_partitions_are_skipped() {
        let layout = temp_layout();
        seed_one_day(&layout, &[("005930", 900)]);

        enrich_ranks(&layout, (d("20240101"), d("20240131")), &NullSink).unwrap();
        let second = enrich_ranks(&layout, (d("20240101"), d("20240131")), &NullSink).unwrap();
        assert!(second.is_empty());
    }
}
