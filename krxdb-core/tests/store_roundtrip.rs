//! Store-level integration: partition lifecycle across enrichment stages,
//! multi-row-group symbol pruning, and table coexistence under one root.

use std::sync::atomic::{AtomicU64, Ordering};

use polars::prelude::*;

use krxdb_core::date::TradeDate;
use krxdb_core::snapshot::{self, COL_SYMBOL};
use krxdb_core::store::{
    discover_partitions, partition_stage, read_partition, reconcile, scan, write_partition,
    PartitionStage, ScanOptions, StoreLayout, Table,
};

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_layout() -> StoreLayout {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let root = std::env::temp_dir().join(format!("krxdb_store_{}_{id}", std::process::id()));
    let _ = std::fs::remove_dir_all(&root);
    StoreLayout::new(root.join("db"), root.join("db").join("temp"))
}

fn d(s: &str) -> TradeDate {
    TradeDate::parse(s).unwrap()
}

/// A full-width snapshot partition of `n` symbol-sorted rows.
fn wide_day(n: usize) -> DataFrame {
    let rows: Vec<snapshot::SnapshotRow> = (0..n)
        .map(|i| snapshot::SnapshotRow {
            isu_srt_cd: format!("{i:06}"),
            isu_abbrv: format!("종목{i}"),
            mkt: snapshot::Market::Kospi,
            bas_prc: 10_000,
            tdd_clsprc: 10_000 + i as i64,
            cmpprevdd_prc: i as i64,
            fluc_rt: "0.00".into(),
            fluc_tp: "1".into(),
            acc_trdvol: 1_000,
            acc_trdval: 10_000_000 + i as i64,
        })
        .collect();
    snapshot::rows_to_dataframe(&rows).unwrap()
}

#[test]
fn symbol_filter_is_correct_across_many_row_groups() {
    let layout = temp_layout();
    // 2,500 rows → three row groups at the 1,000-row target
    let mut df = wide_day(2_500);
    write_partition(&layout, Table::Snapshots, d("20240102"), &mut df, PartitionStage::Raw)
        .unwrap();

    // Symbols from the first and last row groups
    let got = scan(
        &layout,
        Table::Snapshots,
        (d("20240101"), d("20240131")),
        &ScanOptions::columns(&["TRD_DD", COL_SYMBOL, "TDD_CLSPRC"])
            .with_symbols(&["000001", "002400"]),
    )
    .unwrap();

    assert_eq!(got.height(), 2);
    let closes = got.column("TDD_CLSPRC").unwrap();
    let closes = closes.i64().unwrap();
    assert_eq!(closes.get(0), Some(10_001));
    assert_eq!(closes.get(1), Some(12_400));
}

#[test]
fn mixed_stage_partitions_share_one_scan() {
    let layout = temp_layout();

    let mut raw = wide_day(3);
    write_partition(&layout, Table::Snapshots, d("20240102"), &mut raw, PartitionStage::Raw)
        .unwrap();

    let mut adjusted = wide_day(3);
    adjusted
        .replace(
            snapshot::COL_ADJ_FACTOR,
            Series::new(snapshot::COL_ADJ_FACTOR.into(), vec![Some(1.0), Some(0.5), None]),
        )
        .unwrap();
    write_partition(
        &layout,
        Table::Snapshots,
        d("20240103"),
        &mut adjusted,
        PartitionStage::Adjusted,
    )
    .unwrap();

    let got = scan(
        &layout,
        Table::Snapshots,
        (d("20240102"), d("20240103")),
        &ScanOptions::columns(&["TRD_DD", COL_SYMBOL, snapshot::COL_ADJ_FACTOR]),
    )
    .unwrap();

    assert_eq!(got.height(), 6);
    let factors = got.column(snapshot::COL_ADJ_FACTOR).unwrap();
    // First day entirely null, second day carries its values
    assert_eq!(factors.null_count(), 4);
}

#[test]
fn tables_coexist_under_the_store_root() {
    let layout = temp_layout();

    let mut snap = wide_day(2);
    write_partition(&layout, Table::Snapshots, d("20240102"), &mut snap, PartitionStage::Raw)
        .unwrap();

    let mut universe = DataFrame::new(vec![
        Column::new(COL_SYMBOL.into(), vec!["000000", "000001"]),
        Column::new("in_top_100".into(), vec![true, false]),
    ])
    .unwrap();
    write_partition(
        &layout,
        Table::Universes,
        d("20240102"),
        &mut universe,
        PartitionStage::Complete,
    )
    .unwrap();

    let mut cum = DataFrame::new(vec![
        Column::new(COL_SYMBOL.into(), vec!["000000"]),
        Column::new(snapshot::COL_CUM_MULTIPLIER.into(), vec![0.02f64]),
    ])
    .unwrap();
    write_partition(
        &layout,
        Table::CumulativeAdjustments,
        d("20240102"),
        &mut cum,
        PartitionStage::Complete,
    )
    .unwrap();

    // The universes/ and temp/ subdirectories are not snapshot partitions
    assert_eq!(
        discover_partitions(&layout, Table::Snapshots).unwrap(),
        vec![d("20240102")]
    );
    assert_eq!(
        discover_partitions(&layout, Table::Universes).unwrap(),
        vec![d("20240102")]
    );
    assert_eq!(
        discover_partitions(&layout, Table::CumulativeAdjustments).unwrap(),
        vec![d("20240102")]
    );

    // Each table round-trips independently
    assert_eq!(
        read_partition(&layout, Table::Universes, d("20240102"), None)
            .unwrap()
            .width(),
        2
    );
    assert_eq!(
        read_partition(&layout, Table::CumulativeAdjustments, d("20240102"), None)
            .unwrap()
            .height(),
        1
    );
}

#[test]
fn reconcile_reports_what_it_fixed() {
    let layout = temp_layout();

    let mut snap = wide_day(1);
    write_partition(&layout, Table::Snapshots, d("20240102"), &mut snap, PartitionStage::Raw)
        .unwrap();

    // Manufacture one of each kind of debris
    let staged = Table::Snapshots.staging_dir(&layout, d("20240103"));
    std::fs::create_dir_all(&staged).unwrap();
    std::fs::write(staged.join("data.parquet"), b"partial").unwrap();

    let backup = Table::Snapshots.backup_dir(&layout, d("20240104"));
    std::fs::create_dir_all(&backup).unwrap();
    let mut displaced = wide_day(1);
    write_partition(&layout, Table::Snapshots, d("20240104"), &mut displaced, PartitionStage::Raw)
        .unwrap();
    let final_dir = Table::Snapshots.partition_dir(&layout, d("20240104"));
    let _ = std::fs::remove_dir_all(&backup);
    std::fs::rename(&final_dir, &backup).unwrap();

    let torn = Table::Snapshots.partition_dir(&layout, d("20240105"));
    std::fs::create_dir_all(&torn).unwrap();
    std::fs::write(torn.join("data.parquet"), b"torn").unwrap();

    let report = reconcile(&layout).unwrap();
    assert_eq!(report.cleaned_staging, 1);
    assert_eq!(report.restored, 1);
    assert_eq!(report.removed_torn, 1);

    // Healthy and restored partitions remain, debris is gone
    assert_eq!(
        discover_partitions(&layout, Table::Snapshots).unwrap(),
        vec![d("20240102"), d("20240104")]
    );
    assert_eq!(
        partition_stage(&layout, Table::Snapshots, d("20240104")),
        Some(PartitionStage::Raw)
    );
    assert!(!staged.exists());
    assert!(!torn.exists());
}
