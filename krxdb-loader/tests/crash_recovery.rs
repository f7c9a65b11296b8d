//! Crash-point recovery: whatever state an interrupted rewrite left behind,
//! the next prepare restores a coherent store and queries see only whole
//! partitions.

use std::fs;

use krxdb_core::date::TradeDate;
use krxdb_core::store::{partition_stage, PartitionStage, StoreLock, Table, COMMIT_MARKER, DATA_FILE};
use krxdb_loader::fetch::fixture_record;
use krxdb_loader::{DataLoader, FixtureFetcher, GetOptions, LoaderConfig};
use tempfile::TempDir;

fn temp_store() -> (TempDir, LoaderConfig) {
    let dir = tempfile::tempdir().unwrap();
    let config = LoaderConfig::new(dir.path().join("krx_db"))
        .with_ephemeral_root(dir.path().join("temp"));
    (dir, config)
}

fn d(s: &str) -> TradeDate {
    TradeDate::parse(s).unwrap()
}

fn two_day_fetcher() -> FixtureFetcher {
    FixtureFetcher::new()
        .with_day(
            d("20240102"),
            vec![fixture_record("005930", "삼성전자", 71_000, 72_000, 100, 7_200_000)],
        )
        .with_day(
            d("20240103"),
            vec![fixture_record("005930", "삼성전자", 72_000, 72_500, 100, 7_250_000)],
        )
}

fn close_values(loader: &DataLoader) -> Vec<Option<i64>> {
    let wide = loader.get("close", &GetOptions::default()).unwrap();
    let col = wide.column("005930").unwrap();
    let col = col.i64().unwrap();
    (0..wide.height()).map(|i| col.get(i)).collect()
}

#[test]
fn staging_debris_is_discarded_and_the_date_ingested_fresh() {
    let (_dir, config) = temp_store();
    let layout = config.layout();

    // Crash between staging and publish: staged dir exists, no partition
    let staged = Table::Snapshots.staging_dir(&layout, d("20240102"));
    fs::create_dir_all(&staged).unwrap();
    fs::write(staged.join(DATA_FILE), b"half-written").unwrap();

    let fetcher = two_day_fetcher();
    let loader = DataLoader::open(&config, &fetcher, d("20240102"), d("20240103")).unwrap();

    assert!(!staged.exists());
    assert_eq!(
        loader.prepare_summary().ingested,
        vec![d("20240102"), d("20240103")]
    );
    assert_eq!(close_values(&loader), vec![Some(72_000), Some(72_500)]);
}

#[test]
fn displaced_backup_is_restored_without_refetching() {
    let (_dir, config) = temp_store();
    let layout = config.layout();
    let fetcher = two_day_fetcher();

    // A clean first run
    {
        let _ = DataLoader::open(&config, &fetcher, d("20240102"), d("20240103")).unwrap();
    }
    let fetches = fetcher.fetch_count();

    // Crash between backup move-aside and publish: foreground gone
    let final_dir = Table::Snapshots.partition_dir(&layout, d("20240103"));
    let backup = Table::Snapshots.backup_dir(&layout, d("20240103"));
    fs::create_dir_all(backup.parent().unwrap()).unwrap();
    fs::rename(&final_dir, &backup).unwrap();

    let loader = DataLoader::open(&config, &fetcher, d("20240102"), d("20240103")).unwrap();

    // The backup came back with its enrichment intact, so ingest skipped it
    assert!(loader.prepare_summary().ingested.is_empty());
    assert_eq!(
        partition_stage(&layout, Table::Snapshots, d("20240103")),
        Some(PartitionStage::Ranked)
    );
    assert_eq!(close_values(&loader), vec![Some(72_000), Some(72_500)]);
    // Only the calendar gaps hit the fetcher again (both trading partitions present)
    assert_eq!(fetcher.fetch_count(), fetches);
}

#[test]
fn torn_partition_is_removed_and_reingested() {
    let (_dir, config) = temp_store();
    let layout = config.layout();
    let fetcher = two_day_fetcher();

    {
        let _ = DataLoader::open(&config, &fetcher, d("20240102"), d("20240103")).unwrap();
    }

    // Crash mid copy-fallback: data file replaced, marker never written
    let final_dir = Table::Snapshots.partition_dir(&layout, d("20240102"));
    fs::remove_file(final_dir.join(COMMIT_MARKER)).unwrap();
    fs::write(final_dir.join(DATA_FILE), b"torn").unwrap();

    let loader = DataLoader::open(&config, &fetcher, d("20240102"), d("20240103")).unwrap();

    // The torn directory was dropped and the date fetched again
    assert_eq!(loader.prepare_summary().ingested, vec![d("20240102")]);
    assert_eq!(close_values(&loader), vec![Some(72_000), Some(72_500)]);
}

#[test]
fn leftover_backup_is_deleted_when_foreground_is_healthy() {
    let (_dir, config) = temp_store();
    let layout = config.layout();
    let fetcher = two_day_fetcher();

    {
        let _ = DataLoader::open(&config, &fetcher, d("20240102"), d("20240103")).unwrap();
    }

    // Crash between publish and backup cleanup
    let backup = Table::Snapshots.backup_dir(&layout, d("20240102"));
    fs::create_dir_all(&backup).unwrap();
    fs::write(backup.join(DATA_FILE), b"stale previous version").unwrap();
    fs::write(backup.join(COMMIT_MARKER), "raw").unwrap();

    let loader = DataLoader::open(&config, &fetcher, d("20240102"), d("20240103")).unwrap();

    assert!(!backup.exists());
    assert_eq!(close_values(&loader), vec![Some(72_000), Some(72_500)]);
}

#[cfg(target_os = "linux")]
#[test]
fn stale_lock_from_a_dead_writer_is_broken() {
    let (_dir, config) = temp_store();
    let layout = config.layout();
    fs::create_dir_all(&layout.db_root).unwrap();
    fs::write(
        layout.lock_path(),
        // No such pid on any reasonable system
        format!("{{\"pid\":{},\"started_at\":\"2024-01-01T00:00:00+09:00\"}}", u32::MAX),
    )
    .unwrap();

    let fetcher = two_day_fetcher();
    let loader = DataLoader::open(&config, &fetcher, d("20240102"), d("20240103")).unwrap();
    assert!(loader.prepare_summary().is_clean());
}

#[test]
fn live_lock_fails_fast_with_busy() {
    let (_dir, config) = temp_store();
    let layout = config.layout();

    let _held = match StoreLock::try_acquire(&layout).unwrap() {
        krxdb_core::store::LockState::Acquired(lock) => lock,
        other => panic!("expected acquisition, got {other:?}"),
    };

    let fetcher = two_day_fetcher();
    let err = DataLoader::open(&config, &fetcher, d("20240102"), d("20240103")).unwrap_err();
    assert!(matches!(err, krxdb_core::error::KdbError::Busy { .. }));
}
