#[path = "support/mod.rs"]
mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ipcman_core::ScanError;
use ipcman_core::catalog::{Catalog, MemoryCatalog, ScanLockId};
use ipcman_core::model::{DeviceId, ScanCursor, TimeRange};
use ipcman_core::rpc::{Session, SessionOptions};
use ipcman_core::scan::{ScanEngine, ScanOptions, ScanPlan};
use ipcman_core::worker::{DeviceActor, DeviceHandle};
use ipcman_core::{CatalogError, model::ConnectionDescriptor};
use support::{DeviceFile, FakeDevice, descriptor};
use tokio_util::sync::CancellationToken;

struct Harness {
    device: Arc<FakeDevice>,
    handle: DeviceHandle,
    catalog: Arc<MemoryCatalog>,
    engine: ScanEngine,
    descriptor: ConnectionDescriptor,
    _shutdown: tokio_util::sync::DropGuard,
}

fn harness(files: Vec<DeviceFile>) -> Harness {
    harness_with(
        files,
        ScanOptions {
            volatile_window: Duration::ZERO,
            ..ScanOptions::default()
        },
    )
}

fn harness_with(files: Vec<DeviceFile>, options: ScanOptions) -> Harness {
    let descriptor = descriptor(1);
    let device = Arc::new(FakeDevice::new(files));
    let session = Session::new(
        descriptor.id,
        device.clone(),
        descriptor.credentials.clone(),
        SessionOptions::default(),
    );
    let shutdown = CancellationToken::new();
    let (handle, _actor) = DeviceActor::spawn(descriptor.id, session, 8, shutdown.clone());

    let catalog = Arc::new(MemoryCatalog::new());
    let engine = ScanEngine::new(catalog.clone(), options);

    Harness {
        device,
        handle,
        catalog,
        engine,
        descriptor,
        _shutdown: shutdown.drop_guard(),
    }
}

fn last_hour_files() -> Vec<DeviceFile> {
    let now = Utc::now();
    vec![
        DeviceFile::video(now - chrono::Duration::minutes(50), 30),
        DeviceFile::picture(now - chrono::Duration::minutes(30)),
        DeviceFile::video(now - chrono::Duration::minutes(10), 30),
    ]
}

#[tokio::test]
async fn quick_scan_of_fresh_device_catalogs_every_file() {
    let h = harness(last_hour_files());
    let cursor = ScanCursor::new(DeviceId(1), Utc::now(), chrono::Duration::hours(1));
    h.catalog.save_scan_cursor(&cursor).await.unwrap();

    let report = h
        .engine
        .scan(&h.handle, &h.descriptor, ScanPlan::Quick, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.inserted, 3);
    assert_eq!(report.deleted, 0);
    assert_eq!(h.catalog.file_records(DeviceId(1)).await.len(), 3);

    let range = report.range.unwrap();
    let saved = h.catalog.get_scan_cursor(DeviceId(1)).await.unwrap().unwrap();
    assert_eq!(saved.quick_watermark, range.end);
    assert!(!saved.in_progress);
    assert_eq!(saved.percent, 100.0);

    assert_eq!(h.catalog.scan_lock_owner(DeviceId(1)).await, None);
    assert_eq!(h.device.open_finders(), 0);
}

#[tokio::test]
async fn quick_watermark_lags_behind_the_volatile_window() {
    let h = harness_with(last_hour_files(), ScanOptions::default());
    let window = chrono::Duration::hours(8);
    let cursor = ScanCursor::new(DeviceId(1), Utc::now(), chrono::Duration::hours(10));
    h.catalog.save_scan_cursor(&cursor).await.unwrap();

    let report = h
        .engine
        .scan(&h.handle, &h.descriptor, ScanPlan::Quick, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.inserted, 3);

    // Recent files may still change on the device, so the next quick scan
    // revisits the whole window.
    let range = report.range.unwrap();
    let saved = h.catalog.get_scan_cursor(DeviceId(1)).await.unwrap().unwrap();
    assert_eq!(saved.quick_watermark, range.end - window);

    // A cursor already inside the window never moves backward.
    let report = h
        .engine
        .scan(&h.handle, &h.descriptor, ScanPlan::Quick, &CancellationToken::new())
        .await
        .unwrap();
    let range = report.range.unwrap();
    assert_eq!(range.start, saved.quick_watermark);
    let again = h.catalog.get_scan_cursor(DeviceId(1)).await.unwrap().unwrap();
    assert_eq!(again.quick_watermark, range.end - window);
    assert!(again.quick_watermark >= saved.quick_watermark);
}

#[tokio::test]
async fn rescanning_unchanged_listing_is_idempotent() {
    let h = harness(last_hour_files());
    let now = Utc::now();
    let range = TimeRange::new(now - chrono::Duration::hours(2), now).unwrap();
    let cancel = CancellationToken::new();

    let first = h
        .engine
        .scan(&h.handle, &h.descriptor, ScanPlan::Manual(range), &cancel)
        .await
        .unwrap();
    let records = h.catalog.file_records(DeviceId(1)).await;

    let second = h
        .engine
        .scan(&h.handle, &h.descriptor, ScanPlan::Manual(range), &cancel)
        .await
        .unwrap();

    assert_eq!(first.inserted, 3);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 3);
    assert_eq!(second.deleted, 0);

    let again = h.catalog.file_records(DeviceId(1)).await;
    assert_eq!(again.len(), 3);
    let starts = |records: &[ipcman_core::model::FileRecord]| {
        records.iter().map(|r| r.start_time).collect::<Vec<_>>()
    };
    assert_eq!(starts(&records), starts(&again));
}

#[tokio::test]
async fn files_gone_from_device_are_deleted() {
    let files = last_hour_files();
    let h = harness(files.clone());
    let now = Utc::now();
    let range = TimeRange::new(now - chrono::Duration::hours(2), now).unwrap();
    let cancel = CancellationToken::new();

    h.engine
        .scan(&h.handle, &h.descriptor, ScanPlan::Manual(range), &cancel)
        .await
        .unwrap();

    h.device.set_files(vec![files[0].clone(), files[2].clone()]);
    let report = h
        .engine
        .scan(&h.handle, &h.descriptor, ScanPlan::Manual(range), &cancel)
        .await
        .unwrap();

    assert_eq!(report.deleted, 1);
    let remaining: Vec<String> = h
        .catalog
        .file_records(DeviceId(1))
        .await
        .into_iter()
        .map(|r| r.file_path)
        .collect();
    assert_eq!(remaining.len(), 2);
    assert!(!remaining.contains(&files[1].path));
}

#[tokio::test]
async fn held_lock_blocks_a_second_scan() {
    let h = harness(Vec::new());
    h.catalog
        .acquire_scan_lock(DeviceId(1), ScanLockId::new(), chrono::Duration::seconds(60))
        .await
        .unwrap();

    let err = h
        .engine
        .scan(&h.handle, &h.descriptor, ScanPlan::Quick, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::Catalog(CatalogError::LockHeld(_))));
    assert!(h.device.methods().is_empty());
}

#[tokio::test]
async fn full_scan_walks_to_the_epoch_once() {
    let h = harness(last_hour_files());
    let cancel = CancellationToken::new();

    let report = h
        .engine
        .scan(&h.handle, &h.descriptor, ScanPlan::Full, &cancel)
        .await
        .unwrap();
    assert_eq!(report.inserted, 3);
    assert!(report.periods > 1);
    assert_eq!(h.device.open_finders(), 0);

    let cursor = h.engine.cursor(DeviceId(1)).await.unwrap();
    assert!(cursor.full_complete());

    let again = h
        .engine
        .scan(&h.handle, &h.descriptor, ScanPlan::Full, &cancel)
        .await
        .unwrap();
    assert_eq!(again.range, None);
    assert_eq!(again.periods, 0);
}

#[tokio::test]
async fn cancelled_scan_clears_progress_and_lock() {
    let h = harness(last_hour_files());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .engine
        .scan(&h.handle, &h.descriptor, ScanPlan::Full, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::Cancelled));

    let cursor = h.engine.cursor(DeviceId(1)).await.unwrap();
    assert!(!cursor.in_progress);
    assert_eq!(h.catalog.scan_lock_owner(DeviceId(1)).await, None);
}
