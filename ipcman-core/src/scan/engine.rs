use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ipcman_model::{
    ConnectionDescriptor, DeviceId, FileKind, FileRecord, ScanCursor, ScanType, TimeRange,
};
use tokio_util::sync::CancellationToken;

use crate::catalog::{Catalog, UpsertOutcome};
use crate::error::{CatalogError, ScanError};
use crate::rpc::codec::RpcClient;
use crate::rpc::modules::media_file_find::{Condition, FileInfo};
use crate::rpc::timestamp;
use crate::scan::lock::ScanLock;
use crate::scan::period::PeriodIterator;
use crate::scan::stream::FileStream;
use crate::scan::unique_time::unique_time;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Longest span handed to one device listing query.
    pub max_period: Duration,
    /// Recent span that quick scans keep revisiting because devices may
    /// still be writing into it.
    pub volatile_window: Duration,
    /// Reverse scans cover this much on each side of the oldest known file.
    pub reverse_half_span: Duration,
    pub batch_size: i64,
    pub lock_stale_after: Duration,
    pub lock_heartbeat: Duration,
    pub close_timeout: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        let max_period = Duration::from_secs(30 * 24 * 60 * 60);
        Self {
            max_period,
            volatile_window: Duration::from_secs(8 * 60 * 60),
            reverse_half_span: max_period / 2,
            batch_size: 64,
            lock_stale_after: Duration::from_secs(60),
            lock_heartbeat: Duration::from_secs(15),
            close_timeout: Duration::from_secs(5),
        }
    }
}

fn span(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// What range a scan covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPlan {
    Quick,
    Full,
    Reverse,
    Manual(TimeRange),
}

impl ScanPlan {
    pub fn scan_type(&self) -> ScanType {
        match self {
            ScanPlan::Quick => ScanType::Quick,
            ScanPlan::Full => ScanType::Full,
            ScanPlan::Reverse => ScanType::Reverse,
            ScanPlan::Manual(_) => ScanType::Manual,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub device_id: DeviceId,
    pub scan_type: ScanType,
    /// `None` when there was nothing left to scan.
    pub range: Option<TimeRange>,
    pub periods: u32,
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    /// Listed files whose timestamps could not be parsed.
    pub skipped: u64,
}

impl ScanReport {
    fn new(device_id: DeviceId, scan_type: ScanType, range: Option<TimeRange>) -> Self {
        Self {
            device_id,
            scan_type,
            range,
            periods: 0,
            inserted: 0,
            updated: 0,
            deleted: 0,
            skipped: 0,
        }
    }

    pub fn upserted(&self) -> u64 {
        self.inserted + self.updated
    }
}

#[derive(Debug, Default)]
struct PeriodCounts {
    inserted: u64,
    updated: u64,
    deleted: u64,
    skipped: u64,
}

/// Reconciles device file listings into the catalog.
#[derive(Debug, Clone)]
pub struct ScanEngine {
    catalog: Arc<dyn Catalog>,
    options: ScanOptions,
}

impl ScanEngine {
    pub fn new(catalog: Arc<dyn Catalog>, options: ScanOptions) -> Self {
        Self { catalog, options }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Runs one scan under the device's scan lock.
    pub async fn scan<C>(
        &self,
        client: &C,
        device: &ConnectionDescriptor,
        plan: ScanPlan,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, ScanError>
    where
        C: RpcClient + ?Sized,
    {
        let lock = self.lock(device.id).await?;

        let result = self.run(client, device, plan, cancel, &lock).await;
        if let Err(err) = &result {
            tracing::warn!(
                target: "scan::engine",
                device_id = %device.id,
                scan_type = %plan.scan_type(),
                error = %err,
                "scan failed"
            );
            self.clear_in_progress(device.id).await;
        }

        if let Err(err) = lock.release().await {
            tracing::warn!(target: "scan::lock", device_id = %device.id, error = %err, "failed to release scan lock");
        }
        result
    }

    /// Rewinds a device's cursor as if it had just been onboarded.
    pub async fn reset(&self, device_id: DeviceId) -> Result<ScanCursor, ScanError> {
        let lock = self.lock(device_id).await?;
        let cursor = ScanCursor::new(device_id, Utc::now(), span(self.options.volatile_window));
        let saved = self.catalog.save_scan_cursor(&cursor).await;
        lock.release().await?;
        saved?;
        tracing::info!(target: "scan::engine", device_id = %device_id, "scan cursor reset");
        Ok(cursor)
    }

    /// Stored cursor, creating and persisting a fresh one on first use.
    pub async fn cursor(&self, device_id: DeviceId) -> Result<ScanCursor, ScanError> {
        if let Some(cursor) = self.catalog.get_scan_cursor(device_id).await? {
            return Ok(cursor);
        }
        let cursor = ScanCursor::new(device_id, Utc::now(), span(self.options.volatile_window));
        self.catalog.save_scan_cursor(&cursor).await?;
        Ok(cursor)
    }

    /// Range a plan covers for the given cursor, or `None` when a full scan
    /// has already reached the epoch.
    pub async fn range_for(
        &self,
        cursor: &ScanCursor,
        plan: ScanPlan,
        now: DateTime<Utc>,
    ) -> Result<Option<TimeRange>, ScanError> {
        let range = match plan {
            ScanPlan::Quick => TimeRange::new(cursor.quick_watermark.min(now), now)?,
            ScanPlan::Full => {
                if cursor.full_complete() {
                    return Ok(None);
                }
                TimeRange::new(cursor.full_epoch, cursor.full_watermark)?
            }
            ScanPlan::Reverse => {
                let center = self
                    .catalog
                    .oldest_file_time(cursor.device_id)
                    .await?
                    .unwrap_or(now);
                let half = span(self.options.reverse_half_span);
                let end = (center + half).min(now);
                let start = (center - half).max(cursor.full_epoch).min(end);
                TimeRange::new(start, end)?
            }
            ScanPlan::Manual(range) => range,
        };
        Ok(Some(range))
    }

    async fn lock(&self, device_id: DeviceId) -> Result<ScanLock, ScanError> {
        Ok(ScanLock::acquire(
            Arc::clone(&self.catalog),
            device_id,
            self.options.lock_stale_after,
            self.options.lock_heartbeat,
        )
        .await?)
    }

    async fn run<C>(
        &self,
        client: &C,
        device: &ConnectionDescriptor,
        plan: ScanPlan,
        cancel: &CancellationToken,
        lock: &ScanLock,
    ) -> Result<ScanReport, ScanError>
    where
        C: RpcClient + ?Sized,
    {
        let started = Utc::now();
        let mut cursor = self.cursor(device.id).await?;
        let scan_type = plan.scan_type();

        let Some(range) = self.range_for(&cursor, plan, started).await? else {
            tracing::info!(target: "scan::engine", device_id = %device.id, "full scan already complete");
            return Ok(ScanReport::new(device.id, scan_type, None));
        };

        cursor.in_progress = true;
        cursor.scan_type = Some(scan_type);
        cursor.percent = 0.0;
        cursor.updated_at = started;
        self.catalog.save_scan_cursor(&cursor).await?;

        let mut report = ScanReport::new(device.id, scan_type, Some(range));
        let mut periods = PeriodIterator::new(range, span(self.options.max_period));

        while let Some(period) = periods.next() {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            if lock.is_lost() {
                return Err(CatalogError::LockLost(device.id).into());
            }

            let counts = self.scan_period(client, device, period, cancel).await?;
            report.periods += 1;
            report.inserted += counts.inserted;
            report.updated += counts.updated;
            report.deleted += counts.deleted;
            report.skipped += counts.skipped;

            if plan == ScanPlan::Full {
                cursor.full_watermark = cursor.full_watermark.min(period.start);
            }
            cursor.percent = periods.percent();
            cursor.updated_at = Utc::now();
            self.catalog.save_scan_cursor(&cursor).await?;

            tracing::info!(
                target: "scan::engine",
                device_id = %device.id,
                scan_type = %scan_type,
                period_start = %period.start,
                period_end = %period.end,
                inserted = counts.inserted,
                updated = counts.updated,
                deleted = counts.deleted,
                percent = cursor.percent,
                "scanned period"
            );
        }

        if plan == ScanPlan::Quick {
            let settled = started - span(self.options.volatile_window);
            cursor.quick_watermark = range.end.min(settled).max(range.start);
        }
        cursor.in_progress = false;
        cursor.percent = periods.percent();
        cursor.updated_at = Utc::now();
        self.catalog.save_scan_cursor(&cursor).await?;

        Ok(report)
    }

    async fn scan_period<C>(
        &self,
        client: &C,
        device: &ConnectionDescriptor,
        period: TimeRange,
        cancel: &CancellationToken,
    ) -> Result<PeriodCounts, ScanError>
    where
        C: RpcClient + ?Sized,
    {
        let base = Condition::new(
            timestamp::format(period.start, device.time_zone),
            timestamp::format(period.end, device.time_zone),
        );
        let scanned_at = Utc::now();
        let mut counts = PeriodCounts::default();

        for condition in [base.clone().picture(), base.video()] {
            let mut stream = FileStream::open(
                client,
                &condition,
                self.options.batch_size,
                self.options.close_timeout,
            )
            .await?;
            let drained = self
                .drain(&mut stream, device, scanned_at, cancel, &mut counts)
                .await;
            stream.close().await;
            drained?;
        }

        counts.deleted = self
            .catalog
            .delete_file_records(device.id, period, scanned_at)
            .await?;
        Ok(counts)
    }

    async fn drain<C>(
        &self,
        stream: &mut FileStream<'_, C>,
        device: &ConnectionDescriptor,
        scanned_at: DateTime<Utc>,
        cancel: &CancellationToken,
        counts: &mut PeriodCounts,
    ) -> Result<(), ScanError>
    where
        C: RpcClient + ?Sized,
    {
        loop {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            let Some(batch) = stream.next().await? else {
                return Ok(());
            };

            for info in batch {
                let record = match file_record(device, &info, scanned_at) {
                    Ok(record) => record,
                    Err(err) => {
                        tracing::warn!(
                            target: "scan::engine",
                            device_id = %device.id,
                            file_path = %info.file_path,
                            error = %err,
                            "skipping file with unreadable timestamps"
                        );
                        counts.skipped += 1;
                        continue;
                    }
                };
                match self.catalog.upsert_file_record(record).await? {
                    UpsertOutcome::Inserted => counts.inserted += 1,
                    UpsertOutcome::Updated => counts.updated += 1,
                }
            }
        }
    }

    async fn clear_in_progress(&self, device_id: DeviceId) {
        let Ok(Some(mut cursor)) = self.catalog.get_scan_cursor(device_id).await else {
            return;
        };
        if !cursor.in_progress {
            return;
        }
        cursor.in_progress = false;
        cursor.updated_at = Utc::now();
        if let Err(err) = self.catalog.save_scan_cursor(&cursor).await {
            tracing::warn!(target: "scan::engine", device_id = %device_id, error = %err, "failed to clear in-progress flag");
        }
    }
}

fn file_record(
    device: &ConnectionDescriptor,
    info: &FileInfo,
    scanned_at: DateTime<Utc>,
) -> Result<FileRecord, ScanError> {
    let (start_time, end_time) = unique_time(info, device.seed, device.time_zone)?;
    Ok(FileRecord {
        device_id: device.id,
        channel: info.channel,
        start_time,
        end_time,
        kind: FileKind::from_device_type(&info.kind),
        file_path: info.file_path.clone(),
        length: info.length,
        duration: info.duration,
        disk: info.disk,
        video_stream: info.video_stream.clone(),
        flags: info.flags.clone(),
        events: info.events.clone(),
        cluster: info.cluster,
        partition: info.partition,
        pic_index: info.pic_index,
        repeat: info.repeat,
        work_dir: info.work_dir.clone(),
        work_dir_sn: info.work_dir_sn != 0,
        local: info.local(),
        updated_at: scanned_at,
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use ipcman_model::Credentials;

    use super::*;
    use crate::catalog::MemoryCatalog;

    fn engine() -> (Arc<MemoryCatalog>, ScanEngine) {
        let memory = Arc::new(MemoryCatalog::new());
        let engine = ScanEngine::new(memory.clone(), ScanOptions::default());
        (memory, engine)
    }

    fn cursor_at(now: DateTime<Utc>) -> ScanCursor {
        ScanCursor::new(DeviceId(1), now, chrono::Duration::hours(8))
    }

    #[tokio::test]
    async fn quick_range_runs_from_watermark_to_now() {
        let (_, engine) = engine();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let range = engine
            .range_for(&cursor_at(now), ScanPlan::Quick, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(range.start, now - chrono::Duration::hours(8));
        assert_eq!(range.end, now);
    }

    #[tokio::test]
    async fn full_range_is_none_once_epoch_reached() {
        let (_, engine) = engine();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut cursor = cursor_at(now);
        let range = engine
            .range_for(&cursor, ScanPlan::Full, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(range.start, ipcman_model::scan_epoch());
        assert_eq!(range.end, now);

        cursor.full_watermark = cursor.full_epoch;
        assert!(engine.range_for(&cursor, ScanPlan::Full, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reverse_range_centers_on_oldest_file() {
        let (memory, engine) = engine();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let oldest = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let device = ConnectionDescriptor::new(
            DeviceId(1),
            "http://cam",
            Credentials::new("admin", ""),
            "UTC",
            0,
        )
        .unwrap();
        let info = FileInfo {
            start_time: "2023-01-01 00:00:00".into(),
            end_time: "2023-01-01 00:00:30".into(),
            kind: "xx".into(),
            file_path: "/a.dav".into(),
            ..FileInfo::default()
        };
        let mut record = file_record(&device, &info, now).unwrap();
        record.start_time = oldest;
        memory.upsert_file_record(record).await.unwrap();

        let range = engine
            .range_for(&cursor_at(now), ScanPlan::Reverse, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(range.start, oldest - chrono::Duration::days(15));
        assert_eq!(range.end, oldest + chrono::Duration::days(15));
    }

    #[tokio::test]
    async fn reset_rewinds_cursor() {
        let (_, engine) = engine();
        let mut cursor = engine.cursor(DeviceId(4)).await.unwrap();
        cursor.full_watermark = cursor.full_epoch;
        engine.catalog.save_scan_cursor(&cursor).await.unwrap();

        let reset = engine.reset(DeviceId(4)).await.unwrap();
        assert!(!reset.full_complete());
        assert_eq!(reset.percent, 0.0);
        assert_eq!(engine.cursor(DeviceId(4)).await.unwrap(), reset);
    }
}
