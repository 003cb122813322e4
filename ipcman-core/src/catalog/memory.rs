use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ipcman_model::{ConnectionDescriptor, DeviceId, FileRecord, ScanCursor, TimeRange};
use tokio::sync::RwLock;

use super::{Catalog, ScanLockId, UpsertOutcome};
use crate::error::CatalogError;

#[derive(Debug, Clone, Copy)]
struct LockEntry {
    owner: ScanLockId,
    heartbeat_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    devices: BTreeMap<DeviceId, ConnectionDescriptor>,
    files: HashMap<(DeviceId, String), FileRecord>,
    cursors: HashMap<DeviceId, ScanCursor>,
    locks: HashMap<DeviceId, LockEntry>,
}

/// Process-local catalog backed by maps behind one lock.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    inner: RwLock<Inner>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a device snapshot.
    pub async fn put_device(&self, descriptor: ConnectionDescriptor) {
        let mut inner = self.inner.write().await;
        inner.devices.insert(descriptor.id, descriptor);
    }

    /// Drops a device together with its files, cursor and lock.
    pub async fn remove_device(&self, device_id: DeviceId) -> Option<ConnectionDescriptor> {
        let mut inner = self.inner.write().await;
        inner.files.retain(|(id, _), _| *id != device_id);
        inner.cursors.remove(&device_id);
        inner.locks.remove(&device_id);
        inner.devices.remove(&device_id)
    }

    /// Records of one device ordered by start time.
    pub async fn file_records(&self, device_id: DeviceId) -> Vec<FileRecord> {
        let inner = self.inner.read().await;
        let mut records: Vec<FileRecord> = inner
            .files
            .values()
            .filter(|record| record.device_id == device_id)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.start_time);
        records
    }

    pub async fn scan_lock_owner(&self, device_id: DeviceId) -> Option<ScanLockId> {
        let inner = self.inner.read().await;
        inner.locks.get(&device_id).map(|entry| entry.owner)
    }

    /// Moves a lock heartbeat into the past, simulating a crashed holder.
    pub async fn age_scan_lock(&self, device_id: DeviceId, by: Duration) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.locks.get_mut(&device_id) {
            entry.heartbeat_at -= by;
        }
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn get_connection_descriptor(
        &self,
        device_id: DeviceId,
    ) -> Result<ConnectionDescriptor, CatalogError> {
        let inner = self.inner.read().await;
        inner
            .devices
            .get(&device_id)
            .cloned()
            .ok_or(CatalogError::DeviceNotFound(device_id))
    }

    async fn list_connection_descriptors(&self) -> Result<Vec<ConnectionDescriptor>, CatalogError> {
        let inner = self.inner.read().await;
        Ok(inner.devices.values().cloned().collect())
    }

    async fn upsert_file_record(&self, record: FileRecord) -> Result<UpsertOutcome, CatalogError> {
        let mut inner = self.inner.write().await;
        let key = (record.device_id, record.file_path.clone());
        Ok(match inner.files.insert(key, record) {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        })
    }

    async fn delete_file_records(
        &self,
        device_id: DeviceId,
        range: TimeRange,
        except_touched_since: DateTime<Utc>,
    ) -> Result<u64, CatalogError> {
        let mut inner = self.inner.write().await;
        let before = inner.files.len();
        inner.files.retain(|(id, _), record| {
            !(*id == device_id
                && range.contains(record.start_time)
                && record.updated_at < except_touched_since)
        });
        Ok((before - inner.files.len()) as u64)
    }

    async fn oldest_file_time(
        &self,
        device_id: DeviceId,
    ) -> Result<Option<DateTime<Utc>>, CatalogError> {
        let inner = self.inner.read().await;
        Ok(inner
            .files
            .values()
            .filter(|record| record.device_id == device_id)
            .map(|record| record.start_time)
            .min())
    }

    async fn get_scan_cursor(&self, device_id: DeviceId) -> Result<Option<ScanCursor>, CatalogError> {
        let inner = self.inner.read().await;
        Ok(inner.cursors.get(&device_id).cloned())
    }

    async fn save_scan_cursor(&self, cursor: &ScanCursor) -> Result<(), CatalogError> {
        let mut inner = self.inner.write().await;
        inner.cursors.insert(cursor.device_id, cursor.clone());
        Ok(())
    }

    async fn acquire_scan_lock(
        &self,
        device_id: DeviceId,
        owner: ScanLockId,
        stale_after: Duration,
    ) -> Result<(), CatalogError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        if let Some(entry) = inner.locks.get(&device_id)
            && entry.owner != owner
            && now - entry.heartbeat_at <= stale_after
        {
            return Err(CatalogError::LockHeld(device_id));
        }
        inner.locks.insert(
            device_id,
            LockEntry {
                owner,
                heartbeat_at: now,
            },
        );
        Ok(())
    }

    async fn heartbeat_scan_lock(
        &self,
        device_id: DeviceId,
        owner: ScanLockId,
    ) -> Result<(), CatalogError> {
        let mut inner = self.inner.write().await;
        match inner.locks.get_mut(&device_id) {
            Some(entry) if entry.owner == owner => {
                entry.heartbeat_at = Utc::now();
                Ok(())
            }
            _ => Err(CatalogError::LockLost(device_id)),
        }
    }

    async fn release_scan_lock(
        &self,
        device_id: DeviceId,
        owner: ScanLockId,
    ) -> Result<(), CatalogError> {
        let mut inner = self.inner.write().await;
        if inner
            .locks
            .get(&device_id)
            .is_some_and(|entry| entry.owner == owner)
        {
            inner.locks.remove(&device_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use ipcman_model::FileKind;

    use super::*;

    fn record(path: &str, start: DateTime<Utc>, touched: DateTime<Utc>) -> FileRecord {
        FileRecord {
            device_id: DeviceId(1),
            channel: 0,
            start_time: start,
            end_time: start + Duration::seconds(30),
            kind: FileKind::Video,
            file_path: path.into(),
            length: 0,
            duration: 30,
            disk: 0,
            video_stream: String::new(),
            flags: Vec::new(),
            events: Vec::new(),
            cluster: 0,
            partition: 0,
            pic_index: 0,
            repeat: 0,
            work_dir: String::new(),
            work_dir_sn: false,
            local: true,
            updated_at: touched,
        }
    }

    #[tokio::test]
    async fn upsert_is_keyed_by_device_and_path() {
        let catalog = MemoryCatalog::new();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            catalog.upsert_file_record(record("/a.dav", t, t)).await.unwrap(),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            catalog.upsert_file_record(record("/a.dav", t, t)).await.unwrap(),
            UpsertOutcome::Updated
        );
        assert_eq!(catalog.file_records(DeviceId(1)).await.len(), 1);
    }

    #[tokio::test]
    async fn delete_spares_touched_and_out_of_range() {
        let catalog = MemoryCatalog::new();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let scanned_at = t + Duration::days(1);
        let range = TimeRange::new(t, t + Duration::hours(1)).unwrap();

        catalog.upsert_file_record(record("/stale.dav", t, t)).await.unwrap();
        catalog
            .upsert_file_record(record("/fresh.dav", t + Duration::minutes(5), scanned_at))
            .await
            .unwrap();
        catalog
            .upsert_file_record(record("/later.dav", t + Duration::hours(2), t))
            .await
            .unwrap();

        let deleted = catalog
            .delete_file_records(DeviceId(1), range, scanned_at)
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        let left: Vec<String> = catalog
            .file_records(DeviceId(1))
            .await
            .into_iter()
            .map(|r| r.file_path)
            .collect();
        assert_eq!(left, vec!["/fresh.dav".to_string(), "/later.dav".to_string()]);
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_stale() {
        let catalog = MemoryCatalog::new();
        let first = ScanLockId::new();
        let second = ScanLockId::new();
        let stale = Duration::seconds(60);

        catalog.acquire_scan_lock(DeviceId(1), first, stale).await.unwrap();
        assert!(matches!(
            catalog.acquire_scan_lock(DeviceId(1), second, stale).await,
            Err(CatalogError::LockHeld(_))
        ));

        catalog.age_scan_lock(DeviceId(1), Duration::seconds(120)).await;
        catalog.acquire_scan_lock(DeviceId(1), second, stale).await.unwrap();
        assert!(matches!(
            catalog.heartbeat_scan_lock(DeviceId(1), first).await,
            Err(CatalogError::LockLost(_))
        ));

        catalog.release_scan_lock(DeviceId(1), first).await.unwrap();
        assert_eq!(catalog.scan_lock_owner(DeviceId(1)).await, Some(second));
        catalog.release_scan_lock(DeviceId(1), second).await.unwrap();
        assert_eq!(catalog.scan_lock_owner(DeviceId(1)).await, None);
    }
}
