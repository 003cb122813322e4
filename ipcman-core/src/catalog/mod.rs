//! Storage operations the core needs from the device catalog.

mod memory;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ipcman_model::{ConnectionDescriptor, DeviceId, FileRecord, ScanCursor, TimeRange};
use uuid::Uuid;

use crate::error::CatalogError;

pub use memory::MemoryCatalog;

/// Identifies one holder of a device scan lock.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ScanLockId(pub Uuid);

impl Default for ScanLockId {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanLockId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for ScanLockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[async_trait]
pub trait Catalog: Send + Sync + fmt::Debug {
    async fn get_connection_descriptor(
        &self,
        device_id: DeviceId,
    ) -> Result<ConnectionDescriptor, CatalogError>;

    async fn list_connection_descriptors(&self) -> Result<Vec<ConnectionDescriptor>, CatalogError>;

    /// Inserts or replaces the record keyed by `(device_id, file_path)`.
    async fn upsert_file_record(&self, record: FileRecord) -> Result<UpsertOutcome, CatalogError>;

    /// Deletes the device's records whose start time falls in `range` and
    /// whose `updated_at` is older than `except_touched_since`.
    async fn delete_file_records(
        &self,
        device_id: DeviceId,
        range: TimeRange,
        except_touched_since: DateTime<Utc>,
    ) -> Result<u64, CatalogError>;

    async fn oldest_file_time(
        &self,
        device_id: DeviceId,
    ) -> Result<Option<DateTime<Utc>>, CatalogError>;

    async fn get_scan_cursor(&self, device_id: DeviceId) -> Result<Option<ScanCursor>, CatalogError>;

    async fn save_scan_cursor(&self, cursor: &ScanCursor) -> Result<(), CatalogError>;

    /// Takes the lock, or reclaims it when the current holder's heartbeat is
    /// older than `stale_after`. Fails with [`CatalogError::LockHeld`]
    /// otherwise.
    async fn acquire_scan_lock(
        &self,
        device_id: DeviceId,
        owner: ScanLockId,
        stale_after: Duration,
    ) -> Result<(), CatalogError>;

    /// Fails with [`CatalogError::LockLost`] when `owner` no longer holds it.
    async fn heartbeat_scan_lock(
        &self,
        device_id: DeviceId,
        owner: ScanLockId,
    ) -> Result<(), CatalogError>;

    /// No-op when `owner` does not hold the lock.
    async fn release_scan_lock(
        &self,
        device_id: DeviceId,
        owner: ScanLockId,
    ) -> Result<(), CatalogError>;
}
