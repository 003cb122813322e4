use std::sync::Arc;
use std::time::Duration;

use ipcman_model::DeviceId;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::catalog::{Catalog, ScanLockId};
use crate::error::CatalogError;

/// Held per-device scan lock with a background heartbeat.
#[derive(Debug)]
pub struct ScanLock {
    catalog: Arc<dyn Catalog>,
    device_id: DeviceId,
    owner: ScanLockId,
    stop: CancellationToken,
    lost: CancellationToken,
    heartbeat: Option<JoinHandle<()>>,
}

impl ScanLock {
    pub async fn acquire(
        catalog: Arc<dyn Catalog>,
        device_id: DeviceId,
        stale_after: Duration,
        heartbeat_every: Duration,
    ) -> Result<Self, CatalogError> {
        let owner = ScanLockId::new();
        let stale_after = chrono::Duration::from_std(stale_after)
            .map_err(|err| CatalogError::Backend(err.to_string()))?;
        catalog.acquire_scan_lock(device_id, owner, stale_after).await?;
        tracing::debug!(target: "scan::lock", device_id = %device_id, owner = %owner, "scan lock acquired");

        let stop = CancellationToken::new();
        let lost = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::clone(&catalog),
            device_id,
            owner,
            heartbeat_every,
            stop.clone(),
            lost.clone(),
        ));

        Ok(Self {
            catalog,
            device_id,
            owner,
            stop,
            lost,
            heartbeat: Some(heartbeat),
        })
    }

    pub fn owner(&self) -> ScanLockId {
        self.owner
    }

    /// Set once a heartbeat found the lock taken over by someone else.
    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    pub async fn release(mut self) -> Result<(), CatalogError> {
        self.stop.cancel();
        if let Some(handle) = self.heartbeat.take() {
            let _ = handle.await;
        }
        self.catalog
            .release_scan_lock(self.device_id, self.owner)
            .await?;
        tracing::debug!(target: "scan::lock", device_id = %self.device_id, owner = %self.owner, "scan lock released");
        Ok(())
    }
}

impl Drop for ScanLock {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn heartbeat_loop(
    catalog: Arc<dyn Catalog>,
    device_id: DeviceId,
    owner: ScanLockId,
    every: Duration,
    stop: CancellationToken,
    lost: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match catalog.heartbeat_scan_lock(device_id, owner).await {
            Ok(()) => {}
            Err(CatalogError::LockLost(_)) => {
                tracing::error!(target: "scan::lock", device_id = %device_id, owner = %owner, "scan lock lost");
                lost.cancel();
                return;
            }
            Err(err) => {
                tracing::warn!(target: "scan::lock", device_id = %device_id, error = %err, "scan lock heartbeat failed");
            }
        }
    }
}
