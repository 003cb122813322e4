use std::sync::Arc;
use std::time::Duration;

use ipcman_model::ConnectionDescriptor;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{CatalogError, ScanError, WorkerError};
use crate::rpc::codec::RpcClient;
use crate::scan::{ScanEngine, ScanPlan};
use crate::worker::bus::{Notification, NotificationBus};
use crate::worker::supervisor::TaskExit;

/// Device event code announcing a freshly written recording or snapshot.
pub const NEW_FILE_CODE: &str = "NewFile";

/// Keeps the recent end of a device's file listing in the catalog.
///
/// Scans on start, on a fixed interval, and shortly after the device reports
/// new files. Bursts of new-file events within the debounce window collapse
/// into one scan.
#[derive(Debug)]
pub struct QuickScanWorker<C = crate::worker::DeviceHandle> {
    device: ConnectionDescriptor,
    client: C,
    engine: ScanEngine,
    bus: Arc<NotificationBus>,
    interval: Duration,
    debounce: Duration,
}

impl<C: RpcClient> QuickScanWorker<C> {
    pub fn new(
        device: ConnectionDescriptor,
        client: C,
        engine: ScanEngine,
        bus: Arc<NotificationBus>,
        interval: Duration,
        debounce: Duration,
    ) -> Self {
        Self {
            device,
            client,
            engine,
            bus,
            interval: interval.max(Duration::from_millis(1)),
            debounce,
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<TaskExit, WorkerError> {
        let mut events = self.bus.subscribe();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut due: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(TaskExit::Finished),
                _ = ticker.tick() => {
                    due = None;
                    self.scan(cancel).await?;
                }
                _ = tokio::time::sleep_until(due.unwrap_or_else(Instant::now)), if due.is_some() => {
                    due = None;
                    self.scan(cancel).await?;
                }
                received = events.recv() => match received {
                    Ok(Notification::EventReceived { device_id, event })
                        if device_id == self.device.id && event.code == NEW_FILE_CODE =>
                    {
                        due.get_or_insert_with(|| Instant::now() + self.debounce);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(target: "scan::engine", device_id = %self.device.id, skipped, "missed notifications, scheduling scan");
                        due.get_or_insert_with(|| Instant::now() + self.debounce);
                    }
                    Err(RecvError::Closed) => return Ok(TaskExit::Finished),
                },
            }
        }
    }

    async fn scan(&self, cancel: &CancellationToken) -> Result<(), WorkerError> {
        match self
            .engine
            .scan(&self.client, &self.device, ScanPlan::Quick, cancel)
            .await
        {
            Ok(report) => {
                self.bus.publish(Notification::ScanCompleted { report });
                Ok(())
            }
            Err(ScanError::Catalog(CatalogError::LockHeld(_))) => {
                tracing::debug!(target: "scan::engine", device_id = %self.device.id, "scan already running, skipping quick scan");
                Ok(())
            }
            Err(ScanError::Cancelled) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
