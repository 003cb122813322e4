//! Per-device worker groups: the RPC actor, its sub-workers, their
//! supervision, and the directory that keeps one group per device.

pub mod actor;
pub mod bus;
pub mod directory;
pub mod event_worker;
pub mod quick_scan;
pub mod status_poller;
pub mod supervisor;

use std::time::Duration;

pub use actor::{DeviceActor, DeviceHandle};
pub use bus::{DeviceLifecycle, Notification, NotificationBus};
pub use directory::{DeviceConnector, HttpConnector, WorkerDirectory};
pub use event_worker::EventWorker;
pub use quick_scan::QuickScanWorker;
pub use status_poller::CoaxialStatusPoller;
pub use supervisor::{Backoff, DeviceTask, TaskExit, TaskKind, WorkerGroup};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    pub mailbox_capacity: usize,
    pub status_poll_interval: Duration,
    pub status_channel: i64,
    pub restart_backoff_min: Duration,
    pub restart_backoff_max: Duration,
    /// Seconds between device heartbeats on the event stream; 0 keeps the
    /// device default.
    pub event_heartbeat: u64,
    /// Connect timeout of the long-lived event stream client.
    pub event_connect_timeout: Duration,
    pub quick_scan_debounce: Duration,
    pub quick_scan_interval: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            mailbox_capacity: 32,
            status_poll_interval: Duration::from_secs(1),
            status_channel: 1,
            restart_backoff_min: Duration::from_secs(1),
            restart_backoff_max: Duration::from_secs(60),
            event_heartbeat: 0,
            event_connect_timeout: Duration::from_secs(10),
            quick_scan_debounce: Duration::from_secs(10),
            quick_scan_interval: Duration::from_secs(30 * 60),
        }
    }
}
