pub mod device;

use std::collections::HashSet;
use std::time::Duration;

use ipcman_core::rpc::SessionOptions;
use ipcman_core::scan::ScanOptions;
use ipcman_core::worker::WorkerOptions;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub use device::DeviceConfig;

/// Top-level daemon configuration. Every field has a default, so an empty
/// file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IpcmanConfig {
    pub session: SessionConfig,
    pub worker: WorkerConfig,
    pub scan: ScanConfig,
    /// Devices seeded into the catalog at startup.
    pub devices: Vec<DeviceConfig>,
}

impl IpcmanConfig {
    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid("worker.mailbox_capacity must be at least 1".into()));
        }
        if self.worker.notification_capacity == 0 {
            return Err(ConfigError::Invalid(
                "worker.notification_capacity must be at least 1".into(),
            ));
        }
        if self.worker.restart_backoff_min_ms > self.worker.restart_backoff_max_ms {
            return Err(ConfigError::Invalid(
                "worker.restart_backoff_min_ms exceeds restart_backoff_max_ms".into(),
            ));
        }
        if self.scan.max_period_secs == 0 {
            return Err(ConfigError::Invalid("scan.max_period_secs must be positive".into()));
        }
        if self.scan.batch_size <= 0 {
            return Err(ConfigError::Invalid("scan.batch_size must be positive".into()));
        }
        if self.scan.lock_heartbeat_secs >= self.scan.lock_stale_secs {
            return Err(ConfigError::Invalid(
                "scan.lock_heartbeat_secs must be shorter than scan.lock_stale_secs".into(),
            ));
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.id) {
                return Err(ConfigError::DuplicateDevice(device.id));
            }
            device.descriptor()?;
        }
        Ok(())
    }

    pub fn session_options(&self) -> SessionOptions {
        self.session.options()
    }

    pub fn worker_options(&self) -> WorkerOptions {
        self.worker.options()
    }

    pub fn scan_options(&self) -> ScanOptions {
        self.scan.options()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time after which the next call is preceded by a keepalive.
    pub keepalive_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub logout_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let defaults = SessionOptions::default();
        Self {
            keepalive_interval_secs: defaults.keepalive_interval.as_secs(),
            request_timeout_secs: defaults.request_timeout.as_secs(),
            logout_timeout_secs: defaults.logout_timeout.as_secs(),
        }
    }
}

impl SessionConfig {
    pub fn options(&self) -> SessionOptions {
        SessionOptions {
            keepalive_interval: Duration::from_secs(self.keepalive_interval_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            logout_timeout: Duration::from_secs(self.logout_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Queued RPC requests per device before callers wait to enqueue.
    pub mailbox_capacity: usize,
    /// Buffered notifications per subscriber before slow ones start lagging.
    pub notification_capacity: usize,
    pub status_poll_interval_ms: u64,
    pub status_channel: i64,
    pub restart_backoff_min_ms: u64,
    pub restart_backoff_max_ms: u64,
    /// 0 keeps the device's own heartbeat.
    pub event_heartbeat_secs: u64,
    pub event_connect_timeout_secs: u64,
    pub quick_scan_debounce_secs: u64,
    pub quick_scan_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let defaults = WorkerOptions::default();
        Self {
            mailbox_capacity: defaults.mailbox_capacity,
            notification_capacity: 256,
            status_poll_interval_ms: millis(defaults.status_poll_interval),
            status_channel: defaults.status_channel,
            restart_backoff_min_ms: millis(defaults.restart_backoff_min),
            restart_backoff_max_ms: millis(defaults.restart_backoff_max),
            event_heartbeat_secs: defaults.event_heartbeat,
            event_connect_timeout_secs: defaults.event_connect_timeout.as_secs(),
            quick_scan_debounce_secs: defaults.quick_scan_debounce.as_secs(),
            quick_scan_interval_secs: defaults.quick_scan_interval.as_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn options(&self) -> WorkerOptions {
        WorkerOptions {
            mailbox_capacity: self.mailbox_capacity,
            status_poll_interval: Duration::from_millis(self.status_poll_interval_ms),
            status_channel: self.status_channel,
            restart_backoff_min: Duration::from_millis(self.restart_backoff_min_ms),
            restart_backoff_max: Duration::from_millis(self.restart_backoff_max_ms),
            event_heartbeat: self.event_heartbeat_secs,
            event_connect_timeout: Duration::from_secs(self.event_connect_timeout_secs),
            quick_scan_debounce: Duration::from_secs(self.quick_scan_debounce_secs),
            quick_scan_interval: Duration::from_secs(self.quick_scan_interval_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Longest span asked of the device in one listing query.
    pub max_period_secs: u64,
    /// Recent span quick scans keep revisiting.
    pub volatile_window_secs: u64,
    /// Reverse scans extend this far on each side of the oldest file.
    /// Unset means half of `max_period_secs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverse_half_span_secs: Option<u64>,
    pub batch_size: i64,
    pub lock_stale_secs: u64,
    pub lock_heartbeat_secs: u64,
    pub close_timeout_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let defaults = ScanOptions::default();
        Self {
            max_period_secs: defaults.max_period.as_secs(),
            volatile_window_secs: defaults.volatile_window.as_secs(),
            reverse_half_span_secs: None,
            batch_size: defaults.batch_size,
            lock_stale_secs: defaults.lock_stale_after.as_secs(),
            lock_heartbeat_secs: defaults.lock_heartbeat.as_secs(),
            close_timeout_secs: defaults.close_timeout.as_secs(),
        }
    }
}

impl ScanConfig {
    pub fn options(&self) -> ScanOptions {
        let max_period = Duration::from_secs(self.max_period_secs);
        ScanOptions {
            max_period,
            volatile_window: Duration::from_secs(self.volatile_window_secs),
            reverse_half_span: self
                .reverse_half_span_secs
                .map(Duration::from_secs)
                .unwrap_or(max_period / 2),
            batch_size: self.batch_size,
            lock_stale_after: Duration::from_secs(self.lock_stale_secs),
            lock_heartbeat: Duration::from_secs(self.lock_heartbeat_secs),
            close_timeout: Duration::from_secs(self.close_timeout_secs),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
