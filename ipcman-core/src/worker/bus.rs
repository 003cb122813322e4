use std::fmt;

use ipcman_model::DeviceId;
use tokio::sync::broadcast;

use crate::cgi::DeviceEvent;
use crate::rpc::modules::coaxial;
use crate::scan::ScanReport;
use crate::worker::supervisor::TaskKind;

/// Device rows changing in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceLifecycle {
    Created(DeviceId),
    Updated(DeviceId),
    Deleted(DeviceId),
}

impl DeviceLifecycle {
    pub fn device_id(&self) -> DeviceId {
        match self {
            DeviceLifecycle::Created(id)
            | DeviceLifecycle::Updated(id)
            | DeviceLifecycle::Deleted(id) => *id,
        }
    }
}

/// Domain notifications produced by worker groups.
#[derive(Debug, Clone)]
pub enum Notification {
    WorkerConnecting {
        device_id: DeviceId,
        kind: TaskKind,
    },
    WorkerConnected {
        device_id: DeviceId,
        kind: TaskKind,
    },
    WorkerDisconnected {
        device_id: DeviceId,
        kind: TaskKind,
        error: Option<String>,
    },
    EventReceived {
        device_id: DeviceId,
        event: DeviceEvent,
    },
    CoaxialStatusChanged {
        device_id: DeviceId,
        channel: i64,
        status: coaxial::Status,
    },
    ScanCompleted {
        report: ScanReport,
    },
}

impl Notification {
    pub fn device_id(&self) -> DeviceId {
        match self {
            Notification::WorkerConnecting { device_id, .. }
            | Notification::WorkerConnected { device_id, .. }
            | Notification::WorkerDisconnected { device_id, .. }
            | Notification::EventReceived { device_id, .. }
            | Notification::CoaxialStatusChanged { device_id, .. } => *device_id,
            Notification::ScanCompleted { report } => report.device_id,
        }
    }
}

/// In-process fan-out of lifecycle and worker notifications.
///
/// Sends never fail: with no subscribers the notification is dropped.
pub struct NotificationBus {
    sender: broadcast::Sender<Notification>,
    lifecycle_sender: broadcast::Sender<DeviceLifecycle>,
    capacity: usize,
}

impl fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .field("lifecycle_subscribers", &self.lifecycle_sender.receiver_count())
            .finish()
    }
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        let (lifecycle_sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            lifecycle_sender,
            capacity,
        }
    }

    pub fn publish(&self, notification: Notification) {
        tracing::trace!(target: "worker::bus", ?notification, "publish");
        let _ = self.sender.send(notification);
    }

    pub fn publish_lifecycle(&self, change: DeviceLifecycle) {
        let _ = self.lifecycle_sender.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<DeviceLifecycle> {
        self.lifecycle_sender.subscribe()
    }
}
