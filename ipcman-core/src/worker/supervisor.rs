use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ipcman_model::{ConnectionDescriptor, DeviceFeature, DeviceId};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;
use crate::rpc::session::{Session, SessionOptions};
use crate::scan::ScanEngine;
use crate::worker::actor::{DeviceActor, DeviceHandle};
use crate::worker::bus::{Notification, NotificationBus};
use crate::worker::directory::DeviceConnector;
use crate::worker::event_worker::EventWorker;
use crate::worker::quick_scan::QuickScanWorker;
use crate::worker::status_poller::CoaxialStatusPoller;
use crate::worker::WorkerOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Rpc,
    Event,
    CoaxialStatus,
    QuickScan,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Rpc => "rpc",
            TaskKind::Event => "event",
            TaskKind::CoaxialStatus => "coaxial_status",
            TaskKind::QuickScan => "quick_scan",
        }
    }

    /// Whether a run counts as connected from the start, as opposed to
    /// announcing the connection itself once its upstream is up.
    pub fn connects_immediately(&self) -> bool {
        !matches!(self, TaskKind::Event)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a sub-worker run ended without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExit {
    /// The run ended on its own or was cancelled; restart unless the group is
    /// shutting down.
    Finished,
    /// Never run again. `reason` is reported on the disconnect notification.
    Stop { reason: Option<String> },
}

/// Sub-workers a group supervises.
#[derive(Debug)]
pub enum DeviceTask {
    Event(EventWorker),
    CoaxialStatus(CoaxialStatusPoller),
    QuickScan(QuickScanWorker),
}

impl DeviceTask {
    pub fn kind(&self) -> TaskKind {
        match self {
            DeviceTask::Event(_) => TaskKind::Event,
            DeviceTask::CoaxialStatus(_) => TaskKind::CoaxialStatus,
            DeviceTask::QuickScan(_) => TaskKind::QuickScan,
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<TaskExit, WorkerError> {
        match self {
            DeviceTask::Event(worker) => worker.run(cancel).await,
            DeviceTask::CoaxialStatus(worker) => worker.run(cancel).await,
            DeviceTask::QuickScan(worker) => worker.run(cancel).await,
        }
    }
}

/// Exponential restart delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.max(Duration::from_millis(1));
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

/// Everything a worker group needs besides its device.
#[derive(Debug, Clone)]
pub struct WorkerDeps {
    pub bus: Arc<NotificationBus>,
    pub engine: ScanEngine,
    pub connector: Arc<dyn DeviceConnector>,
    pub session: SessionOptions,
    pub worker: WorkerOptions,
}

/// One device's actor plus its supervised sub-workers.
///
/// Dropping the group cancels everything without waiting; prefer
/// [`WorkerGroup::shutdown`] so the session gets logged out.
#[derive(Debug)]
pub struct WorkerGroup {
    device: ConnectionDescriptor,
    handle: DeviceHandle,
    bus: Arc<NotificationBus>,
    cancel: CancellationToken,
    actor: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    pub fn spawn(
        device: ConnectionDescriptor,
        deps: &WorkerDeps,
        parent: &CancellationToken,
    ) -> Result<Self, WorkerError> {
        let transport = deps.connector.transport(&device)?;
        let events = deps.connector.event_source(&device)?;
        let cancel = parent.child_token();

        let session = Session::new(
            device.id,
            transport,
            device.credentials.clone(),
            deps.session,
        );
        let (handle, actor) = DeviceActor::spawn(
            device.id,
            session,
            deps.worker.mailbox_capacity,
            cancel.clone(),
        );
        deps.bus.publish(Notification::WorkerConnected {
            device_id: device.id,
            kind: TaskKind::Rpc,
        });

        let mut workers = vec![
            DeviceTask::Event(EventWorker::new(
                device.id,
                events,
                Arc::clone(&deps.bus),
                deps.worker.event_heartbeat,
            )),
            DeviceTask::QuickScan(QuickScanWorker::new(
                device.clone(),
                handle.clone(),
                deps.engine.clone(),
                Arc::clone(&deps.bus),
                deps.worker.quick_scan_interval,
                deps.worker.quick_scan_debounce,
            )),
        ];
        if device.features.contains(DeviceFeature::CAMERA) {
            workers.push(DeviceTask::CoaxialStatus(CoaxialStatusPoller::new(
                device.id,
                handle.clone(),
                Arc::clone(&deps.bus),
                deps.worker.status_channel,
                deps.worker.status_poll_interval,
            )));
        }

        let backoff = Backoff::new(
            deps.worker.restart_backoff_min,
            deps.worker.restart_backoff_max,
        );
        let tasks = workers
            .into_iter()
            .map(|task| {
                tokio::spawn(supervise(
                    task,
                    device.id,
                    Arc::clone(&deps.bus),
                    backoff,
                    cancel.clone(),
                ))
            })
            .collect();

        tracing::info!(target: "worker::supervisor", device_id = %device.id, "worker group started");
        Ok(Self {
            device,
            handle,
            bus: Arc::clone(&deps.bus),
            cancel,
            actor: Some(actor),
            tasks,
        })
    }

    pub fn device(&self) -> &ConnectionDescriptor {
        &self.device
    }

    pub fn handle(&self) -> DeviceHandle {
        self.handle.clone()
    }

    /// Stops every sub-worker, then lets the actor log out.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
        if let Some(actor) = self.actor.take() {
            if let Err(err) = actor.await {
                tracing::error!(target: "worker::supervisor", device_id = %self.device.id, error = %err, "device actor panicked");
            }
        }
        self.bus.publish(Notification::WorkerDisconnected {
            device_id: self.device.id,
            kind: TaskKind::Rpc,
            error: None,
        });
        tracing::info!(target: "worker::supervisor", device_id = %self.device.id, "worker group stopped");
    }
}

impl Drop for WorkerGroup {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Runs `task` until it stops permanently or `cancel` fires, restarting it
/// with backoff after every other exit.
pub async fn supervise(
    task: DeviceTask,
    device_id: DeviceId,
    bus: Arc<NotificationBus>,
    mut backoff: Backoff,
    cancel: CancellationToken,
) {
    let kind = task.kind();
    loop {
        if cancel.is_cancelled() {
            return;
        }

        if kind.connects_immediately() {
            bus.publish(Notification::WorkerConnected { device_id, kind });
        } else {
            bus.publish(Notification::WorkerConnecting { device_id, kind });
        }

        let started = Instant::now();
        let outcome = task.run(&cancel).await;
        let error = match &outcome {
            Ok(TaskExit::Finished) => None,
            Ok(TaskExit::Stop { reason }) => reason.clone(),
            Err(err) => Some(err.to_string()),
        };
        bus.publish(Notification::WorkerDisconnected {
            device_id,
            kind,
            error,
        });

        if cancel.is_cancelled() {
            return;
        }

        match outcome {
            Ok(TaskExit::Stop { reason }) => {
                tracing::info!(
                    target: "worker::supervisor",
                    device_id = %device_id,
                    kind = %kind,
                    reason = reason.as_deref().unwrap_or("unsupported"),
                    "worker stopped permanently"
                );
                return;
            }
            Ok(TaskExit::Finished) => {
                tracing::debug!(target: "worker::supervisor", device_id = %device_id, kind = %kind, "worker finished, restarting");
            }
            Err(err) => {
                tracing::warn!(
                    target: "worker::supervisor",
                    device_id = %device_id,
                    kind = %kind,
                    error = %err,
                    "worker failed, restarting"
                );
            }
        }

        if started.elapsed() >= backoff.max() {
            backoff.reset();
        }
        let delay = backoff.next_delay();
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
