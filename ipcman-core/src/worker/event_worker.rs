use std::sync::Arc;

use ipcman_model::DeviceId;
use tokio_util::sync::CancellationToken;

use crate::cgi::EventSource;
use crate::error::WorkerError;
use crate::worker::bus::{Notification, NotificationBus};
use crate::worker::supervisor::{TaskExit, TaskKind};

/// Relays a device's push events onto the bus.
#[derive(Debug)]
pub struct EventWorker {
    device_id: DeviceId,
    source: Arc<dyn EventSource>,
    bus: Arc<NotificationBus>,
    heartbeat: u64,
}

impl EventWorker {
    pub fn new(
        device_id: DeviceId,
        source: Arc<dyn EventSource>,
        bus: Arc<NotificationBus>,
        heartbeat: u64,
    ) -> Self {
        Self {
            device_id,
            source,
            bus,
            heartbeat,
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<TaskExit, WorkerError> {
        let attached = tokio::select! {
            _ = cancel.cancelled() => return Ok(TaskExit::Finished),
            attached = self.source.attach(self.heartbeat) => attached,
        };
        let mut stream = match attached {
            Ok(stream) => stream,
            Err(err) if err.is_permanent() => {
                tracing::error!(
                    target: "worker::event",
                    device_id = %self.device_id,
                    error = %err,
                    "event stream refused"
                );
                return Ok(TaskExit::Stop {
                    reason: Some(err.to_string()),
                });
            }
            Err(err) => return Err(err.into()),
        };

        self.bus.publish(Notification::WorkerConnected {
            device_id: self.device_id,
            kind: TaskKind::Event,
        });

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(TaskExit::Finished),
                next = stream.next_event() => next?,
            };
            let Some(event) = next else {
                tracing::debug!(target: "worker::event", device_id = %self.device_id, "event stream closed by device");
                return Ok(TaskExit::Finished);
            };

            tracing::debug!(
                target: "worker::event",
                device_id = %self.device_id,
                code = %event.code,
                action = %event.action,
                index = event.index,
                "device event"
            );
            self.bus.publish(Notification::EventReceived {
                device_id: self.device_id,
                event,
            });
        }
    }
}
