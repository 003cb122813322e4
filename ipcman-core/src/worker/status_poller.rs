use std::sync::Arc;
use std::time::Duration;

use ipcman_model::DeviceId;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;
use crate::rpc::codec::RpcClient;
use crate::rpc::modules::coaxial;
use crate::worker::bus::{Notification, NotificationBus};
use crate::worker::supervisor::TaskExit;

/// Polls coaxial light/speaker status and publishes changes.
///
/// Stops for good, without reporting an error, on devices whose caps show no
/// coaxial control.
#[derive(Debug)]
pub struct CoaxialStatusPoller<C = crate::worker::DeviceHandle> {
    device_id: DeviceId,
    client: C,
    bus: Arc<NotificationBus>,
    channel: i64,
    interval: Duration,
}

impl<C: RpcClient> CoaxialStatusPoller<C> {
    pub fn new(
        device_id: DeviceId,
        client: C,
        bus: Arc<NotificationBus>,
        channel: i64,
        interval: Duration,
    ) -> Self {
        Self {
            device_id,
            client,
            bus,
            channel,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    fn publish(&self, status: coaxial::Status) {
        self.bus.publish(Notification::CoaxialStatusChanged {
            device_id: self.device_id,
            channel: self.channel,
            status,
        });
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<TaskExit, WorkerError> {
        let caps = tokio::select! {
            _ = cancel.cancelled() => return Ok(TaskExit::Finished),
            caps = coaxial::probe_caps(&self.client, self.channel) => caps?,
        };
        if !caps.is_some_and(|caps| caps.any_supported()) {
            tracing::debug!(target: "worker::status", device_id = %self.device_id, "coaxial control not supported");
            return Ok(TaskExit::Stop { reason: None });
        }

        let mut last = tokio::select! {
            _ = cancel.cancelled() => return Ok(TaskExit::Finished),
            status = coaxial::get_status(&self.client, self.channel) => status?,
        };
        self.publish(last.clone());

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(TaskExit::Finished),
                _ = ticker.tick() => {}
            }

            let status = tokio::select! {
                _ = cancel.cancelled() => return Ok(TaskExit::Finished),
                status = coaxial::get_status(&self.client, self.channel) => status?,
            };
            if status == last {
                continue;
            }
            tracing::debug!(
                target: "worker::status",
                device_id = %self.device_id,
                white_light = %status.white_light,
                speaker = %status.speaker,
                "coaxial status changed"
            );
            last = status.clone();
            self.publish(status);
        }
    }
}
