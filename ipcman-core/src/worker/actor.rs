use async_trait::async_trait;
use ipcman_model::DeviceId;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::RpcError;
use crate::rpc::codec::{Response, RpcClient, RpcRequest};
use crate::rpc::session::{Session, SessionStatus};

type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
enum DeviceCommand {
    Call {
        request: RpcRequest,
        reply: Reply<Result<Response<Value>, RpcError>>,
    },
    Status {
        reply: Reply<SessionStatus>,
    },
    /// Clears a retained permanent login error so the next call logs in again.
    Reset {
        reply: Reply<()>,
    },
}

impl DeviceCommand {
    fn is_abandoned(&self) -> bool {
        match self {
            DeviceCommand::Call { reply, .. } => reply.is_closed(),
            DeviceCommand::Status { reply } => reply.is_closed(),
            DeviceCommand::Reset { reply } => reply.is_closed(),
        }
    }
}

/// Cloneable mailbox address of a device actor.
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    device_id: DeviceId,
    tx: mpsc::Sender<DeviceCommand>,
}

impl DeviceHandle {
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> DeviceCommand,
    ) -> Result<T, RpcError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| RpcError::WorkerClosed)?;
        rx.await.map_err(|_| RpcError::WorkerClosed)
    }

    pub async fn status(&self) -> Result<SessionStatus, RpcError> {
        self.request(|reply| DeviceCommand::Status { reply }).await
    }

    pub async fn reset(&self) -> Result<(), RpcError> {
        self.request(|reply| DeviceCommand::Reset { reply }).await
    }

    /// Like [`RpcClient::call`] but gives up waiting once `cancel` fires.
    ///
    /// A call the actor already dispatched still completes on the wire; only
    /// this caller stops waiting for it.
    pub async fn call_with_cancel(
        &self,
        request: RpcRequest,
        cancel: &CancellationToken,
    ) -> Result<Response<Value>, RpcError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RpcError::Cancelled),
            result = self.call(request) => result,
        }
    }
}

#[async_trait]
impl RpcClient for DeviceHandle {
    async fn call(&self, request: RpcRequest) -> Result<Response<Value>, RpcError> {
        self.request(|reply| DeviceCommand::Call { request, reply })
            .await?
    }
}

/// Sole owner of a device session. Serves its mailbox one request at a time.
#[derive(Debug)]
pub struct DeviceActor {
    session: Session,
    rx: mpsc::Receiver<DeviceCommand>,
    shutdown: CancellationToken,
    device_id: DeviceId,
}

impl DeviceActor {
    /// Spawns the actor; it runs until `shutdown` fires or every handle is
    /// dropped, then logs out.
    pub fn spawn(
        device_id: DeviceId,
        session: Session,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> (DeviceHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let actor = Self {
            session,
            rx,
            shutdown,
            device_id,
        };
        let task = tokio::spawn(actor.run());
        (DeviceHandle { device_id, tx }, task)
    }

    async fn run(mut self) {
        tracing::debug!(target: "worker::actor", device_id = %self.device_id, "device actor started");

        loop {
            let command = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            if command.is_abandoned() {
                tracing::trace!(target: "worker::actor", device_id = %self.device_id, "skipping abandoned request");
                continue;
            }

            match command {
                DeviceCommand::Call { request, reply } => {
                    let method = request.method.clone();
                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => {
                            let _ = reply.send(Err(RpcError::WorkerClosed));
                            break;
                        }
                        result = self.session.call(request) => {
                            if let Err(err) = &result {
                                tracing::debug!(
                                    target: "worker::actor",
                                    device_id = %self.device_id,
                                    method = %method,
                                    error = %err,
                                    "rpc call failed"
                                );
                            }
                            let _ = reply.send(result);
                        }
                    }
                }
                DeviceCommand::Status { reply } => {
                    let _ = reply.send(self.session.status());
                }
                DeviceCommand::Reset { reply } => {
                    self.session.reset();
                    let _ = reply.send(());
                }
            }
        }

        self.rx.close();
        if let Err(err) = self.session.close().await {
            tracing::warn!(target: "worker::actor", device_id = %self.device_id, error = %err, "logout failed");
        }
        tracing::debug!(target: "worker::actor", device_id = %self.device_id, "device actor stopped");
    }
}
