use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ipcman_model::{ConnectionDescriptor, DeviceId};
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::cgi::{CgiClient, EventSource};
use crate::error::{CatalogError, Result, WorkerError};
use crate::rpc::session::SessionOptions;
use crate::rpc::transport::{HttpTransport, Transport};
use crate::scan::{ScanEngine, ScanOptions, ScanPlan, ScanReport};
use crate::worker::WorkerOptions;
use crate::worker::actor::DeviceHandle;
use crate::worker::bus::{DeviceLifecycle, NotificationBus};
use crate::worker::supervisor::{WorkerDeps, WorkerGroup};

/// Opens the wire-level connections of a device.
pub trait DeviceConnector: Send + Sync + fmt::Debug {
    fn transport(&self, device: &ConnectionDescriptor) -> Result<Arc<dyn Transport>>;
    fn event_source(&self, device: &ConnectionDescriptor) -> Result<Arc<dyn EventSource>>;
}

/// Plain HTTP connections shared across devices.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    rpc: reqwest::Client,
    stream: reqwest::Client,
}

impl HttpConnector {
    pub fn new(session: &SessionOptions, worker: &WorkerOptions) -> Result<Self> {
        let rpc = HttpTransport::build_client(session.request_timeout)
            .map_err(|err| WorkerError::HttpClient(err.to_string()))?;
        // Event streams stay open for as long as the device keeps them, so
        // only connecting is bounded.
        let stream = reqwest::Client::builder()
            .connect_timeout(worker.event_connect_timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| WorkerError::HttpClient(err.to_string()))?;
        Ok(Self { rpc, stream })
    }
}

impl DeviceConnector for HttpConnector {
    fn transport(&self, device: &ConnectionDescriptor) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(HttpTransport::new(
            self.rpc.clone(),
            &device.origin(),
        )?))
    }

    fn event_source(&self, device: &ConnectionDescriptor) -> Result<Arc<dyn EventSource>> {
        Ok(Arc::new(CgiClient::new(
            self.stream.clone(),
            device.origin(),
            device.credentials.clone(),
        )))
    }
}

/// One worker group per known device.
///
/// Create, update and delete are serialised on the group map, so a device
/// never has two groups alive at once.
pub struct WorkerDirectory {
    catalog: Arc<dyn Catalog>,
    deps: WorkerDeps,
    groups: Mutex<HashMap<DeviceId, WorkerGroup>>,
    shutdown: CancellationToken,
}

impl fmt::Debug for WorkerDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups = self
            .groups
            .try_lock()
            .map(|groups| groups.len())
            .unwrap_or_default();
        f.debug_struct("WorkerDirectory")
            .field("catalog", &self.catalog)
            .field("groups", &groups)
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl WorkerDirectory {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        bus: Arc<NotificationBus>,
        session: SessionOptions,
        worker: WorkerOptions,
        scan: ScanOptions,
    ) -> Result<Self> {
        let connector = Arc::new(HttpConnector::new(&session, &worker)?);
        Ok(Self::with_connector(
            catalog, bus, connector, session, worker, scan,
        ))
    }

    pub fn with_connector(
        catalog: Arc<dyn Catalog>,
        bus: Arc<NotificationBus>,
        connector: Arc<dyn DeviceConnector>,
        session: SessionOptions,
        worker: WorkerOptions,
        scan: ScanOptions,
    ) -> Self {
        let engine = ScanEngine::new(Arc::clone(&catalog), scan);
        Self {
            catalog,
            deps: WorkerDeps {
                bus,
                engine,
                connector,
                session,
                worker,
            },
            groups: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn bus(&self) -> Arc<NotificationBus> {
        Arc::clone(&self.deps.bus)
    }

    pub fn engine(&self) -> &ScanEngine {
        &self.deps.engine
    }

    pub async fn create(&self, device: ConnectionDescriptor) -> Result<()> {
        let mut groups = self.groups.lock().await;
        if groups.contains_key(&device.id) {
            return Err(WorkerError::AlreadyExists(device.id));
        }
        let id = device.id;
        let group = WorkerGroup::spawn(device, &self.deps, &self.shutdown)?;
        groups.insert(id, group);
        tracing::debug!(target: "worker::directory", device_id = %id, "worker group created");
        Ok(())
    }

    /// Rebuilds the device's group when its descriptor changed, creating it
    /// when missing. Returns whether anything was (re)started.
    pub async fn update(&self, device: ConnectionDescriptor) -> Result<bool> {
        let mut groups = self.groups.lock().await;
        if groups
            .get(&device.id)
            .is_some_and(|group| group.device() == &device)
        {
            return Ok(false);
        }

        let id = device.id;
        if let Some(old) = groups.remove(&id) {
            old.shutdown().await;
        }
        let group = WorkerGroup::spawn(device, &self.deps, &self.shutdown)?;
        groups.insert(id, group);
        tracing::info!(target: "worker::directory", device_id = %id, "worker group restarted");
        Ok(true)
    }

    pub async fn delete(&self, id: DeviceId) -> Result<()> {
        let group = self
            .groups
            .lock()
            .await
            .remove(&id)
            .ok_or(WorkerError::NotFound(id))?;
        group.shutdown().await;
        tracing::debug!(target: "worker::directory", device_id = %id, "worker group deleted");
        Ok(())
    }

    /// Starts a group for every device the catalog knows.
    ///
    /// Every device is attempted; failures are gathered into one
    /// [`WorkerError::Bootstrap`] while the others keep running.
    pub async fn bootstrap(&self) -> Result<()> {
        let devices = self.catalog.list_connection_descriptors().await?;
        let total = devices.len();
        let mut failures = Vec::new();

        for device in devices {
            let id = device.id;
            if let Err(err) = self.update(device).await {
                tracing::error!(target: "worker::directory", device_id = %id, error = %err, "failed to start worker group");
                failures.push((id, err));
            }
        }

        tracing::info!(target: "worker::directory", devices = total, failed = failures.len(), "worker directory bootstrapped");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(WorkerError::Bootstrap { total, failures })
        }
    }

    /// Follows device lifecycle notifications until shutdown.
    pub fn register(self: &Arc<Self>) -> JoinHandle<()> {
        let directory = Arc::clone(self);
        let mut changes = self.deps.bus.subscribe_lifecycle();
        tokio::spawn(async move {
            loop {
                let change = tokio::select! {
                    _ = directory.shutdown.cancelled() => return,
                    change = changes.recv() => change,
                };
                match change {
                    Ok(change) => {
                        if let Err(err) = directory.apply(change).await {
                            tracing::warn!(
                                target: "worker::directory",
                                device_id = %change.device_id(),
                                error = %err,
                                "failed to apply device change"
                            );
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(target: "worker::directory", skipped, "missed device changes, resyncing");
                        if let Err(err) = directory.bootstrap().await {
                            tracing::warn!(target: "worker::directory", error = %err, "resync failed");
                        }
                    }
                    Err(RecvError::Closed) => return,
                }
            }
        })
    }

    async fn apply(&self, change: DeviceLifecycle) -> Result<()> {
        match change {
            DeviceLifecycle::Created(id) | DeviceLifecycle::Updated(id) => {
                match self.catalog.get_connection_descriptor(id).await {
                    Ok(device) => self.update(device).await.map(|_| ()),
                    Err(CatalogError::DeviceNotFound(_)) => self.delete_if_present(id).await,
                    Err(err) => Err(err.into()),
                }
            }
            DeviceLifecycle::Deleted(id) => self.delete_if_present(id).await,
        }
    }

    async fn delete_if_present(&self, id: DeviceId) -> Result<()> {
        match self.delete(id).await {
            Err(WorkerError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    pub async fn handle(&self, id: DeviceId) -> Option<DeviceHandle> {
        self.groups.lock().await.get(&id).map(WorkerGroup::handle)
    }

    /// Lets a device whose login was permanently rejected try again, e.g.
    /// after its account was unlocked on the device itself.
    pub async fn reset_session(&self, id: DeviceId) -> Result<()> {
        let handle = self.handle(id).await.ok_or(WorkerError::NotFound(id))?;
        handle.reset().await?;
        tracing::info!(target: "worker::directory", device_id = %id, "session reset");
        Ok(())
    }

    pub async fn device_ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.groups.lock().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Runs a scan through the device's worker.
    pub async fn scan(
        &self,
        id: DeviceId,
        plan: ScanPlan,
        cancel: &CancellationToken,
    ) -> Result<ScanReport> {
        let (handle, device) = {
            let groups = self.groups.lock().await;
            let group = groups.get(&id).ok_or(WorkerError::NotFound(id))?;
            (group.handle(), group.device().clone())
        };
        Ok(self
            .deps
            .engine
            .scan(&handle, &device, plan, cancel)
            .await?)
    }

    /// Stops every group and waits for their sessions to log out.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let groups: Vec<WorkerGroup> = self
            .groups
            .lock()
            .await
            .drain()
            .map(|(_, group)| group)
            .collect();
        let count = groups.len();
        for group in groups {
            group.shutdown().await;
        }
        tracing::info!(target: "worker::directory", groups = count, "worker directory stopped");
    }
}
