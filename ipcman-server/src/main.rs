use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ipcman_config::{ConfigLoad, ConfigLoader, IpcmanConfig};
use ipcman_core::catalog::MemoryCatalog;
use ipcman_core::WorkerError;
use ipcman_core::scan::ScanPlan;
use ipcman_core::worker::{Notification, NotificationBus, WorkerDirectory};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "ipcmand")]
#[command(about = "Keeps sessions, events and file listings of network video devices")]
struct Cli {
    /// Configuration file (TOML or JSON); overrides the default search
    #[arg(short, long, env = "IPCMAN_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Run a full scan of every configured device after startup
    #[arg(long, default_value_t = false)]
    full_scan: bool,

    /// Run a reverse scan of every configured device after startup
    #[arg(long, default_value_t = false, conflicts_with = "full_scan")]
    reverse_scan: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rpc=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let ConfigLoad { config, source } = load_config(&cli)?;
    info!(source = %source, devices = config.devices.len(), "configuration loaded");

    let catalog = Arc::new(MemoryCatalog::new());
    seed_catalog(&catalog, &config).await?;

    let bus = Arc::new(NotificationBus::new(config.worker.notification_capacity));
    let directory = Arc::new(
        WorkerDirectory::new(
            catalog,
            Arc::clone(&bus),
            config.session_options(),
            config.worker_options(),
            config.scan_options(),
        )
        .context("failed to build worker directory")?,
    );

    let shutdown = CancellationToken::new();
    let logger = spawn_notification_logger(&bus, shutdown.clone());
    let follower = directory.register();

    match directory.bootstrap().await {
        Ok(()) => {}
        Err(WorkerError::Bootstrap { total, failures }) => {
            for (device_id, err) in &failures {
                warn!(device_id = %device_id, error = %err, "device failed to start");
            }
            warn!(failed = failures.len(), total, "some devices failed to start");
        }
        Err(err) => return Err(err).context("failed to bootstrap worker directory"),
    }
    info!(workers = directory.device_ids().await.len(), "ipcmand running");

    let initial_scans = match (cli.full_scan, cli.reverse_scan) {
        (true, _) => Some(spawn_initial_scans(&directory, ScanPlan::Full, &shutdown).await),
        (_, true) => Some(spawn_initial_scans(&directory, ScanPlan::Reverse, &shutdown).await),
        _ => None,
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    shutdown.cancel();
    if let Some(scans) = initial_scans {
        let _ = scans.await;
    }
    directory.shutdown().await;
    let _ = follower.await;
    let _ = logger.await;

    info!("ipcmand stopped");
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<ConfigLoad> {
    let loader = match &cli.config {
        Some(path) => ConfigLoader::from_env().with_path(path),
        None => ConfigLoader::from_env(),
    };
    loader.load().context("failed to load configuration")
}

async fn seed_catalog(catalog: &MemoryCatalog, config: &IpcmanConfig) -> anyhow::Result<()> {
    for device in &config.devices {
        let descriptor = device
            .descriptor()
            .with_context(|| format!("device {} is misconfigured", device.id))?;
        debug!(device_id = %descriptor.id, origin = %descriptor.origin(), "device seeded");
        catalog.put_device(descriptor).await;
    }
    Ok(())
}

fn spawn_notification_logger(
    bus: &NotificationBus,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let mut notifications = bus.subscribe();
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => return,
                received = notifications.recv() => received,
            };
            match received {
                Ok(notification) => log_notification(&notification),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification log fell behind");
                }
                Err(RecvError::Closed) => return,
            }
        }
    })
}

fn log_notification(notification: &Notification) {
    match notification {
        Notification::WorkerConnecting { device_id, kind } => {
            debug!(device_id = %device_id, worker = %kind, "worker connecting");
        }
        Notification::WorkerConnected { device_id, kind } => {
            info!(device_id = %device_id, worker = %kind, "worker connected");
        }
        Notification::WorkerDisconnected {
            device_id,
            kind,
            error: Some(error),
        } => {
            warn!(device_id = %device_id, worker = %kind, error = %error, "worker disconnected");
        }
        Notification::WorkerDisconnected {
            device_id,
            kind,
            error: None,
        } => {
            info!(device_id = %device_id, worker = %kind, "worker disconnected");
        }
        Notification::EventReceived { device_id, event } => {
            debug!(
                device_id = %device_id,
                code = %event.code,
                action = %event.action,
                index = event.index,
                "device event"
            );
        }
        Notification::CoaxialStatusChanged {
            device_id,
            channel,
            status,
        } => {
            info!(device_id = %device_id, channel, status = ?status, "coaxial status changed");
        }
        Notification::ScanCompleted { report } => {
            info!(
                device_id = %report.device_id,
                scan_type = ?report.scan_type,
                periods = report.periods,
                inserted = report.inserted,
                updated = report.updated,
                deleted = report.deleted,
                skipped = report.skipped,
                "scan completed"
            );
        }
    }
}

/// Runs one scan per running device in sequence, stopping early on shutdown.
async fn spawn_initial_scans(
    directory: &Arc<WorkerDirectory>,
    plan: ScanPlan,
    shutdown: &CancellationToken,
) -> JoinHandle<()> {
    let ids = directory.device_ids().await;
    let directory = Arc::clone(directory);
    let cancel = shutdown.child_token();
    tokio::spawn(async move {
        for id in ids {
            if cancel.is_cancelled() {
                return;
            }
            match directory.scan(id, plan, &cancel).await {
                Ok(report) => {
                    info!(device_id = %id, upserted = report.upserted(), deleted = report.deleted, "initial scan finished");
                }
                Err(err) => error!(device_id = %id, error = %err, "initial scan failed"),
            }
        }
    })
}
