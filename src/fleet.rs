//! Process-level fleet management: the tenant registry, session
//! initialization, the dispatcher task and graceful shutdown.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use tokio::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::{Config, TenantConfig};
use crate::dispatcher::OutboundDispatcher;
use crate::error::GatewayResult;
use crate::kafka::{EventPublisher, OutputConsumer};
use crate::policy::PolicyLookup;
use crate::supervisor::{LogoutCallback, SessionSupervisor};
use crate::transport::{DeviceIdentity, TransportFactory};

/// Tenant registry: bare recruiter id to session supervisor. All access goes
/// through the readers-writer lock; reads hand out clones, never the live
/// map.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<HashMap<String, Arc<SessionSupervisor>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tenant_id: &str) -> Option<Arc<SessionSupervisor>> {
        self.inner.read().unwrap().get(tenant_id).cloned()
    }

    pub fn contains(&self, tenant_id: &str) -> bool {
        self.inner.read().unwrap().contains_key(tenant_id)
    }

    pub fn insert(&self, tenant_id: String, supervisor: Arc<SessionSupervisor>) {
        self.inner.write().unwrap().insert(tenant_id, supervisor);
    }

    pub fn remove(&self, tenant_id: &str) -> Option<Arc<SessionSupervisor>> {
        self.inner.write().unwrap().remove(tenant_id)
    }

    /// Snapshot copy of the registry contents.
    pub fn snapshot(&self) -> HashMap<String, Arc<SessionSupervisor>> {
        self.inner.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }
}

/// Owns the registry and the process lifecycle: builds one supervisor per
/// enabled tenant, runs the outbound dispatcher, and tears everything down
/// on SIGINT/SIGTERM.
pub struct FleetManager {
    config: Arc<Config>,
    registry: Arc<Registry>,
    publisher: Arc<dyn EventPublisher>,
    policy: Arc<dyn PolicyLookup>,
    factory: Arc<dyn TransportFactory>,
    shutdown_tx: watch::Sender<bool>,
}

impl FleetManager {
    pub fn new(
        config: Arc<Config>,
        publisher: Arc<dyn EventPublisher>,
        policy: Arc<dyn PolicyLookup>,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            registry: Arc::new(Registry::new()),
            publisher,
            policy,
            factory,
            shutdown_tx,
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Initialize sessions, start the dispatcher, then block until a
    /// termination signal arrives and unwind in order: cancel the consumer
    /// loop, disconnect every supervisor, clear the QR directory.
    pub async fn run(&self, consumer: OutputConsumer) -> GatewayResult<()> {
        info!("Starting fleet manager");

        self.init_all_sessions().await?;

        let dispatcher = OutboundDispatcher::new(
            consumer,
            Arc::clone(&self.registry),
            Arc::clone(&self.publisher),
            self.shutdown_tx.subscribe(),
        );
        let dispatcher_handle = tokio::spawn(dispatcher.run());

        info!("Fleet manager started, waiting for shutdown signal");
        wait_for_signal().await?;
        info!("Shutdown signal received, cleaning up...");

        let _ = self.shutdown_tx.send(true);
        self.disconnect_all().await;
        let _ = dispatcher_handle.await;

        clear_qr_dir(Path::new(&self.config.logger.file_path));

        info!("Fleet manager stopped successfully");
        Ok(())
    }

    /// Construct and connect a supervisor for every enabled tenant.
    /// Initialization aborts on the first connect failure.
    pub async fn init_all_sessions(&self) -> GatewayResult<()> {
        info!(
            recruiter_count = self.config.whatsapp.len(),
            "Initializing all tenant sessions"
        );

        let devices = self.factory.stored_devices().await?;

        for tenant in &self.config.whatsapp {
            if !tenant.enable {
                continue;
            }
            if let Err(e) = self.init_session(tenant, &devices).await {
                error!(
                    recruiter = %tenant.recruiter_id,
                    error = %e,
                    "Failed to initialize client"
                );
                return Err(e);
            }
        }

        info!("All tenant sessions initialized successfully");
        Ok(())
    }

    /// Initialize one tenant session unless it is already registered.
    pub async fn init_session(
        &self,
        tenant: &TenantConfig,
        devices: &[DeviceIdentity],
    ) -> GatewayResult<()> {
        if self.registry.contains(&tenant.recruiter_id) {
            info!(
                recruiter = %tenant.recruiter_id,
                "Client already exists, skipping initialization"
            );
            return Ok(());
        }

        // The supervisor deregisters itself through this callback; the weak
        // reference keeps the registry free of ownership cycles.
        let registry = Arc::downgrade(&self.registry);
        let on_logout: LogoutCallback = Arc::new(move |tenant_id: &str| {
            if let Some(registry) = registry.upgrade() {
                registry.remove(tenant_id);
                info!(recruiter = %tenant_id, "Client removed from fleet after logout");
            }
        });

        let supervisor = Arc::new(SessionSupervisor::new(
            tenant.clone(),
            Path::new(&self.config.logger.file_path).to_path_buf(),
            Arc::clone(&self.publisher),
            Arc::clone(&self.policy),
            on_logout,
        ));

        supervisor.clone().connect(&self.factory, devices).await?;
        self.registry
            .insert(tenant.recruiter_id.clone(), supervisor);
        info!(recruiter = %tenant.recruiter_id, "Client initialized successfully");
        Ok(())
    }

    /// Snapshot of all registered supervisors.
    pub fn all_supervisors(&self) -> HashMap<String, Arc<SessionSupervisor>> {
        self.registry.snapshot()
    }

    pub async fn disconnect_all(&self) {
        info!("Disconnecting all tenant sessions");
        for (tenant_id, supervisor) in self.registry.snapshot() {
            supervisor.disconnect().await;
            info!(recruiter = %tenant_id, "Client disconnected");
        }
    }

    /// Request shutdown without a process signal (used by tests and embedded
    /// runs).
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}

async fn wait_for_signal() -> GatewayResult<()> {
    let mut terminate = signal::unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
    Ok(())
}

/// Remove stale QR pairing files; codes are single-use and must not survive
/// the process.
fn clear_qr_dir(logs_dir: &Path) {
    let qr_dir = logs_dir.join("qr");
    let Ok(entries) = std::fs::read_dir(&qr_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        if let Err(e) = result {
            error!(path = %path.display(), error = %e, "Failed to remove QR log entry");
        }
    }
}
