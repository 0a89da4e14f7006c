//! The out-of-process service façade: one async method per verb, shared by
//! the dashboard's axum handlers and the `devrigd-cli` binary (§4.7).
//!
//! Grounded in the teacher's thin `State`-wrapped delegation pattern in
//! `interfaces/http/modules/monitoring/handlers.rs` and in the
//! `ServerHandle`-shaped public surface (`trigger_shutdown`, `is_running`):
//! this struct never embeds an HTTP or CLI type, so both callers share it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use tracing::warn;

use crate::domain::manifest::Manifest;
use crate::domain::ports::inbound::RuntimeDetector;
use crate::domain::ports::outbound::is_safe_project_path;
use crate::domain::registry_entry::{RegistryEntry, Status};
use crate::domain::service::Mode;
use crate::logs::LogManager;
use crate::ops::OperationManager;
use crate::ports::PortManager;
use crate::process::group::{self, KillSignal, ProcessGroup};
use crate::process::{SupervisedProcess, Supervisor};
use crate::registry::ServiceRegistry;
use crate::support::id::is_valid_service_name;
use crate::support::DomainError;

type ProcessTable = Arc<DashMap<String, Arc<AsyncMutex<SupervisedProcess>>>>;

/// Everything the controller needs to turn a verb into an effect. Built
/// once per project by the orchestrator (or the dashboard's binary) and
/// shared behind an `Arc`.
pub struct ServiceController {
    manifest: Manifest,
    registry: Arc<ServiceRegistry>,
    operation_manager: Arc<OperationManager>,
    supervisor: Arc<Supervisor>,
    port_manager: Arc<PortManager>,
    detector: Arc<dyn RuntimeDetector>,
    log_manager: Arc<LogManager>,
    processes: ProcessTable,
    shutdown_grace: Duration,
}

impl ServiceController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manifest: Manifest,
        registry: Arc<ServiceRegistry>,
        operation_manager: Arc<OperationManager>,
        supervisor: Arc<Supervisor>,
        port_manager: Arc<PortManager>,
        detector: Arc<dyn RuntimeDetector>,
        log_manager: Arc<LogManager>,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            manifest,
            registry,
            operation_manager,
            supervisor,
            port_manager,
            detector,
            log_manager,
            processes: Arc::new(DashMap::new()),
            shutdown_grace,
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log_manager
    }

    pub fn list(&self) -> Vec<RegistryEntry> {
        self.registry.list()
    }

    pub fn status(&self, name: &str) -> Option<RegistryEntry> {
        self.registry.get(name)
    }

    /// Starts `name`: validates, rejects a no-op against a live service,
    /// re-invokes the detector, reserves a port, spawns, and registers
    /// `starting` (§4.7).
    pub async fn start(&self, name: &str) -> Result<(), DomainError> {
        self.validate(name)?;

        if let Some(entry) = self.registry.get(name) {
            if entry.status.implies_live_pid() {
                return Err(DomainError::AlreadyRunning(name.to_string()));
            }
        }

        self.operation_manager
            .execute(name, "start", || self.start_inner(name))
            .await
    }

    async fn start_inner(&self, name: &str) -> Result<(), DomainError> {
        let service = self
            .manifest
            .service_for(name)
            .ok_or_else(|| DomainError::NotFound(name.to_string()))?;

        let mut runtime = self.detector.detect(&service).await?;

        let used_so_far: HashSet<u16> = self
            .registry
            .list()
            .into_iter()
            .filter(|e| e.status.implies_live_pid())
            .map(|e| e.port)
            .collect();

        let requested = if runtime.auto_port() {
            None
        } else {
            Some(runtime.port)
        };
        let reservation = self
            .port_manager
            .reserve(name, requested, &used_so_far)
            .await?;
        let port = reservation.port;
        if reservation.manifest_update_suggested {
            info!(service = name, port, "declared port unavailable, reassigned");
        }
        runtime.port = port;

        let supervised = self.supervisor.spawn(name, &runtime).await?;
        let pid = supervised.pid();
        let _ = self.port_manager.record_holder(name, port, pid);

        self.registry.upsert(RegistryEntry {
            name: name.to_string(),
            project_dir: service.workdir.display().to_string(),
            pid,
            port,
            url: Some(format!("http://127.0.0.1:{port}")),
            deployment_url: None,
            language: service.language,
            framework: runtime.framework.clone(),
            status: Status::Starting,
            start_time: Utc::now(),
            last_checked: Utc::now(),
            exit_code: None,
            end_time: None,
            kind: format!("{:?}", runtime.kind).to_lowercase(),
            mode: service.mode,
        })?;

        let handle = Arc::new(AsyncMutex::new(supervised));
        self.processes.insert(name.to_string(), handle.clone());
        self.spawn_exit_monitor(name.to_string(), service.mode, handle);

        info!(service = name, pid, port, "service started");
        Ok(())
    }

    /// Watches a just-spawned child for an exit that nobody asked for
    /// (crash isolation, §4.4 "crash detection"). `stop_inner` already
    /// removes its process-table entry before it waits on the child, so by
    /// the time this monitor's own wait resolves, `remove_if` finding
    /// nothing means the exit was already handled there and this is a
    /// no-op; finding the same handle still present means the process died
    /// on its own and the registry needs updating.
    fn spawn_exit_monitor(&self, name: String, mode: Mode, process: Arc<AsyncMutex<SupervisedProcess>>) {
        let processes = self.processes.clone();
        let registry = self.registry.clone();
        let port_manager = self.port_manager.clone();

        tokio::spawn(async move {
            let child_handle = process.lock().await.child_handle();
            let wait_result = child_handle.lock().await.wait().await;

            let still_current = processes
                .remove_if(&name, |_, v| Arc::ptr_eq(v, &process))
                .is_some();
            if !still_current {
                return;
            }

            let Some(entry) = registry.get(&name) else {
                return;
            };
            if entry.status.is_terminal() {
                return;
            }

            let exit_code = wait_result.ok().and_then(|s| s.code());
            let status = match (mode, exit_code) {
                (Mode::Build, Some(0)) => Status::Built,
                (Mode::Task, Some(0)) => Status::Completed,
                (Mode::Service, Some(0)) => Status::Stopped,
                _ => Status::Error,
            };

            let mut updated = entry;
            updated.status = status;
            updated.exit_code = exit_code;
            updated.end_time = Some(Utc::now());
            updated.last_checked = Utc::now();
            let _ = registry.upsert(updated);
            let _ = port_manager.release(&name);

            if status == Status::Error {
                warn!(service = %name, ?exit_code, "service exited unexpectedly");
            } else {
                info!(service = %name, ?exit_code, "service exited on its own");
            }
        });
    }

    /// Stops `name`: signals its recorded pid (via the in-memory handle if
    /// this process spawned it, or directly against the registry's recorded
    /// pid if this is a different `devrigd` process), then frees its port
    /// (§4.7: "must also free the recorded port ... to handle stale PIDs").
    pub async fn stop(&self, name: &str) -> Result<(), DomainError> {
        self.validate(name)?;

        let entry = self
            .registry
            .get(name)
            .ok_or_else(|| DomainError::NotFound(name.to_string()))?;
        if !entry.status.implies_live_pid() {
            return Err(DomainError::NotRunning(name.to_string()));
        }

        self.operation_manager
            .execute(name, "stop", || self.stop_inner(name, &entry))
            .await
    }

    async fn stop_inner(&self, name: &str, entry: &RegistryEntry) -> Result<(), DomainError> {
        let (exit_code, escalated) = if let Some((_, handle)) = self.processes.remove(name) {
            let mut process = handle.lock().await;
            let outcome = self
                .supervisor
                .stop_graceful(&mut process, self.shutdown_grace)
                .await?;
            (outcome.exit_code, outcome.escalated)
        } else {
            // Stale pid recorded by a previous `devrigd` run: no in-memory
            // handle to wait on, so signal directly and move on.
            let _ = group::platform().kill_group(entry.pid, KillSignal::Graceful);
            (None, false)
        };

        let status = match (entry.mode, exit_code) {
            (Mode::Build, Some(0)) => Status::Built,
            (Mode::Task, Some(0)) => Status::Completed,
            (Mode::Build, _) | (Mode::Task, _) if exit_code.is_some() && exit_code != Some(0) => {
                Status::Error
            }
            _ => Status::Stopped,
        };

        let mut updated = entry.clone();
        updated.status = status;
        updated.exit_code = exit_code;
        updated.end_time = Some(Utc::now());
        updated.last_checked = Utc::now();
        self.registry.upsert(updated)?;

        let _ = self.port_manager.release(name);

        info!(service = name, escalated, "service stopped");
        Ok(())
    }

    /// Stop followed by start, both under the same `restart` single-flight
    /// slot — unlike calling the public `stop`/`start` in sequence, this
    /// holds one lock for the whole operation, so a concurrent `restart` of
    /// the same service fails fast instead of interleaving with this one's
    /// stop/start halves (§4.6, §8 scenario 5).
    pub async fn restart(&self, name: &str) -> Result<(), DomainError> {
        self.validate(name)?;
        self.operation_manager
            .execute(name, "restart", || self.restart_inner(name))
            .await
    }

    async fn restart_inner(&self, name: &str) -> Result<(), DomainError> {
        if let Some(entry) = self.registry.get(name) {
            if entry.status.implies_live_pid() {
                self.stop_inner(name, &entry).await?;
            }
        }
        self.start_inner(name).await
    }

    fn validate(&self, name: &str) -> Result<(), DomainError> {
        if !is_valid_service_name(name) {
            return Err(DomainError::InvalidServiceName(name.to_string()));
        }
        let Some(def) = self.manifest.services.get(name) else {
            return Err(DomainError::NotFound(name.to_string()));
        };
        // §1: "the core needs only ... a path-validation predicate" — applied
        // here, before a manifest-declared `project` path is ever trusted as
        // a child's working directory.
        if !is_safe_project_path(&self.manifest.root, &def.project) {
            return Err(DomainError::Config(format!(
                "service '{name}' declares a project path outside the manifest root"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::manifest::ServiceDef;
    use crate::domain::service::Language;
    use crate::ports::PortManager;
    use crate::registry::ServiceRegistry;
    use std::collections::HashMap;
    use std::time::Duration;

    struct StubDetector;

    #[async_trait::async_trait]
    impl RuntimeDetector for StubDetector {
        async fn detect(&self, _service: &crate::domain::service::Service) -> Result<crate::domain::runtime::Runtime, DomainError> {
            unreachable!("rejected before detection is ever reached")
        }
    }

    fn controller_with_service(root: &std::path::Path, project: &str) -> ServiceController {
        let mut manifest = Manifest {
            root: root.to_path_buf(),
            ..Default::default()
        };
        manifest.services.insert(
            "evil".to_string(),
            ServiceDef {
                project: std::path::PathBuf::from(project),
                language: Some(Language::Other),
                port: None,
                env: HashMap::new(),
                ports: HashMap::new(),
                mode: Mode::Service,
            },
        );
        let log_manager = Arc::new(LogManager::new(root.to_path_buf(), 100, 10, 1024 * 1024));
        let registry = Arc::new(ServiceRegistry::open(root, root).unwrap());
        ServiceController::new(
            manifest,
            registry,
            Arc::new(OperationManager::new()),
            Arc::new(Supervisor::new(log_manager.clone())),
            Arc::new(PortManager::new(root, 30000, 39999, Duration::from_secs(3600))),
            Arc::new(StubDetector),
            log_manager,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn start_rejects_a_project_path_that_escapes_the_manifest_root() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller_with_service(dir.path(), "../../etc");
        let result = controller.start("evil").await;
        assert!(matches!(result, Err(DomainError::Config(_))));
    }

    #[tokio::test]
    async fn validate_accepts_a_path_inside_the_manifest_root() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller_with_service(dir.path(), "services/web");
        assert!(controller.validate("evil").is_ok());
    }
}
