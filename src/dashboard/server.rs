//! Dashboard lifecycle (§4.9): binding an ephemeral loopback port, writing
//! the discovery file other processes find it by, and the two poll-based
//! relay tasks that feed the WebSocket hub from the registry and the log
//! pipeline.
//!
//! Grounded in the teacher's `ServerHandle` shape (`axum::serve(...)
//! .with_graceful_shutdown(...)` spawned once, torn down by a shared
//! `ShutdownSignal`) and its process-wide-singleton-by-key registries
//! (`manager_for`/`registry_for` style lazy `DashMap`/`Mutex<HashMap<...>>`
//! lookups), here keyed by `project_key` the same way `LogManagerRegistry`
//! and `ServiceRegistry::open` are.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::controller::ServiceController;
use crate::discovery::{self, DiscoveryInfo};
use crate::logs::LogManager;
use crate::support::id::project_key;
use crate::support::shutdown::ShutdownSignal;
use crate::support::InfraError;

use super::rest::{self, DashboardState};
use super::ws::WsHub;

/// One running dashboard instance, bound to a single project directory.
pub struct DashboardHandle {
    pub url: String,
    pub pid: u32,
    project_dir: PathBuf,
    shutdown: ShutdownSignal,
    tasks: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl DashboardHandle {
    async fn start(
        project_dir: PathBuf,
        host: &str,
        controller: Arc<ServiceController>,
        log_manager: Arc<LogManager>,
        static_dir: Option<PathBuf>,
    ) -> Result<Arc<Self>, InfraError> {
        let ws_hub = WsHub::new();
        let state = DashboardState {
            controller: controller.clone(),
            log_manager: log_manager.clone(),
            ws_hub: ws_hub.clone(),
            static_dir,
        };
        let app = rest::router(state);

        let listener = tokio::net::TcpListener::bind((host, 0)).await?;
        let addr = listener.local_addr()?;
        let url = format!("http://{addr}");

        let shutdown = ShutdownSignal::new();
        let serve_shutdown = shutdown.clone();
        let serve_task = tokio::spawn(async move {
            let result = axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async move { serve_shutdown.notified().wait().await })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "dashboard server exited with an error");
            }
        });

        let relay_services_task =
            spawn_relay_services(controller.clone(), ws_hub.clone(), shutdown.clone());
        let relay_logs_task = spawn_relay_logs(log_manager.clone(), ws_hub.clone(), shutdown.clone());

        let pid = std::process::id();
        let info = DiscoveryInfo {
            url: url.clone(),
            pid,
            started_at: Utc::now(),
        };
        discovery::write_discovery_file(&project_dir, &info).await?;

        info!(url = %url, project_dir = %project_dir.display(), "dashboard started");

        Ok(Arc::new(Self {
            url,
            pid,
            project_dir,
            shutdown,
            tasks: AsyncMutex::new(vec![serve_task, relay_services_task, relay_logs_task]),
        }))
    }

    /// Triggers graceful shutdown of the HTTP server and both relay tasks,
    /// waits for them to finish, then removes the discovery file. Callers
    /// (§4.8: "the dashboard is the last thing to stop") must only invoke
    /// this after every supervised service has already been stopped.
    pub async fn stop(&self) {
        self.shutdown.trigger();
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        discovery::remove_discovery_file(&self.project_dir).await;
        info!(project_dir = %self.project_dir.display(), "dashboard stopped");
    }
}

/// Diffs the merged service view every tick and only pushes to the hub when
/// something actually changed, so an idle environment doesn't spam every
/// connected client with identical snapshots.
fn spawn_relay_services(
    controller: Arc<ServiceController>,
    hub: Arc<WsHub>,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_snapshot: Option<String> = None;
        let mut ticker = tokio::time::interval(Duration::from_millis(400));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let services = rest::build_service_infos(&controller);
                    if let Ok(json) = serde_json::to_string(&services) {
                        if last_snapshot.as_deref() != Some(json.as_str()) {
                            hub.broadcast_services(services);
                            last_snapshot = Some(json);
                        }
                    }
                }
                _ = shutdown.notified().wait() => {
                    break;
                }
            }
        }
    })
}

/// Polls `LogManager::get_all_buffers` for services whose first log line
/// has created a buffer since the dashboard started, and subscribes to each
/// exactly once. The per-buffer forwarding task ends on its own once the
/// buffer's subscriber sink is closed (service log files don't get torn
/// down mid-run, so in practice this only happens at process exit).
fn spawn_relay_logs(
    log_manager: Arc<LogManager>,
    hub: Arc<WsHub>,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut subscribed: HashSet<String> = HashSet::new();
        let mut ticker = tokio::time::interval(Duration::from_millis(300));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for (name, buffer) in log_manager.get_all_buffers() {
                        if subscribed.insert(name.clone()) {
                            let (_id, sink) = buffer.subscribe();
                            let hub = hub.clone();
                            tokio::spawn(async move {
                                while let Some(entry) = sink.recv().await {
                                    hub.broadcast_log(entry);
                                }
                            });
                        }
                    }
                }
                _ = shutdown.notified().wait() => {
                    break;
                }
            }
        }
    })
}

/// Process-wide, singleton-per-project-directory dashboard registry (§4.9:
/// repeated `devrigctl`/`devrigd` invocations against the same project
/// directory share one dashboard instead of each binding its own port).
pub struct DashboardRegistry {
    dashboards: AsyncMutex<HashMap<String, Arc<DashboardHandle>>>,
}

impl DashboardRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            dashboards: AsyncMutex::new(HashMap::new()),
        })
    }

    pub async fn get_or_start(
        &self,
        project_dir: &Path,
        host: &str,
        controller: Arc<ServiceController>,
        log_manager: Arc<LogManager>,
        static_dir: Option<PathBuf>,
    ) -> Result<Arc<DashboardHandle>, InfraError> {
        let key = project_key(project_dir);
        let mut dashboards = self.dashboards.lock().await;
        if let Some(existing) = dashboards.get(&key) {
            return Ok(existing.clone());
        }
        let handle =
            DashboardHandle::start(project_dir.to_path_buf(), host, controller, log_manager, static_dir)
                .await?;
        dashboards.insert(key, handle.clone());
        Ok(handle)
    }

    pub async fn stop(&self, project_dir: &Path) {
        let key = project_key(project_dir);
        let handle = {
            let mut dashboards = self.dashboards.lock().await;
            dashboards.remove(&key)
        };
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::manifest::Manifest;
    use crate::ops::OperationManager;
    use crate::ports::PortManager;
    use crate::process::Supervisor;
    use crate::registry::ServiceRegistry;
    use std::sync::Arc;

    struct StubDetector;

    #[async_trait::async_trait]
    impl crate::domain::ports::inbound::RuntimeDetector for StubDetector {
        async fn detect(
            &self,
            _service: &crate::domain::service::Service,
        ) -> Result<crate::domain::runtime::Runtime, crate::support::DomainError> {
            unreachable!("not exercised by these tests")
        }
    }

    async fn build_controller(project_dir: &Path) -> Arc<ServiceController> {
        let manifest = Manifest {
            root: project_dir.to_path_buf(),
            ..Default::default()
        };
        let log_manager = Arc::new(LogManager::new(project_dir.to_path_buf(), 100, 10, 1024 * 1024));
        let registry = Arc::new(ServiceRegistry::open(project_dir, project_dir).unwrap());
        Arc::new(ServiceController::new(
            manifest,
            registry,
            Arc::new(OperationManager::new()),
            Arc::new(Supervisor::new(log_manager.clone())),
            Arc::new(PortManager::new(project_dir, 30000, 39999, Duration::from_secs(3600))),
            Arc::new(StubDetector),
            log_manager,
            Duration::from_secs(5),
        ))
    }

    #[tokio::test]
    async fn start_writes_discovery_file_and_stop_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let controller = build_controller(dir.path()).await;
        let log_manager = controller.log_manager().clone();

        let handle = DashboardHandle::start(
            dir.path().to_path_buf(),
            "127.0.0.1",
            controller,
            log_manager,
            None,
        )
        .await
        .unwrap();

        assert!(handle.url.starts_with("http://127.0.0.1:"));
        let info = discovery::read_discovery_file(dir.path()).await.unwrap();
        assert_eq!(info.url, handle.url);

        handle.stop().await;
        assert!(discovery::read_discovery_file(dir.path()).await.is_none());
    }

    #[tokio::test]
    async fn registry_reuses_the_same_handle_for_one_project() {
        let dir = tempfile::tempdir().unwrap();
        let controller = build_controller(dir.path()).await;
        let log_manager = controller.log_manager().clone();
        let registry = DashboardRegistry::new();

        let a = registry
            .get_or_start(dir.path(), "127.0.0.1", controller.clone(), log_manager.clone(), None)
            .await
            .unwrap();
        let b = registry
            .get_or_start(dir.path(), "127.0.0.1", controller, log_manager, None)
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        registry.stop(dir.path()).await;
    }
}
