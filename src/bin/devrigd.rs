//! `devrigd` — the core process: load a manifest, start every declared
//! service, serve the loopback dashboard, and tear everything down on
//! SIGTERM/SIGINT (§4.8, §6).
//!
//! Grounded in the teacher's `main.rs` bootstrap order (config, tracing,
//! shutdown coordinator + signal listener, then the long-running server)
//! adapted to the narrower CLI surface this binary needs: a manifest path,
//! not a stack of server flags. `clap` isn't part of this binary's argument
//! parsing for that reason — it's reserved for `devrigd-cli`, which has an
//! actual verb/flag surface to model.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use devrigd_core::config::{init_tracing, AppConfig};
use devrigd_core::controller::ServiceController;
use devrigd_core::dashboard::DashboardRegistry;
use devrigd_core::detect::FsRuntimeDetector;
use devrigd_core::logs::LogManager;
use devrigd_core::manifest_io::load_manifest;
use devrigd_core::ops::OperationManager;
use devrigd_core::orchestrator::Orchestrator;
use devrigd_core::ports::PortManager;
use devrigd_core::process::Supervisor;
use devrigd_core::registry::ServiceRegistry;
use devrigd_core::support::shutdown::{listen_for_shutdown_signals, ShutdownSignal};

const REGISTRY_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let manifest_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("devrig.toml"));

    let config_path = std::env::var("DEVRIGD_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| AppConfig::default_config_path());
    let config = AppConfig::load(&config_path).unwrap_or_else(|e| {
        eprintln!("failed to load config from {}: {e}, using defaults", config_path.display());
        AppConfig::default()
    });

    init_tracing();
    info!(manifest = %manifest_path.display(), "starting devrigd");

    let manifest = load_manifest(&manifest_path).await?;
    let project_dir = manifest.root.clone();
    let data_dir = config.resolved_data_dir();

    let log_manager = Arc::new(LogManager::new(
        project_dir.clone(),
        config.log_buffer_capacity,
        config.log_subscriber_capacity,
        config.log_rotation_bytes,
    ));
    let registry = Arc::new(ServiceRegistry::open(&data_dir, &project_dir)?);
    let port_manager = Arc::new(PortManager::new(
        &project_dir,
        config.ephemeral_port_low,
        config.ephemeral_port_high,
        config.port_assignment_ttl(),
    ));
    let operation_manager = Arc::new(OperationManager::new());
    let supervisor = Arc::new(Supervisor::new(log_manager.clone()));
    let detector = Arc::new(FsRuntimeDetector);

    let controller = Arc::new(ServiceController::new(
        manifest,
        registry.clone(),
        operation_manager,
        supervisor,
        port_manager,
        detector,
        log_manager.clone(),
        config.shutdown_grace(),
    ));

    let shutdown = ShutdownSignal::new();
    tokio::spawn(listen_for_shutdown_signals(shutdown.clone()));
    registry.clone().spawn_liveness_sweeper(shutdown.clone(), REGISTRY_SWEEP_INTERVAL);

    let dashboard_registry = DashboardRegistry::new();
    let static_dir = std::env::var("DEVRIGD_DASHBOARD_STATIC_DIR").ok().map(PathBuf::from);
    let dashboard = dashboard_registry
        .get_or_start(
            &project_dir,
            &config.dashboard_host,
            controller.clone(),
            log_manager.clone(),
            static_dir,
        )
        .await?;
    info!(url = %dashboard.url, "dashboard listening");

    let orchestrator = Orchestrator::new(controller, registry, log_manager);
    orchestrator.run(shutdown).await;

    // §4.8: the dashboard is the last thing to stop, after every supervised
    // service has already been brought down by the orchestrator.
    dashboard_registry.stop(&project_dir).await;

    info!("devrigd shutdown complete");
    Ok(())
}
