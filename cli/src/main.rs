//! `devrigctl` — out-of-process controller for a project's services (§4.7,
//! §4.9): forwards to whichever dashboard is already running for the
//! project directory, or falls back to a one-shot local controller when
//! none is.
//!
//! Grounded in the teacher's `clap`-derived CLI shape (`cli/src/main.rs`:
//! `#[derive(Parser)]` struct, a `#[command(subcommand)]` verb enum,
//! config-then-dispatch `main`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::warn;

use devrigd_core::config::AppConfig;
use devrigd_core::controller::ServiceController;
use devrigd_core::detect::FsRuntimeDetector;
use devrigd_core::discovery::{self, read_logs_from_files, DiscoveryClient};
use devrigd_core::domain::manifest::Manifest;
use devrigd_core::logs::LogManager;
use devrigd_core::manifest_io::load_manifest;
use devrigd_core::ops::OperationManager;
use devrigd_core::ports::PortManager;
use devrigd_core::process::Supervisor;
use devrigd_core::registry::ServiceRegistry;

#[derive(Parser, Debug)]
#[command(
    name = "devrigctl",
    version,
    about = "Controller/discovery CLI for a devrigd-managed project"
)]
struct Cli {
    /// Path to the project's manifest file.
    #[arg(short, long, default_value = "devrig.toml")]
    manifest: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a service.
    Start { name: String },
    /// Stop a service.
    Stop { name: String },
    /// Stop then start a service.
    Restart { name: String },
    /// List every manifest service and its current status.
    Status,
    /// Print recent log lines for a service.
    Logs {
        name: String,
        #[arg(long, default_value_t = 100)]
        tail: usize,
    },
    /// Print whether a dashboard is reachable for this project.
    Info,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let manifest = load_manifest(&cli.manifest).await?;
    let project_dir = manifest.root.clone();

    match discover_client(&project_dir).await {
        Some(client) => run_remote(&client, &project_dir, &cli.command).await,
        None => run_local(manifest, &project_dir, &cli.command).await,
    }
}

/// Looks for a dashboard discovery file and confirms it's actually
/// reachable before trusting it — a stale file from a process that died
/// without cleaning up is treated the same as no dashboard at all.
async fn discover_client(project_dir: &Path) -> Option<DiscoveryClient> {
    let info = discovery::read_discovery_file(project_dir).await?;
    let client = DiscoveryClient::new(info.url.clone());
    if client.ping().await {
        Some(client)
    } else {
        warn!(url = %info.url, "discovery file found but dashboard did not answer, falling back to local");
        None
    }
}

async fn run_remote(
    client: &DiscoveryClient,
    project_dir: &Path,
    command: &Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Start { name } => print_operation(client.trigger_operation(name, "start").await?),
        Command::Stop { name } => print_operation(client.trigger_operation(name, "stop").await?),
        Command::Restart { name } => print_operation(client.trigger_operation(name, "restart").await?),
        Command::Status => {
            for service in client.get_services().await? {
                print_service_line(&service.entry);
            }
        }
        Command::Logs { name, tail } => {
            for entry in client.get_logs(name, *tail).await? {
                println!("[{}] {}", entry.timestamp, entry.message);
            }
        }
        Command::Info => println!("dashboard reachable for {}", project_dir.display()),
    }
    Ok(())
}

async fn run_local(
    manifest: Manifest,
    project_dir: &Path,
    command: &Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Info => {
            println!(
                "no dashboard running for {} — operating on a one-shot local controller",
                project_dir.display()
            );
            return Ok(());
        }
        Command::Logs { name, tail } => {
            let mut entries = read_logs_from_files(project_dir, name).await?;
            if entries.len() > *tail {
                let start = entries.len() - *tail;
                entries = entries.split_off(start);
            }
            for entry in entries {
                println!("[{}] {}", entry.timestamp, entry.message);
            }
            return Ok(());
        }
        _ => {}
    }

    let controller = build_local_controller(manifest, project_dir).await?;
    match command {
        Command::Start { name } => {
            controller.start(name).await?;
            println!("started {name}");
        }
        Command::Stop { name } => {
            controller.stop(name).await?;
            println!("stopped {name}");
        }
        Command::Restart { name } => {
            controller.restart(name).await?;
            println!("restarted {name}");
        }
        Command::Status => {
            for entry in controller.list() {
                print_service_line(&entry);
            }
        }
        Command::Logs { .. } | Command::Info => unreachable!("handled above"),
    }
    Ok(())
}

/// Wires up the same collaborators `devrigd` itself uses, so a
/// `devrigctl` invocation against a project with no running dashboard still
/// gets real port reservation, supervision and registry persistence — just
/// scoped to this one command instead of a long-running process.
async fn build_local_controller(
    manifest: Manifest,
    project_dir: &Path,
) -> Result<Arc<ServiceController>, Box<dyn std::error::Error>> {
    let config = AppConfig::load(&AppConfig::default_config_path()).unwrap_or_default();
    let data_dir = config.resolved_data_dir();

    let log_manager = Arc::new(LogManager::new(
        project_dir.to_path_buf(),
        config.log_buffer_capacity,
        config.log_subscriber_capacity,
        config.log_rotation_bytes,
    ));
    let registry = Arc::new(ServiceRegistry::open(&data_dir, project_dir)?);
    let port_manager = Arc::new(PortManager::new(
        project_dir,
        config.ephemeral_port_low,
        config.ephemeral_port_high,
        config.port_assignment_ttl(),
    ));

    Ok(Arc::new(ServiceController::new(
        manifest,
        registry,
        Arc::new(OperationManager::new()),
        Arc::new(Supervisor::new(log_manager.clone())),
        port_manager,
        Arc::new(FsRuntimeDetector),
        log_manager,
        config.shutdown_grace(),
    )))
}

fn print_operation(response: devrigd_core::dashboard::rest::OperationResponse) {
    if response.success {
        println!("{} ({} ms)", response.message, response.duration_ms);
    } else {
        eprintln!("{} ({} ms)", response.message, response.duration_ms);
    }
}

fn print_service_line(entry: &devrigd_core::domain::registry_entry::RegistryEntry) {
    println!(
        "{:<20} {:<10?} pid={:<8} port={:<6} {}",
        entry.name,
        entry.status,
        entry.pid,
        entry.port,
        entry.url.as_deref().unwrap_or("-")
    );
}
