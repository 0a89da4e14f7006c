//! Single-shot "run the environment" (§4.8): start every manifest service,
//! promote `service`-mode entries through `starting -> running -> ready` as
//! they become reachable, then wait for a shutdown signal and stop
//! everything that's still live.
//!
//! Grounded in the teacher's `ServerHandle::{start, wait, shutdown}`
//! lifecycle shape — one struct owning everything a bootstrap spawned,
//! `tokio::select!` racing its background tasks against a shutdown signal —
//! generalized from "one WS server + one REST server" to "N supervised
//! services". The readiness promotion loop has no direct teacher
//! precedent (the OCPP server has no readiness concept of its own); it's
//! built from the same `tokio::select!`-over-interval idiom as
//! `registry::store`'s liveness sweeper.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::controller::ServiceController;
use crate::domain::registry_entry::Status;
use crate::domain::service::Mode;
use crate::logs::LogManager;
use crate::registry::ServiceRegistry;
use crate::support::shutdown::ShutdownSignal;

/// How long readiness probing waits for a `service`-mode child to accept a
/// connection, or log a "listening" marker, before giving up. Past this
/// point the service is left at `running` — readiness is an optimistic
/// status upgrade, never a gate on whether the service keeps running.
const READINESS_DEADLINE: Duration = Duration::from_secs(30);
const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Substrings that, seen in a service's own log output, count as a
/// framework announcing it's accepting connections. Best-effort and
/// deliberately generic — a real deployment can always fall back on the
/// TCP-connect probe.
const LISTENING_MARKERS: &[&str] = &[
    "listening",
    "started server",
    "ready in",
    "server started",
    "compiled successfully",
];

/// Owns one run of the environment: which services it started, and when to
/// stop them.
pub struct Orchestrator {
    controller: Arc<ServiceController>,
    registry: Arc<ServiceRegistry>,
    log_manager: Arc<LogManager>,
}

impl Orchestrator {
    pub fn new(
        controller: Arc<ServiceController>,
        registry: Arc<ServiceRegistry>,
        log_manager: Arc<LogManager>,
    ) -> Self {
        Self {
            controller,
            registry,
            log_manager,
        }
    }

    /// Starts every manifest service, isolating per-service spawn failures
    /// so the rest of the fleet still comes up (§7: partial-failure
    /// isolation), then blocks until `shutdown` fires and stops everything
    /// this run started. Does not touch the dashboard — callers are
    /// responsible for stopping that *after* this returns (§4.8: "the
    /// dashboard is the last thing to stop").
    pub async fn run(&self, shutdown: ShutdownSignal) {
        let names: Vec<String> = self
            .controller
            .manifest()
            .service_names()
            .into_iter()
            .map(String::from)
            .collect();

        for name in &names {
            match self.controller.start(name).await {
                Ok(()) => info!(service = %name, "orchestrator started service"),
                Err(e) => warn!(service = %name, error = %e, "orchestrator failed to start service"),
            }
        }

        let mut readiness_tasks = Vec::new();
        for name in &names {
            let Some(service) = self.controller.manifest().service_for(name) else {
                continue;
            };
            if service.mode != Mode::Service {
                continue;
            }
            let registry = self.registry.clone();
            let log_manager = self.log_manager.clone();
            let name = name.clone();
            readiness_tasks.push(tokio::spawn(async move {
                wait_for_readiness(&registry, &log_manager, &name).await;
            }));
        }

        info!(services = names.len(), "orchestrator running, waiting for shutdown signal");
        shutdown.notified().wait().await;
        info!("orchestrator received shutdown signal, stopping services");

        for task in readiness_tasks {
            task.abort();
        }

        for name in &names {
            if let Some(entry) = self.registry.get(name) {
                if entry.status.implies_live_pid() {
                    if let Err(e) = self.controller.stop(name).await {
                        warn!(service = %name, error = %e, "failed to stop service during shutdown");
                    }
                }
            }
        }

        info!("orchestrator shutdown complete");
    }
}

/// Polls the registry and the service's log buffer until it looks ready, or
/// `READINESS_DEADLINE` elapses, promoting `starting -> running` eagerly
/// and `running -> ready` once a signal is observed. Never overwrites a
/// status the exit monitor has already moved to a terminal state.
async fn wait_for_readiness(registry: &Arc<ServiceRegistry>, log_manager: &Arc<LogManager>, name: &str) {
    let Some(entry) = registry.get(name) else {
        return;
    };
    if entry.status != Status::Starting {
        return;
    }

    let mut running = entry.clone();
    running.status = Status::Running;
    running.last_checked = chrono::Utc::now();
    if registry.upsert(running).is_err() {
        return;
    }

    let deadline = Instant::now() + READINESS_DEADLINE;
    loop {
        let Some(current) = registry.get(name) else {
            return;
        };
        if current.status.is_terminal() {
            return;
        }

        if Instant::now() >= deadline {
            warn!(service = %name, "readiness deadline elapsed, leaving service at running");
            return;
        }

        if current.port != 0 && TcpStream::connect(("127.0.0.1", current.port)).await.is_ok() {
            promote_to_ready(registry, name);
            return;
        }

        if let Some(buffer) = log_manager.get_buffer(name) {
            if buffer.recent(50).iter().any(|e| matches_listening_marker(&e.message)) {
                promote_to_ready(registry, name);
                return;
            }
        }

        tokio::time::sleep(READINESS_POLL_INTERVAL).await;
    }
}

fn matches_listening_marker(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    LISTENING_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn promote_to_ready(registry: &Arc<ServiceRegistry>, name: &str) {
    if let Some(mut entry) = registry.get(name) {
        if entry.status == Status::Running {
            entry.status = Status::Ready;
            entry.last_checked = chrono::Utc::now();
            if registry.upsert(entry).is_ok() {
                info!(service = %name, "service ready");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listening_marker_is_case_insensitive() {
        assert!(matches_listening_marker("Server listening on :3000"));
        assert!(matches_listening_marker("Ready in 312ms"));
        assert!(!matches_listening_marker("just a regular log line"));
    }
}
