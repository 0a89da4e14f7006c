//! Spawns a service's child process, pumps its stdout/stderr into the log
//! pipeline, and tears it down gracefully with a forceful escalation (§4.5).
//!
//! The pump pair is grounded in the teacher's `send_task`/`recv_task` split
//! in `interfaces/ws/ocpp_server.rs` — two independent tasks racing
//! concurrently off one connection, each isolated so a failure in one never
//! stalls the other.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::domain::log_entry::LogEntry;
use crate::domain::process_record::ProcessRecord;
use crate::domain::runtime::Runtime;
use crate::logs::manager::{LogManager, ServiceLogs};
use crate::support::DomainError;

use super::group::{self, KillSignal, PlatformProcessGroup, ProcessGroup};

/// A line longer than this is truncated before being handed to the log
/// pipeline, rather than letting one runaway write stall a pump forever.
const MAX_PUMP_LINE_BYTES: usize = 1024 * 1024;

/// A running child, plus what the supervisor needs to stop it later.
pub struct SupervisedProcess {
    pub record: ProcessRecord,
    child: Arc<Mutex<Child>>,
    process_group: PlatformProcessGroup,
}

impl SupervisedProcess {
    pub fn pid(&self) -> u32 {
        self.record.pid
    }

    /// Clones the handle to the child so a caller can wait on it without
    /// holding the outer `Arc<Mutex<SupervisedProcess>>` for the duration —
    /// `stop_graceful` and an exit monitor both want to `wait()` the same
    /// child without blocking each other's reads of the surrounding record.
    pub fn child_handle(&self) -> Arc<Mutex<Child>> {
        self.child.clone()
    }
}

/// What a graceful-stop attempt produced.
#[derive(Debug, Clone, Copy)]
pub struct StopOutcome {
    pub exit_code: Option<i32>,
    pub escalated: bool,
}

pub struct Supervisor {
    log_manager: Arc<LogManager>,
}

impl Supervisor {
    pub fn new(log_manager: Arc<LogManager>) -> Self {
        Self { log_manager }
    }

    /// Builds the command from `runtime`, isolates it into its own process
    /// group, spawns it, and attaches the stdout/stderr pumps (§4.5 step
    /// "spawn").
    pub async fn spawn(&self, name: &str, runtime: &Runtime) -> Result<SupervisedProcess, DomainError> {
        let service_logs = self
            .log_manager
            .ensure(name)
            .await
            .map_err(|e| DomainError::Spawn(name.to_string(), e.to_string()))?;

        let mut command = Command::new(&runtime.command);
        command
            .args(&runtime.args)
            .current_dir(&runtime.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .envs(std::env::vars())
            .envs(runtime.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let process_group = group::platform();
        process_group.setup(&mut command);

        let mut child = command
            .spawn()
            .map_err(|e| DomainError::Spawn(name.to_string(), e.to_string()))?;

        let pid = child.id().unwrap_or(0);
        let record = ProcessRecord::new(name, pid, runtime.port);

        if let Some(stdout) = child.stdout.take() {
            spawn_pump(name.to_string(), stdout, false, service_logs.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_pump(name.to_string(), stderr, true, service_logs.clone());
        }

        info!(service = name, pid, port = runtime.port, "service spawned");

        Ok(SupervisedProcess {
            record,
            child: Arc::new(Mutex::new(child)),
            process_group,
        })
    }

    /// Sends a graceful signal, waits up to `grace`, then escalates to a
    /// forceful kill of the whole group (§4.5 step "stopGraceful").
    pub async fn stop_graceful(
        &self,
        process: &mut SupervisedProcess,
        grace: Duration,
    ) -> Result<StopOutcome, DomainError> {
        let pid = process.pid();
        let name = process.record.name.clone();

        if let Err(e) = process.process_group.kill_group(pid, KillSignal::Graceful) {
            warn!(pid, error = %e, "graceful signal failed, process may already be gone");
        }

        let wait_result = {
            let mut child = process.child.lock().await;
            timeout(grace, child.wait()).await
        };

        let outcome = match wait_result {
            Ok(Ok(status)) => StopOutcome {
                exit_code: status.code(),
                escalated: false,
            },
            Ok(Err(e)) => return Err(DomainError::Spawn(name, e.to_string())),
            Err(_elapsed) => {
                warn!(pid, service = %name, "graceful stop timed out, force-killing group");
                if let Err(e) = process.process_group.kill_group(pid, KillSignal::Forceful) {
                    warn!(pid, error = %e, "force-kill failed");
                }
                let status = {
                    let mut child = process.child.lock().await;
                    child.wait().await.ok()
                };
                StopOutcome {
                    exit_code: status.and_then(|s| s.code()),
                    escalated: true,
                }
            }
        };

        process.record.mark_exited(outcome.exit_code.unwrap_or(-1));

        if let Ok(service_logs) = self.log_manager.ensure(&name).await {
            let _ = service_logs.flush().await;
        }

        Ok(outcome)
    }
}

/// One pump task per stream. Reads lines, infers a level, and appends to
/// both the ring buffer and the rotating file. Each line's handling is
/// wrapped in `catch_unwind` so a panic in log processing (a pathological
/// message, an I/O edge case) can't take the other stream's pump down with
/// it — tasks are already isolated by `tokio::spawn`, this is the extra
/// insurance the per-line body gets.
fn spawn_pump<R>(name: String, reader: R, is_stderr: bool, logs: Arc<ServiceLogs>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    if line.len() > MAX_PUMP_LINE_BYTES {
                        line.truncate(MAX_PUMP_LINE_BYTES);
                    }
                    let message = line.trim_end_matches(['\n', '\r']).to_string();
                    let name = name.clone();
                    let logs = logs.clone();

                    let handled = std::panic::AssertUnwindSafe(async move {
                        let entry = LogEntry::new(&name, message, is_stderr);
                        if let Err(e) = logs.append(entry).await {
                            warn!(service = %name, error = %e, "failed to persist log line");
                        }
                    })
                    .catch_unwind()
                    .await;

                    if let Err(panic) = handled {
                        error!(service = %name, ?panic, "log pump handler panicked");
                    }
                }
                Err(e) => {
                    error!(service = %name, error = %e, "pump read error");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::service::Language;
    use crate::logs::manager::LogManager;

    fn runtime(command: &str, args: Vec<&str>, workdir: std::path::PathBuf, port: u16) -> Runtime {
        Runtime {
            command: command.to_string(),
            args: args.into_iter().map(String::from).collect(),
            workdir,
            env: Default::default(),
            port,
            language: Language::Other,
            framework: None,
            kind: crate::domain::runtime::RuntimeKind::Service,
        }
    }

    #[tokio::test]
    async fn spawns_and_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(LogManager::new(dir.path().to_path_buf(), 100, 10, 1024 * 1024));
        let supervisor = Supervisor::new(manager.clone());

        let rt = runtime("sh", vec!["-c", "echo hello; echo oops 1>&2"], dir.path().to_path_buf(), 0);
        let mut process = supervisor.spawn("echoer", &rt).await.unwrap();
        assert!(process.pid() > 0);

        let outcome = supervisor
            .stop_graceful(&mut process, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(!outcome.escalated);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let buffer = manager.get_buffer("echoer").unwrap();
        let recent = buffer.recent(10);
        assert!(recent.iter().any(|e| e.message.contains("hello")));
    }

    #[tokio::test]
    async fn stop_graceful_escalates_past_a_stubborn_child() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(LogManager::new(dir.path().to_path_buf(), 100, 10, 1024 * 1024));
        let supervisor = Supervisor::new(manager);

        let rt = runtime(
            "sh",
            vec!["-c", "trap '' TERM; sleep 30"],
            dir.path().to_path_buf(),
            0,
        );
        let mut process = supervisor.spawn("stubborn", &rt).await.unwrap();

        let outcome = supervisor
            .stop_graceful(&mut process, Duration::from_millis(300))
            .await
            .unwrap();
        assert!(outcome.escalated);
    }
}
