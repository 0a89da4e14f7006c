//! The persisted registry entry (§3) and the service lifecycle state
//! machine it encodes (§4.8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::service::{Language, Mode};

/// Lifecycle states a registry entry can be in. Terminal states are
/// `Stopped | Built | Completed | Error | NotRunning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Starting,
    Running,
    Ready,
    Stopping,
    Stopped,
    NotRunning,
    Error,
    Built,
    Completed,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Stopped
                | Status::Built
                | Status::Completed
                | Status::Error
                | Status::NotRunning
        )
    }

    /// §3 invariant: `pid>0` implies status is one of these.
    pub fn implies_live_pid(self) -> bool {
        matches!(
            self,
            Status::Starting | Status::Running | Status::Ready | Status::Stopping
        )
    }
}

/// One entry per `(projectDir, name)` — the registry's primary key (§3).
/// `rename_all = "camelCase"` is what actually makes this struct's fields
/// match §3's documented wire keys (`projectDir`, `startTime`,
/// `lastChecked`, `exitCode`, `endTime`); the two fields already under an
/// explicit `#[serde(rename)]` (`azureUrl`, `type`) keep their override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub name: String,
    pub project_dir: String,
    pub pid: u32,
    pub port: u16,
    pub url: Option<String>,
    /// Wire-compatible with spec.md's `ServiceInfo.azureUrl` (§3 EXPANDED
    /// note); treated generically as an optional deployment URL hint.
    #[serde(rename = "azureUrl")]
    pub deployment_url: Option<String>,
    pub language: Language,
    pub framework: Option<String>,
    pub status: Status,
    #[serde(with = "crate::support::timestamp")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "crate::support::timestamp")]
    pub last_checked: DateTime<Utc>,
    pub exit_code: Option<i32>,
    #[serde(with = "crate::support::timestamp::option")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub kind: String,
    pub mode: Mode,
}

impl RegistryEntry {
    pub fn key(project_dir: &str, name: &str) -> String {
        format!("{project_dir}::{name}")
    }

    /// §3 invariant: `status=stopped|error|not-running` implies either
    /// `pid=0` or the pid is known-dead. The registry never calls this with
    /// a live pid for a terminal status; this is the assertion form of that
    /// rule, used in tests.
    pub fn terminal_pid_invariant_holds(&self) -> bool {
        if matches!(self.status, Status::Stopped | Status::Error | Status::NotRunning) {
            self.pid == 0 || !crate::process::pid_is_alive(self.pid)
        } else {
            true
        }
    }
}
