//! Ephemeral port reservation, persisted assignment and "kill holder"
//! reclamation (§4.4).
//!
//! Grounded in the teacher's `fslock`-guarded JSON persistence pattern (the
//! charge-point session store persists to disk under a file lock before
//! releasing it) and in the `sysinfo`-based process enumeration the pack
//! shows for liveness checks (`kill_previous_mcp_instances` in the
//! terminator MCP agent). There is no per-socket-to-pid API in `sysinfo`, so
//! "kill holder" here only reclaims ports this manager itself assigned in a
//! previous run (the pid it persisted is still recorded) — not arbitrary
//! system ports, which would need platform-specific `/proc` parsing outside
//! this crate's remit.

use std::collections::{HashMap, HashSet};
use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::process::{self, group::KillSignal};
use crate::support::DomainError;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PortAssignment {
    port: u16,
    pid: Option<u32>,
    #[serde(with = "crate::support::timestamp")]
    assigned_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AssignmentFile {
    #[serde(default)]
    services: HashMap<String, PortAssignment>,
}

/// The outcome of a `reserve` call: the port actually granted, plus whether
/// it differs from what the caller declared (§9 Open Question 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortReservation {
    pub port: u16,
    pub manifest_update_suggested: bool,
}

/// Reserves ports for services in a project, from a configurable ephemeral
/// range, persisting assignments to `<projectDir>/.azure/ports.json` so that
/// a service tends to keep the same port across restarts (§4.4).
pub struct PortManager {
    path: PathBuf,
    low: u16,
    high: u16,
    ttl: Duration,
}

impl PortManager {
    pub fn new(project_dir: &Path, low: u16, high: u16, ttl: Duration) -> Self {
        Self {
            path: project_dir.join(".azure").join("ports.json"),
            low,
            high,
            ttl,
        }
    }

    /// Reserves a port for `service`. `requested` is the manifest-declared
    /// port, if any; `0` or `None` means auto-assign. `used_so_far` holds
    /// ports already handed out to other services in this same run, so a
    /// single orchestrator pass never double-assigns one port to two
    /// services before either has actually bound it.
    pub async fn reserve(
        &self,
        service: &str,
        requested: Option<u16>,
        used_so_far: &HashSet<u16>,
    ) -> Result<PortReservation, DomainError> {
        let mut file = self.load().map_err(|e| DomainError::Config(e.to_string()))?;
        self.expire_stale(&mut file);

        let declared = requested.filter(|p| *p != 0);
        let port = match declared {
            Some(p) => self.reserve_specific(service, p, &mut file, used_so_far).await?,
            None => self.reserve_auto(service, &file, used_so_far).await?,
        };

        file.services.insert(
            service.to_string(),
            PortAssignment {
                port,
                pid: None,
                assigned_at: Utc::now(),
            },
        );
        self.save(&file).map_err(|e| DomainError::Config(e.to_string()))?;

        // §9 Open Question 2: a declared port that couldn't be honored
        // flags the manifest as stale; nothing in this crate writes it back.
        let manifest_update_suggested = matches!(declared, Some(p) if p != port);
        Ok(PortReservation {
            port,
            manifest_update_suggested,
        })
    }

    /// Records which pid ended up holding `port` for `service`, so a future
    /// reservation can reclaim it if that pid is still alive and blocking a
    /// bind (kill-holder).
    pub fn record_holder(&self, service: &str, port: u16, pid: u32) -> Result<(), DomainError> {
        let mut file = self.load().map_err(|e| DomainError::Config(e.to_string()))?;
        file.services.insert(
            service.to_string(),
            PortAssignment {
                port,
                pid: Some(pid),
                assigned_at: Utc::now(),
            },
        );
        self.save(&file).map_err(|e| DomainError::Config(e.to_string()))
    }

    pub fn release(&self, service: &str) -> Result<(), DomainError> {
        let mut file = self.load().map_err(|e| DomainError::Config(e.to_string()))?;
        file.services.remove(service);
        self.save(&file).map_err(|e| DomainError::Config(e.to_string()))
    }

    async fn reserve_specific(
        &self,
        service: &str,
        port: u16,
        file: &mut AssignmentFile,
        used_so_far: &HashSet<u16>,
    ) -> Result<u16, DomainError> {
        if used_so_far.contains(&port) {
            return Err(DomainError::Port {
                service: service.to_string(),
                port,
            });
        }
        if bindable(port) {
            return Ok(port);
        }

        // Someone is listening. If it's a pid this manager itself recorded
        // for some service, and that pid is still alive, reclaim the port.
        if let Some(holder_pid) = file
            .services
            .values()
            .find(|a| a.port == port)
            .and_then(|a| a.pid)
        {
            if process::pid_is_alive(holder_pid) {
                let _ = process::group::kill_pid(holder_pid, KillSignal::Graceful);
                tokio::time::sleep(Duration::from_millis(200)).await;
                if process::pid_is_alive(holder_pid) {
                    let _ = process::group::kill_pid(holder_pid, KillSignal::Forceful);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            }
        }

        if bindable(port) {
            Ok(port)
        } else {
            Err(DomainError::Port {
                service: service.to_string(),
                port,
            })
        }
    }

    async fn reserve_auto(
        &self,
        service: &str,
        file: &AssignmentFile,
        used_so_far: &HashSet<u16>,
    ) -> Result<u16, DomainError> {
        // Prefer the service's previous port, if it's still free.
        if let Some(previous) = file.services.get(service) {
            if previous.port >= self.low
                && previous.port <= self.high
                && !used_so_far.contains(&previous.port)
                && bindable(previous.port)
            {
                return Ok(previous.port);
            }
        }

        for candidate in self.low..=self.high {
            if used_so_far.contains(&candidate) {
                continue;
            }
            if bindable(candidate) {
                return Ok(candidate);
            }
        }
        Err(DomainError::PortExhausted)
    }

    fn expire_stale(&self, file: &mut AssignmentFile) {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::days(7));
        file.services.retain(|_, a| a.assigned_at >= cutoff);
    }

    fn load(&self) -> std::io::Result<AssignmentFile> {
        if !self.path.exists() {
            return Ok(AssignmentFile::default());
        }
        let _lock = self.lock()?;
        let bytes = std::fs::read(&self.path)?;
        if bytes.is_empty() {
            return Ok(AssignmentFile::default());
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    fn save(&self, file: &AssignmentFile) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _lock = self.lock()?;
        let bytes = serde_json::to_vec_pretty(file)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&self.path, bytes)
    }

    fn lock(&self) -> std::io::Result<fslock::LockFile> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_path = self.path.with_extension("json.lock");
        let mut lock = fslock::LockFile::open(&lock_path)?;
        lock.lock()?;
        Ok(lock)
    }
}

/// Probes an ephemeral port by attempting to bind it on loopback; the
/// listener is dropped immediately (§4.4: "a bind-and-release probe, not a
/// persistent reservation").
fn bindable(port: u16) -> bool {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpListener::bind(addr).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reserves_requested_port_when_free() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PortManager::new(dir.path(), 30000, 39999, Duration::from_secs(60 * 60 * 24 * 7));
        let reservation = manager
            .reserve("web", Some(31000), &HashSet::new())
            .await
            .unwrap();
        assert_eq!(reservation.port, 31000);
        assert!(!reservation.manifest_update_suggested);
    }

    #[tokio::test]
    async fn auto_assigns_within_range() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PortManager::new(dir.path(), 31500, 31510, Duration::from_secs(60 * 60 * 24 * 7));
        let reservation = manager.reserve("web", None, &HashSet::new()).await.unwrap();
        assert!((31500..=31510).contains(&reservation.port));
    }

    #[tokio::test]
    async fn refuses_a_port_already_claimed_this_run() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PortManager::new(dir.path(), 30000, 39999, Duration::from_secs(60 * 60 * 24 * 7));
        let mut used = HashSet::new();
        used.insert(31999u16);
        let result = manager.reserve("web", Some(31999), &used).await;
        assert!(matches!(result, Err(DomainError::Port { .. })));
    }

    #[tokio::test]
    async fn remembers_previous_auto_assignment_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PortManager::new(dir.path(), 32000, 32010, Duration::from_secs(60 * 60 * 24 * 7));
        let first = manager.reserve("web", None, &HashSet::new()).await.unwrap();
        let second = manager.reserve("web", None, &HashSet::new()).await.unwrap();
        assert_eq!(first.port, second.port);
    }

    #[tokio::test]
    async fn release_forgets_the_assignment() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PortManager::new(dir.path(), 32100, 32110, Duration::from_secs(60 * 60 * 24 * 7));
        manager.reserve("web", Some(32105), &HashSet::new()).await.unwrap();
        manager.release("web").unwrap();
        let file = manager.load().unwrap();
        assert!(!file.services.contains_key("web"));
    }
}
