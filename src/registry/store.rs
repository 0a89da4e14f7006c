//! Persisted service registry, one JSON file per project directory, guarded
//! by an advisory file lock across read-modify-write cycles (§5).
//!
//! The in-memory shape is grounded in the teacher's `DashMap`-backed
//! `SessionRegistry`; the liveness sweep loop is grounded in
//! `HeartbeatMonitor::start` (`tokio::select!` between an interval tick and
//! the shutdown signal, looping until told to stop).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::registry_entry::{RegistryEntry, Status};
use crate::process;
use crate::support::id::project_key;
use crate::support::shutdown::ShutdownSignal;
use crate::support::InfraError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    entries: HashMap<String, RegistryEntry>,
}

/// One registry per project directory. Reads are served from the in-memory
/// `DashMap`; writes go through the file lock so two `devrigd` processes
/// pointed at the same project never interleave a read-modify-write.
pub struct ServiceRegistry {
    project_dir: PathBuf,
    path: PathBuf,
    entries: DashMap<String, RegistryEntry>,
}

impl ServiceRegistry {
    /// Opens (or creates) the registry file for `project_dir` under
    /// `data_dir`, at `<data_dir>/registry/<project_key>.json`, and loads
    /// whatever was last persisted there.
    pub fn open(data_dir: &Path, project_dir: &Path) -> Result<Self, InfraError> {
        let path = data_dir
            .join("registry")
            .join(format!("{}.json", project_key(project_dir)));

        let registry = Self {
            project_dir: project_dir.to_path_buf(),
            path,
            entries: DashMap::new(),
        };
        registry.reload()?;
        Ok(registry)
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    fn reload(&self) -> Result<(), InfraError> {
        if !self.path.exists() {
            return Ok(());
        }
        let _lock = self.lock()?;
        let bytes = std::fs::read(&self.path)?;
        if bytes.is_empty() {
            return Ok(());
        }
        let file: RegistryFile = serde_json::from_slice(&bytes)?;
        self.entries.clear();
        for (name, entry) in file.entries {
            self.entries.insert(name, entry);
        }
        Ok(())
    }

    fn persist(&self) -> Result<(), InfraError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _lock = self.lock()?;
        let file = RegistryFile {
            entries: self
                .entries
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }

    fn lock(&self) -> Result<fslock::LockFile, InfraError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_path = self.path.with_extension("json.lock");
        let mut lock = fslock::LockFile::open(&lock_path)
            .map_err(|e| InfraError::Lock(e.to_string()))?;
        lock.lock().map_err(|e| InfraError::Lock(e.to_string()))?;
        Ok(lock)
    }

    /// Inserts or replaces the entry for `entry.name`, then persists
    /// immediately — the registry never holds a dirty in-memory write.
    pub fn upsert(&self, entry: RegistryEntry) -> Result<(), InfraError> {
        self.entries.insert(entry.name.clone(), entry);
        self.persist()
    }

    pub fn get(&self, name: &str) -> Option<RegistryEntry> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    pub fn list(&self) -> Vec<RegistryEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn remove(&self, name: &str) -> Result<(), InfraError> {
        self.entries.remove(name);
        self.persist()
    }

    /// Checks every entry whose status implies a live pid; any whose pid has
    /// died is transitioned to `NotRunning` with `end_time` set, and
    /// persisted. A dead pid found mid-sweep just means the process outlived
    /// a previous run of this orchestrator, not that it crashed — `Error` is
    /// reserved for an observed non-zero exit. Returns the entries that
    /// changed (§5: "a sweep reconciles the registry against reality; it
    /// never trusts a pid's liveness forever").
    pub fn sweep_liveness(&self) -> Result<Vec<RegistryEntry>, InfraError> {
        let mut changed = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if entry.status.implies_live_pid() && !process::pid_is_alive(entry.pid) {
                warn!(service = %entry.name, pid = entry.pid, "registry sweep found a dead pid, marking not-running");
                entry.status = Status::NotRunning;
                entry.end_time = Some(chrono::Utc::now());
                entry.last_checked = chrono::Utc::now();
                changed.push(entry.clone());
            } else {
                entry.last_checked = chrono::Utc::now();
            }
        }
        if !changed.is_empty() {
            self.persist()?;
        }
        Ok(changed)
    }

    /// Spawns a background task that calls `sweep_liveness` on `interval`
    /// until `shutdown` fires.
    pub fn spawn_liveness_sweeper(
        self: Arc<Self>,
        shutdown: ShutdownSignal,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_liveness() {
                            warn!(error = %e, "registry liveness sweep failed");
                        }
                    }
                    _ = shutdown.notified().wait() => {
                        info!("registry liveness sweeper shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::service::{Language, Mode};

    fn sample_entry(name: &str, pid: u32, status: Status) -> RegistryEntry {
        RegistryEntry {
            name: name.to_string(),
            project_dir: "/tmp/project".to_string(),
            pid,
            port: 3000,
            url: None,
            deployment_url: None,
            language: Language::Node,
            framework: None,
            status,
            start_time: chrono::Utc::now(),
            last_checked: chrono::Utc::now(),
            exit_code: None,
            end_time: None,
            kind: "service".to_string(),
            mode: Mode::Service,
        }
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let data_dir = tempfile::tempdir().unwrap();
        let project_dir = tempfile::tempdir().unwrap();
        let registry = ServiceRegistry::open(data_dir.path(), project_dir.path()).unwrap();

        registry
            .upsert(sample_entry("web", 123, Status::Running))
            .unwrap();
        let entry = registry.get("web").unwrap();
        assert_eq!(entry.pid, 123);
        assert_eq!(entry.status, Status::Running);
    }

    #[test]
    fn persists_across_reopen() {
        let data_dir = tempfile::tempdir().unwrap();
        let project_dir = tempfile::tempdir().unwrap();
        {
            let registry = ServiceRegistry::open(data_dir.path(), project_dir.path()).unwrap();
            registry
                .upsert(sample_entry("web", 123, Status::Running))
                .unwrap();
        }
        let reopened = ServiceRegistry::open(data_dir.path(), project_dir.path()).unwrap();
        assert!(reopened.get("web").is_some());
    }

    #[test]
    fn sweep_marks_dead_pids_as_not_running() {
        let data_dir = tempfile::tempdir().unwrap();
        let project_dir = tempfile::tempdir().unwrap();
        let registry = ServiceRegistry::open(data_dir.path(), project_dir.path()).unwrap();

        // pid 0 is never alive per `process::pid_is_alive`, so this always
        // looks dead regardless of what's actually running on the host.
        registry
            .upsert(sample_entry("ghost", 0, Status::Running))
            .unwrap();
        let changed = registry.sweep_liveness().unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(registry.get("ghost").unwrap().status, Status::NotRunning);
    }

    #[test]
    fn sweep_leaves_terminal_entries_alone() {
        let data_dir = tempfile::tempdir().unwrap();
        let project_dir = tempfile::tempdir().unwrap();
        let registry = ServiceRegistry::open(data_dir.path(), project_dir.path()).unwrap();

        registry
            .upsert(sample_entry("done", 0, Status::Stopped))
            .unwrap();
        let changed = registry.sweep_liveness().unwrap();
        assert!(changed.is_empty());
    }

    #[test]
    fn remove_deletes_the_entry() {
        let data_dir = tempfile::tempdir().unwrap();
        let project_dir = tempfile::tempdir().unwrap();
        let registry = ServiceRegistry::open(data_dir.path(), project_dir.path()).unwrap();

        registry
            .upsert(sample_entry("web", 123, Status::Running))
            .unwrap();
        registry.remove("web").unwrap();
        assert!(registry.get("web").is_none());
    }
}
