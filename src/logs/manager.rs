//! Process-wide log manager, keyed by project directory (§4.3).
//!
//! Grounded in the teacher's repeated "process-wide singleton registry"
//! shape (`SessionRegistry::shared()`, the `static PROM_HANDLE: OnceLock<...>`
//! in `server.rs`), realized as an explicit `DashMap`-backed registry rather
//! than hidden module statics, per spec Design Notes §9's requirement that
//! singletons be explicit, keyed registries so multi-project tests can run
//! in one process.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;

use crate::domain::log_entry::LogEntry;
use crate::support::id::project_key;
use crate::support::InfraError;

use super::file_sink::LogFile;
use super::ring_buffer::LogBuffer;

/// The buffer and file sink pair for one service, owned by its project's
/// `LogManager`. The supervisor only ever holds the service's name — never
/// a reference to this struct — avoiding the supervisor/pipeline cyclic
/// reference §9 calls out.
pub struct ServiceLogs {
    pub buffer: Arc<LogBuffer>,
    file: AsyncMutex<LogFile>,
}

impl ServiceLogs {
    pub async fn append(&self, entry: LogEntry) -> Result<(), InfraError> {
        self.buffer.append(entry.clone());
        self.file.lock().await.write(&entry).await
    }

    pub async fn flush(&self) -> Result<(), InfraError> {
        self.file.lock().await.flush().await
    }
}

/// One per project directory; created lazily. Buffers and files live only
/// as long as the manager does — torn down with the process (§3
/// Lifecycle).
pub struct LogManager {
    project_dir: PathBuf,
    log_dir: PathBuf,
    buffer_capacity: usize,
    subscriber_capacity: usize,
    rotation_bytes: u64,
    services: DashMap<String, Arc<ServiceLogs>>,
}

impl LogManager {
    pub fn new(
        project_dir: PathBuf,
        buffer_capacity: usize,
        subscriber_capacity: usize,
        rotation_bytes: u64,
    ) -> Self {
        let log_dir = project_dir.join(".azure").join("logs");
        Self {
            project_dir,
            log_dir,
            buffer_capacity,
            subscriber_capacity,
            rotation_bytes,
            services: DashMap::new(),
        }
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Returns the buffer for `name` if it has been created, without
    /// creating one (`getBuffer` in §4.3).
    pub fn get_buffer(&self, name: &str) -> Option<Arc<LogBuffer>> {
        self.services.get(name).map(|s| s.buffer.clone())
    }

    pub fn get_all_buffers(&self) -> Vec<(String, Arc<LogBuffer>)> {
        self.services
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().buffer.clone()))
            .collect()
    }

    /// Creates the buffer and file sink for `name` on first write, and
    /// returns the existing pair otherwise (`ensure` in §4.3).
    pub async fn ensure(&self, name: &str) -> Result<Arc<ServiceLogs>, InfraError> {
        if let Some(existing) = self.services.get(name) {
            return Ok(existing.clone());
        }
        let file = LogFile::open(&self.log_dir, name, self.rotation_bytes).await?;
        let logs = Arc::new(ServiceLogs {
            buffer: Arc::new(LogBuffer::new(self.buffer_capacity, self.subscriber_capacity)),
            file: AsyncMutex::new(file),
        });
        // Another task may have raced us; DashMap::entry gives atomic
        // get-or-insert semantics so only one `LogFile` handle ever wins.
        let entry = self
            .services
            .entry(name.to_string())
            .or_insert(logs)
            .clone();
        Ok(entry)
    }
}

/// Process-wide registry of `LogManager`s, one per project directory.
pub struct LogManagerRegistry {
    managers: DashMap<String, Arc<LogManager>>,
    buffer_capacity: usize,
    subscriber_capacity: usize,
    rotation_bytes: u64,
}

impl LogManagerRegistry {
    pub fn new(buffer_capacity: usize, subscriber_capacity: usize, rotation_bytes: u64) -> Self {
        Self {
            managers: DashMap::new(),
            buffer_capacity,
            subscriber_capacity,
            rotation_bytes,
        }
    }

    /// Returns the manager for `project_dir`, creating one lazily.
    pub fn manager_for(&self, project_dir: &Path) -> Arc<LogManager> {
        let key = project_key(project_dir);
        self.managers
            .entry(key)
            .or_insert_with(|| {
                Arc::new(LogManager::new(
                    project_dir.to_path_buf(),
                    self.buffer_capacity,
                    self.subscriber_capacity,
                    self.rotation_bytes,
                ))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_is_idempotent_per_service() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LogManager::new(dir.path().to_path_buf(), 100, 10, 1024 * 1024);
        let a = manager.ensure("web").await.unwrap();
        let b = manager.ensure("web").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn registry_scopes_managers_by_project_dir() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let registry = LogManagerRegistry::new(100, 10, 1024 * 1024);

        let manager_a = registry.manager_for(dir_a.path());
        let manager_b = registry.manager_for(dir_b.path());
        assert!(!Arc::ptr_eq(&manager_a, &manager_b));

        let manager_a_again = registry.manager_for(dir_a.path());
        assert!(Arc::ptr_eq(&manager_a, &manager_a_again));
    }

    #[tokio::test]
    async fn get_buffer_is_none_before_ensure() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LogManager::new(dir.path().to_path_buf(), 100, 10, 1024 * 1024);
        assert!(manager.get_buffer("web").is_none());
        manager.ensure("web").await.unwrap();
        assert!(manager.get_buffer("web").is_some());
    }
}
