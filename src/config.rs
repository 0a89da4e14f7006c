//! Application configuration.
//!
//! Loaded the way the teacher's `AppConfig::load` does: a `Default` impl with
//! sane values, an optional TOML file on disk overriding individual fields,
//! and environment-variable overrides for the data directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::support::InfraError;

/// Ring buffer, rotation, bind address, shutdown deadline, port range, and
/// port-assignment expiry — the knobs a deployer can reasonably want to
/// change without recompiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Loopback host the dashboard binds to. Never anything but a loopback
    /// address (§1 Non-goals: no authentication, so no non-local bind).
    pub dashboard_host: String,
    /// How many log entries each service's ring buffer holds.
    pub log_buffer_capacity: usize,
    /// Capacity of each subscriber's fan-out channel.
    pub log_subscriber_capacity: usize,
    /// Size, in bytes, at which an active log file is rotated.
    pub log_rotation_bytes: u64,
    /// How long, in seconds, `stopGraceful` waits before escalating to
    /// force-kill.
    pub shutdown_grace_secs: u64,
    /// Inclusive low end of the ephemeral port range probed for `reserve(0, ..)`.
    pub ephemeral_port_low: u16,
    /// Inclusive high end of the ephemeral port range.
    pub ephemeral_port_high: u16,
    /// How long, in days, a persisted port assignment is honored without
    /// being reused.
    pub port_assignment_ttl_days: u64,
    /// Directory under which per-project state (registry, port assignments)
    /// is kept. Resolved via `dirs-next::data_dir()` if left unset.
    pub data_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dashboard_host: "127.0.0.1".to_string(),
            log_buffer_capacity: 1000,
            log_subscriber_capacity: 100,
            log_rotation_bytes: 10 * 1024 * 1024,
            shutdown_grace_secs: 10,
            ephemeral_port_low: 30000,
            ephemeral_port_high: 39999,
            port_assignment_ttl_days: 7,
            data_dir: None,
        }
    }
}

impl AppConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn port_assignment_ttl(&self) -> Duration {
        Duration::from_secs(self.port_assignment_ttl_days * 24 * 60 * 60)
    }

    /// Load from `path` if it exists, falling back silently to defaults.
    /// Mirrors the teacher's `AppConfig::load`: a missing file is not an
    /// error, a malformed one is.
    pub fn load(path: &Path) -> Result<Self, InfraError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&raw)?;
        Ok(config)
    }

    /// The directory used for per-project persisted state:
    /// `<data>/azd/registry/...`, `<data>/azd/notifications.db` (out of
    /// scope). Falls back to `~/.devrigd` if the platform data dir can't be
    /// resolved, matching the cross-platform convention `dirs-next` already
    /// gives the rest of this crate.
    pub fn resolved_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        if let Ok(env_override) = std::env::var("DEVRIGD_DATA_DIR") {
            return PathBuf::from(env_override);
        }
        dirs_next::data_dir()
            .map(|d| d.join("azd"))
            .or_else(|| dirs_next::home_dir().map(|h| h.join(".devrigd")))
            .unwrap_or_else(|| PathBuf::from(".devrigd"))
    }

    /// Default config file path, analogous to the teacher's
    /// `default_config_path()`.
    pub fn default_config_path() -> PathBuf {
        dirs_next::config_dir()
            .map(|d| d.join("devrigd").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("devrigd.toml"))
    }
}

/// Initialize `tracing` from the application config. Call once at process
/// startup, the way the teacher's `server::init_tracing` does: an
/// env-filter layer (defaulting to `info`, overridable via `RUST_LOG`) plus
/// a fmt layer, JSON output selectable via the `DEVRIGD_LOG_FORMAT` env var.
pub fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("DEVRIGD_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.dashboard_host, "127.0.0.1");
        assert!(cfg.ephemeral_port_low < cfg.ephemeral_port_high);
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let cfg = AppConfig::load(Path::new("/nonexistent/devrigd.toml")).unwrap();
        assert_eq!(cfg.log_buffer_capacity, AppConfig::default().log_buffer_capacity);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devrigd.toml");
        std::fs::write(&path, "not = [valid toml").unwrap();
        assert!(AppConfig::load(&path).is_err());
    }

    #[test]
    fn overrides_individual_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devrigd.toml");
        std::fs::write(&path, "log_buffer_capacity = 42\n").unwrap();
        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.log_buffer_capacity, 42);
        assert_eq!(cfg.dashboard_host, AppConfig::default().dashboard_host);
    }
}
