use thiserror::Error;

/// Business-rule violations visible to callers (CLI, dashboard clients).
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("service name '{0}' is invalid (expected [A-Za-z0-9_.-]+, length <= 128)")]
    InvalidServiceName(String),

    #[error("no such service: {0}")]
    NotFound(String),

    #[error("manifest error: {0}")]
    Config(String),

    #[error("could not detect runtime for service '{0}': {1}")]
    Detection(String, String),

    #[error("port {port} is in use and could not be reclaimed for service '{service}'")]
    Port { service: String, port: u16 },

    #[error("no free port available in the ephemeral range")]
    PortExhausted,

    #[error("failed to spawn service '{0}': {1}")]
    Spawn(String, String),

    #[error("service '{0}' is not running")]
    NotRunning(String),

    #[error("service '{0}' is already running")]
    AlreadyRunning(String),

    #[error("operation '{op}' is already in progress for service '{service}'")]
    Busy { service: String, op: &'static str },

    #[error("graceful stop of '{0}' exceeded its deadline and was force-killed")]
    StopTimeout(String),
}

impl DomainError {
    /// Whether retrying the same request might succeed without caller intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, DomainError::Port { .. } | DomainError::Busy { .. })
    }
}

/// Infrastructure-level failures: I/O, serialization, locking.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("lock error: {0}")]
    Lock(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Infra(#[from] InfraError),
}
