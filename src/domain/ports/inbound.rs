//! Inbound port: how the orchestrator asks an external collaborator to turn
//! a service definition into a launch plan (§1, §4.8 data flow).

use async_trait::async_trait;

use crate::support::DomainError;

use super::super::runtime::Runtime;
use super::super::service::Service;

/// `(service-def, workdir) -> Runtime{cmd, args, port, env}` (§2). The core
/// ships one minimal, filesystem-sniffing implementation (`crate::detect`)
/// as a convenience; the real detector — prerequisite version checks,
/// framework sniffing, dependency-installer awareness — is an external
/// collaborator's job per §1 Non-goals.
#[async_trait]
pub trait RuntimeDetector: Send + Sync {
    /// Derive a launch plan for `service`. The detector is re-invoked on
    /// every start (§4.7) — callers must never cache a `Runtime` across
    /// restarts.
    async fn detect(&self, service: &Service) -> Result<Runtime, DomainError>;
}
