//! # devrigd
//!
//! Local development-environment orchestrator: given a project manifest that
//! enumerates services, detects each service's runtime, starts it as a
//! supervised child process, multiplexes its output into ring buffers and
//! rotating log files, and exposes a loopback dashboard that streams status
//! and log events to subscribers.
//!
//! ## Architecture
//!
//! - **support**: cross-cutting utilities (errors, shutdown, stable IDs, the
//!   drop-oldest queue backpressure primitive shared by the log pipeline and
//!   the dashboard's WebSocket hub)
//! - **config**: application configuration (TOML-based, with defaults)
//! - **domain**: manifest/service/runtime/registry entity types and the
//!   outbound port traits external collaborators implement
//! - **logs**: per-service ring buffer, rotating file sink, process-wide
//!   manager
//! - **ports**: ephemeral port reservation and "kill holder" reclamation
//! - **process**: cross-platform process-group control and the supervisor
//!   that spawns/pumps/stops a child
//! - **ops**: per-service single-flight operation serialization
//! - **registry**: the persisted, concurrency-safe service registry
//! - **controller**: the out-of-process start/stop/restart façade
//! - **orchestrator**: single-shot "run the environment" with readiness and
//!   shutdown ordering
//! - **dashboard**: the loopback HTTP/WebSocket server
//! - **discovery**: the external client used by out-of-process callers
//! - **detect** / **manifest_io**: minimal, swappable implementations of the
//!   external collaborators this crate only needs interfaces for

pub mod config;
pub mod controller;
pub mod dashboard;
pub mod detect;
pub mod discovery;
pub mod domain;
pub mod logs;
pub mod manifest_io;
pub mod ops;
pub mod orchestrator;
pub mod ports;
pub mod process;
pub mod registry;
pub mod support;

pub use config::AppConfig;
pub use controller::ServiceController;
pub use domain::manifest::Manifest;
pub use orchestrator::Orchestrator;
pub use support::{AppError, DomainError, InfraError};
