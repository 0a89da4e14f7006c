//! Ports define the interfaces between this core and the external
//! collaborators §1 scopes out: a runtime detector, a path-validation
//! predicate, and a manifest port-writeback hook. These are trait contracts
//! the core calls through; swapping an implementation never touches the
//! core.

pub mod inbound;
pub mod outbound;

pub use inbound::RuntimeDetector;
pub use outbound::{is_safe_project_path, ManifestPortWriter};
