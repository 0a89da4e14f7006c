//! Core entity types: the manifest shape the core consumes, the derived
//! runtime a detector produces, the in-memory process record, the persisted
//! registry entry, and the log entry. Also the outbound port traits
//! (`RuntimeDetector`, `ManifestPortWriter`) that let external collaborators
//! plug into the core without the core depending on their implementations.

pub mod log_entry;
pub mod manifest;
pub mod ports;
pub mod process_record;
pub mod registry_entry;
pub mod runtime;
pub mod service;

pub use log_entry::{Level, LogEntry};
pub use manifest::{Manifest, ServiceDef};
pub use process_record::ProcessRecord;
pub use registry_entry::{RegistryEntry, Status};
pub use runtime::Runtime;
pub use service::{Language, Mode, Service};
