//! The static service shape declared in the manifest (§3 Data Model).

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Languages/runtimes the detector can recognize. `Other` covers anything
/// that falls back to an explicit command in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Node,
    Python,
    Dotnet,
    Container,
    Other,
}

/// Whether a service runs indefinitely, is a one-shot build, or a one-shot
/// task. Drives the orchestrator's readiness and terminal-state rules
/// (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Service,
    Build,
    Task,
}

/// A named service as declared in the manifest. `name` must match
/// `[A-Za-z0-9_.-]+` (validated by `support::id::is_valid_service_name`
/// wherever a `Service` is constructed from untrusted input).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub workdir: PathBuf,
    pub language: Language,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub mode: Mode,
}

impl Service {
    pub fn new(name: impl Into<String>, workdir: impl Into<PathBuf>, language: Language) -> Self {
        Self {
            name: name.into(),
            workdir: workdir.into(),
            language,
            port: None,
            env: HashMap::new(),
            mode: Mode::default(),
        }
    }
}
