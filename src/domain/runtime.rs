//! The derived launch plan produced by a `RuntimeDetector` (§3, §4.5).

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::service::Language;

/// A concrete, immutable plan for launching one service. `port == 0` means
/// "auto-assign" — the port manager chooses one from the ephemeral range
/// before the supervisor spawns the child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runtime {
    pub command: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    pub env: HashMap<String, String>,
    pub port: u16,
    pub language: Language,
    /// Best-effort framework name (`"express"`, `"flask"`, …), used only for
    /// display and for `ServiceInfo`'s `framework` field.
    pub framework: Option<String>,
    #[serde(rename = "type")]
    pub kind: RuntimeKind,
}

/// Mirrors `Service::mode` but named distinctly because the runtime is the
/// detector's output, not the manifest's input — a detector is free to
/// override a service's declared mode (e.g. recognizing a script as a
/// one-shot build even if the manifest didn't say so).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Service,
    Build,
    Task,
}

impl Runtime {
    pub fn auto_port(&self) -> bool {
        self.port == 0
    }
}
