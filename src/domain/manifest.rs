//! The manifest shape the core consumes (§6 External Interfaces). Manifest
//! *parsing* is an external collaborator's job (§1 Non-goals); this module
//! only defines the parsed shape the rest of the core depends on, plus the
//! one minimal reader this crate ships as a convenience (`manifest_io`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::service::{Language, Mode, Service};

/// `ServiceDef` as described in §6: `{project, language?, port?, env?, ports?}`.
/// `project` is a path relative to the manifest's own directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDef {
    pub project: PathBuf,
    #[serde(default)]
    pub language: Option<Language>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Additional named ports beyond the primary one (reserved for detector
    /// use; the core itself only reasons about the primary `port`).
    #[serde(default)]
    pub ports: HashMap<String, u16>,
    #[serde(default)]
    pub mode: Mode,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Manifest {
    pub name: String,
    pub services: HashMap<String, ServiceDef>,
    /// Pre/post lifecycle hooks. Conversion to executable commands is an
    /// external collaborator's concern (§1 Non-goals); the core carries the
    /// raw shape through untouched.
    #[serde(default)]
    pub hooks: HashMap<String, Vec<String>>,
    /// Free-form per-manifest logging overrides, opaque to the core.
    #[serde(default)]
    pub logs: HashMap<String, String>,
    /// Directory the manifest was loaded from; `ServiceDef::project` is
    /// resolved relative to this. Not part of the serialized shape.
    #[serde(skip)]
    pub root: PathBuf,
}

impl Manifest {
    /// Absolute working directory for a named service.
    pub fn workdir_for(&self, service_name: &str) -> Option<PathBuf> {
        self.services
            .get(service_name)
            .map(|def| resolve_under(&self.root, &def.project))
    }

    pub fn service_names(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    /// Builds the runtime-independent `Service` the detector expects,
    /// resolving `workdir` and defaulting an undeclared language to `Other`.
    pub fn service_for(&self, service_name: &str) -> Option<Service> {
        let def = self.services.get(service_name)?;
        Some(Service {
            name: service_name.to_string(),
            workdir: resolve_under(&self.root, &def.project),
            language: def.language.unwrap_or(Language::Other),
            port: def.port,
            env: def.env.clone(),
            mode: def.mode,
        })
    }
}

fn resolve_under(root: &Path, project: &Path) -> PathBuf {
    if project.is_absolute() {
        project.to_path_buf()
    } else {
        root.join(project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_project_resolves_under_root() {
        let mut manifest = Manifest {
            root: PathBuf::from("/srv/app"),
            ..Default::default()
        };
        manifest.services.insert(
            "web".to_string(),
            ServiceDef {
                project: PathBuf::from("services/web"),
                language: None,
                port: Some(3000),
                env: HashMap::new(),
                ports: HashMap::new(),
                mode: Mode::Service,
            },
        );
        assert_eq!(
            manifest.workdir_for("web").unwrap(),
            PathBuf::from("/srv/app/services/web")
        );
    }

    #[test]
    fn absolute_project_passes_through() {
        let mut manifest = Manifest {
            root: PathBuf::from("/srv/app"),
            ..Default::default()
        };
        manifest.services.insert(
            "web".to_string(),
            ServiceDef {
                project: PathBuf::from("/elsewhere/web"),
                language: None,
                port: None,
                env: HashMap::new(),
                ports: HashMap::new(),
                mode: Mode::Service,
            },
        );
        assert_eq!(
            manifest.workdir_for("web").unwrap(),
            PathBuf::from("/elsewhere/web")
        );
    }

    #[test]
    fn service_for_defaults_undeclared_language_to_other() {
        let mut manifest = Manifest {
            root: PathBuf::from("/srv/app"),
            ..Default::default()
        };
        manifest.services.insert(
            "web".to_string(),
            ServiceDef {
                project: PathBuf::from("services/web"),
                language: None,
                port: Some(3000),
                env: HashMap::new(),
                ports: HashMap::new(),
                mode: Mode::Service,
            },
        );
        let service = manifest.service_for("web").unwrap();
        assert_eq!(service.language, Language::Other);
        assert_eq!(service.port, Some(3000));
    }
}
