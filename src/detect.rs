//! A minimal, filesystem-sniffing `RuntimeDetector` (§1: "the core ships
//! one minimal ... implementation ... as a convenience"; real prerequisite
//! checks and framework-aware detection are an external collaborator's
//! job). Looks at a handful of well-known marker files in a service's
//! `workdir` and picks a conventional launch command for the language it
//! finds.
//!
//! Authored fresh — no file in the retrieval pack does on-disk runtime
//! detection — but kept in the teacher's manual-string-matching idiom
//! (`extract_charge_point_id` in `interfaces/ws/ocpp_server.rs` favors hand
//! rolled parsing over a dependency) rather than reaching for a crate.

use std::path::Path;

use async_trait::async_trait;

use crate::domain::ports::inbound::RuntimeDetector;
use crate::domain::runtime::{Runtime, RuntimeKind};
use crate::domain::service::{Language, Mode, Service};
use crate::support::DomainError;

/// Sniffs `package.json`, `requirements.txt`/`pyproject.toml`, `*.csproj`,
/// and `Dockerfile`/`docker-compose.yml` to guess a service's language when
/// the manifest left it undeclared, then derives a conventional command for
/// that language.
pub struct FsRuntimeDetector;

#[async_trait]
impl RuntimeDetector for FsRuntimeDetector {
    async fn detect(&self, service: &Service) -> Result<Runtime, DomainError> {
        let language = sniff_language(&service.workdir).unwrap_or(service.language);
        let (command, args, framework) = plan_for(language, &service.workdir)
            .await
            .ok_or_else(|| {
                DomainError::Detection(
                    service.name.clone(),
                    format!("no launch command known for language {language:?}"),
                )
            })?;

        let kind = match service.mode {
            Mode::Build => RuntimeKind::Build,
            Mode::Task => RuntimeKind::Task,
            Mode::Service => RuntimeKind::Service,
        };

        Ok(Runtime {
            command,
            args,
            workdir: service.workdir.clone(),
            env: service.env.clone(),
            port: service.port.unwrap_or(0),
            language,
            framework,
            kind,
        })
    }
}

fn sniff_language(workdir: &Path) -> Option<Language> {
    if workdir.join("package.json").is_file() {
        return Some(Language::Node);
    }
    if workdir.join("requirements.txt").is_file() || workdir.join("pyproject.toml").is_file() {
        return Some(Language::Python);
    }
    if has_csproj(workdir) {
        return Some(Language::Dotnet);
    }
    if workdir.join("Dockerfile").is_file() || workdir.join("docker-compose.yml").is_file() {
        return Some(Language::Container);
    }
    None
}

fn has_csproj(workdir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(workdir) else {
        return false;
    };
    entries
        .filter_map(Result::ok)
        .any(|e| e.path().extension().is_some_and(|ext| ext == "csproj"))
}

/// `(command, args, framework)` for a recognized language, or `None` if
/// this detector has no convention for it.
async fn plan_for(
    language: Language,
    workdir: &Path,
) -> Option<(String, Vec<String>, Option<String>)> {
    match language {
        Language::Node => {
            let framework = node_framework(workdir).await;
            Some(("npm".to_string(), vec!["start".to_string()], framework))
        }
        Language::Python => {
            let framework = python_framework(workdir).await;
            let entry = ["main.py", "app.py", "manage.py"]
                .into_iter()
                .find(|f| workdir.join(f).is_file())
                .unwrap_or("main.py");
            Some((
                "python3".to_string(),
                vec![entry.to_string()],
                framework,
            ))
        }
        Language::Dotnet => Some(("dotnet".to_string(), vec!["run".to_string()], None)),
        Language::Container => Some((
            "docker".to_string(),
            vec!["compose".to_string(), "up".to_string()],
            None,
        )),
        Language::Other => None,
    }
}

async fn node_framework(workdir: &Path) -> Option<String> {
    let text = tokio::fs::read_to_string(workdir.join("package.json"))
        .await
        .ok()?;
    for (needle, name) in [
        ("next", "next"),
        ("express", "express"),
        ("vite", "vite"),
        ("react-scripts", "create-react-app"),
        ("nestjs", "nestjs"),
    ] {
        if text.contains(needle) {
            return Some(name.to_string());
        }
    }
    None
}

async fn python_framework(workdir: &Path) -> Option<String> {
    let mut text = tokio::fs::read_to_string(workdir.join("requirements.txt"))
        .await
        .unwrap_or_default();
    text.push('\n');
    text.push_str(
        &tokio::fs::read_to_string(workdir.join("pyproject.toml"))
            .await
            .unwrap_or_default(),
    );
    let lower = text.to_ascii_lowercase();
    for (needle, name) in [
        ("fastapi", "fastapi"),
        ("django", "django"),
        ("flask", "flask"),
    ] {
        if lower.contains(needle) {
            return Some(name.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn service(workdir: std::path::PathBuf) -> Service {
        Service {
            name: "web".to_string(),
            workdir,
            language: Language::Other,
            port: Some(3000),
            env: HashMap::new(),
            mode: Mode::Service,
        }
    }

    #[tokio::test]
    async fn detects_node_from_package_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"dependencies":{"express":"^4"}}"#)
            .unwrap();

        let runtime = FsRuntimeDetector.detect(&service(dir.path().to_path_buf())).await.unwrap();
        assert_eq!(runtime.language, Language::Node);
        assert_eq!(runtime.command, "npm");
        assert_eq!(runtime.framework.as_deref(), Some("express"));
    }

    #[tokio::test]
    async fn detects_python_from_requirements() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "flask==3.0\n").unwrap();
        std::fs::write(dir.path().join("app.py"), "# entry\n").unwrap();

        let runtime = FsRuntimeDetector.detect(&service(dir.path().to_path_buf())).await.unwrap();
        assert_eq!(runtime.language, Language::Python);
        assert_eq!(runtime.args, vec!["app.py".to_string()]);
        assert_eq!(runtime.framework.as_deref(), Some("flask"));
    }

    #[tokio::test]
    async fn falls_back_to_declared_language_when_nothing_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut svc = service(dir.path().to_path_buf());
        svc.language = Language::Dotnet;

        let runtime = FsRuntimeDetector.detect(&svc).await.unwrap();
        assert_eq!(runtime.command, "dotnet");
    }

    #[tokio::test]
    async fn unrecognizable_language_is_a_detection_error() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path().to_path_buf());
        let result = FsRuntimeDetector.detect(&svc).await;
        assert!(matches!(result, Err(DomainError::Detection(..))));
    }
}
