//! The one minimal manifest reader this crate ships as a convenience (§1,
//! §6): parses a TOML file into `domain::manifest::Manifest` and stamps its
//! `root` from the file's own parent directory. Real manifest authoring
//! (schema validation beyond serde's own, include-files, templating) is an
//! external collaborator's concern.
//!
//! Grounded in the teacher's `AppConfig::load` (`std::fs::read_to_string` +
//! `toml::from_str`, missing file vs malformed file handled distinctly),
//! adapted to async I/O since manifest loading happens on the bootstrap
//! path alongside everything else `tokio::fs` already touches.

use std::path::Path;

use crate::domain::manifest::Manifest;
use crate::support::InfraError;

/// Loads and parses the manifest at `path`. Unlike `AppConfig::load`, a
/// missing manifest is an error — there is no sensible default "no
/// services" manifest to fall back to silently.
pub async fn load_manifest(path: &Path) -> Result<Manifest, InfraError> {
    let raw = tokio::fs::read_to_string(path).await?;
    let mut manifest: Manifest = toml::from_str(&raw)?;
    manifest.root = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| std::path::PathBuf::from("."));
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_services_and_stamps_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devrig.toml");
        tokio::fs::write(
            &path,
            r#"
            name = "sample"

            [services.web]
            project = "services/web"
            port = 3000

            [services.worker]
            project = "services/worker"
            mode = "task"
            "#,
        )
        .await
        .unwrap();

        let manifest = load_manifest(&path).await.unwrap();
        assert_eq!(manifest.name, "sample");
        assert_eq!(manifest.root, dir.path());
        assert_eq!(
            manifest.workdir_for("web").unwrap(),
            dir.path().join("services/web")
        );
        assert_eq!(
            manifest.service_for("worker").unwrap().mode,
            crate::domain::service::Mode::Task
        );
    }

    #[tokio::test]
    async fn missing_manifest_is_an_error() {
        let result = load_manifest(Path::new("/nonexistent/devrig.toml")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn malformed_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devrig.toml");
        tokio::fs::write(&path, "not = [valid toml").await.unwrap();
        let result = load_manifest(&path).await;
        assert!(result.is_err());
    }
}
