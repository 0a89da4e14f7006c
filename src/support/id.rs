//! Stable, non-cryptographic keys derived from a project directory.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

/// A lowercase-hex key stable for a given canonical project path. Used to key
/// the process-wide registries (log manager, service registry, dashboard
/// server) so that distinct project directories never collide.
pub fn project_key(project_dir: &Path) -> String {
    let canonical = project_dir
        .canonicalize()
        .unwrap_or_else(|_| project_dir.to_path_buf());

    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// `[A-Za-z0-9_.-]+`, length <= 128, matching the manifest's service-name grammar.
pub fn is_valid_service_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn project_key_is_deterministic() {
        let p = PathBuf::from("/tmp/does-not-need-to-exist-for-hashing");
        assert_eq!(project_key(&p), project_key(&p));
    }

    #[test]
    fn service_name_validation() {
        assert!(is_valid_service_name("web-api_1.0"));
        assert!(!is_valid_service_name(""));
        assert!(!is_valid_service_name("has space"));
        assert!(!is_valid_service_name(&"x".repeat(129)));
    }
}
