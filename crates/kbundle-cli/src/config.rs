//! Project configuration (`kbundle.yaml`)
//!
//! Every setting can also be given on the command line; flags win. Relative
//! paths in the file are resolved against the file's directory.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{CliError, Result};

pub const CONFIG_FILE: &str = "kbundle.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProjectConfig {
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default)]
    pub manifests_dir: Option<PathBuf>,
    #[serde(default)]
    pub crds_dir: Option<PathBuf>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub extra_service_accounts: Vec<String>,
}

impl ProjectConfig {
    /// Load the explicit config file, or `kbundle.yaml` in the working directory
    ///
    /// An explicit file must exist; a missing implicit one yields the
    /// default (empty) configuration.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.is_file() {
                    return Err(CliError::config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                path.to_path_buf()
            }
            None => {
                let path = PathBuf::from(CONFIG_FILE);
                if !path.is_file() {
                    return Ok(Self::default());
                }
                path
            }
        };

        tracing::debug!(path = %path.display(), "loading project config");
        let content = std::fs::read_to_string(&path)?;
        let config = Self::from_yaml(&content)
            .map_err(|e| CliError::config(format!("{}: {}", path.display(), e)))?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(config.resolve_paths(base))
    }

    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    fn resolve_paths(mut self, base: &Path) -> Self {
        let resolve = |path: Option<PathBuf>| {
            path.map(|p| if p.is_absolute() { p } else { base.join(p) })
        };
        self.manifests_dir = resolve(self.manifests_dir);
        self.crds_dir = resolve(self.crds_dir);
        self.output_dir = resolve(self.output_dir);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_yaml() {
        let config = ProjectConfig::from_yaml(
            r#"
packageName: memcached-operator
manifestsDir: config
crdsDir: config/crd/bases
extraServiceAccounts:
- metrics-reader
"#,
        )
        .unwrap();

        assert_eq!(config.package_name.as_deref(), Some("memcached-operator"));
        assert_eq!(config.manifests_dir, Some(PathBuf::from("config")));
        assert_eq!(config.extra_service_accounts, vec!["metrics-reader"]);
        assert!(config.output_dir.is_none());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(ProjectConfig::from_yaml("package: typo\n").is_err());
    }

    #[test]
    fn test_empty_file() {
        let config = ProjectConfig::from_yaml("\n").unwrap();
        assert!(config.package_name.is_none());
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "manifestsDir: config\noutputDir: /tmp/bundle\n").unwrap();

        let config = ProjectConfig::load(Some(&path)).unwrap();
        assert_eq!(config.manifests_dir, Some(dir.path().join("config")));
        assert_eq!(config.output_dir, Some(PathBuf::from("/tmp/bundle")));
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let err = ProjectConfig::load(Some(Path::new("/nonexistent/kbundle.yaml"))).unwrap_err();
        assert!(matches!(err, CliError::Config { .. }));
    }
}
