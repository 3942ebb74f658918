//! Bundle manifests directory output
//!
//! A bundle's `manifests/` directory holds the descriptor, one file per CRD
//! and the RBAC objects the descriptor cannot express. Every file is
//! rendered before the first one is written, and YAML files left behind by
//! an earlier run that this run did not write are removed afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use kbundle_core::{Manifests, split_api_version, write_crd_files};
use serde_json::Value;

use crate::descriptor::descriptor_file_name;
use crate::error::{CsvError, Result};
use crate::generator::Generation;

/// Paths written by [`write_bundle`]
#[derive(Debug, Clone, Default)]
pub struct BundleFiles {
    pub descriptor: PathBuf,
    pub crds: Vec<PathBuf>,
    pub standalone: Vec<PathBuf>,
}

impl BundleFiles {
    /// Number of files written, descriptor included
    pub fn count(&self) -> usize {
        1 + self.crds.len() + self.standalone.len()
    }
}

/// Write the descriptor, CRDs and standalone objects into `dir`
pub fn write_bundle(dir: &Path, generation: &Generation, manifests: &Manifests) -> Result<BundleFiles> {
    let descriptor_yaml = generation.descriptor.to_yaml()?;

    let mut standalone: BTreeMap<String, String> = BTreeMap::new();
    for value in generation.standalone.to_values()? {
        let file = object_file_name(&value);
        if standalone.contains_key(&file) {
            return Err(CsvError::BundleFileCollision { file });
        }
        standalone.insert(file, serde_yaml::to_string(&value)?);
    }

    std::fs::create_dir_all(dir)?;
    let crds = write_crd_files(dir, &manifests.v1_crds, &manifests.v1beta1_crds)?;

    let descriptor = dir.join(descriptor_file_name(&generation.package));
    std::fs::write(&descriptor, descriptor_yaml)?;

    let mut written = Vec::with_capacity(standalone.len());
    for (file, content) in standalone {
        let path = dir.join(file);
        std::fs::write(&path, content)?;
        written.push(path);
    }

    let current: BTreeSet<&Path> = std::iter::once(descriptor.as_path())
        .chain(crds.iter().map(PathBuf::as_path))
        .chain(written.iter().map(PathBuf::as_path))
        .collect();
    remove_stale_files(dir, &current)?;

    tracing::debug!(
        dir = %dir.display(),
        crds = crds.len(),
        standalone = written.len(),
        "bundle written"
    );

    Ok(BundleFiles {
        descriptor,
        crds,
        standalone: written,
    })
}

/// Remove `*.yaml` files in `dir` that are not part of the current bundle
fn remove_stale_files(dir: &Path, current: &BTreeSet<&Path>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_yaml = path.extension().is_some_and(|ext| ext == "yaml");
        if is_yaml && path.is_file() && !current.contains(path.as_path()) {
            tracing::debug!(path = %path.display(), "removing stale bundle file");
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// `<name>_<group>_<version>_<kind>.yaml`, lowercased, core group omitted
pub fn object_file_name(value: &Value) -> String {
    let text = |key: &str| value.get(key).and_then(Value::as_str).unwrap_or_default();
    let name = value
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let (group, version) = split_api_version(text("apiVersion"));

    let parts: Vec<&str> = [name, group, version, text("kind")]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect();
    format!("{}.yaml", parts.join("_").to_lowercase())
}
