//! Descriptor generation
//!
//! [`Generator`] turns a collected [`Manifests`] into a complete
//! ClusterServiceVersion. It starts from a baseline descriptor (explicit,
//! found among the manifests, or a minimal default) and overwrites
//! everything derived from the manifests: install strategy, owned CRDs,
//! examples, webhooks and related images. Hand-written fields of the
//! baseline are left alone.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use kbundle_core::{CrdDefinition, Manifests};
use kube::core::DynamicObject;
use regex::Regex;
use serde_json::Value;

use crate::descriptor::{
    ALM_EXAMPLES_ANNOTATION, CREATED_AT_ANNOTATION, ClusterServiceVersion, CrdDescription,
    StrategyDeploymentSpec, descriptor_file_name,
};
use crate::error::{CsvError, Result};
use crate::permissions::{
    RbacObjects, apply_cluster_role_permissions, apply_role_permissions, split_permissions,
};
use crate::related_images::{merge_related_images, related_images};
use crate::validation::{DescriptorValidator, ValidationReport};
use crate::version::{csv_name, parse_version};
use crate::webhooks::webhook_descriptions;

/// Lowercase DNS-style package names (`memcached-operator`)
const PACKAGE_NAME_PATTERN: &str = r"^[a-z0-9]([-a-z0-9.]*[a-z0-9])?$";

/// Output of one generation pass
#[derive(Debug, Clone)]
pub struct Generation {
    pub package: String,
    pub descriptor: ClusterServiceVersion,
    /// RBAC documents that could not be folded into the descriptor
    pub standalone: RbacObjects,
    /// Validation findings (warnings only; errors fail generation)
    pub report: ValidationReport,
}

/// Builder for [`Generator`]
#[derive(Debug, Clone, Default)]
pub struct GeneratorBuilder {
    package: String,
    version: Option<String>,
    from_version: Option<String>,
    extra_service_accounts: Vec<String>,
    base: Option<ClusterServiceVersion>,
    created_at: Option<DateTime<Utc>>,
}

impl GeneratorBuilder {
    /// Version of the generated descriptor
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Version the generated descriptor replaces
    pub fn from_version(mut self, version: impl Into<String>) -> Self {
        self.from_version = Some(version.into());
        self
    }

    /// Service accounts treated like the deployments' own
    pub fn extra_service_accounts(mut self, accounts: impl IntoIterator<Item = String>) -> Self {
        self.extra_service_accounts = accounts.into_iter().collect();
        self
    }

    /// Baseline descriptor, taking precedence over one found in the manifests
    pub fn base(mut self, base: ClusterServiceVersion) -> Self {
        self.base = Some(base);
        self
    }

    /// Fixed `createdAt` timestamp instead of the current time
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn build(self) -> Result<Generator> {
        let package_name = Regex::new(PACKAGE_NAME_PATTERN)
            .map_err(|e| CsvError::InvalidConfig(e.to_string()))?;
        if !package_name.is_match(&self.package) {
            return Err(CsvError::InvalidConfig(format!(
                "invalid package name {:?}: expected lowercase letters, digits, '-' and '.'",
                self.package
            )));
        }

        if let Some(version) = &self.version {
            parse_version("version", version)?;
        }
        if let Some(from_version) = &self.from_version {
            parse_version("from-version", from_version)?;
        }

        Ok(Generator {
            package: self.package,
            version: self.version,
            from_version: self.from_version,
            extra_service_accounts: self.extra_service_accounts,
            base: self.base,
            created_at: self.created_at,
            validator: DescriptorValidator::new()?,
        })
    }
}

/// Generates a ClusterServiceVersion for one package
pub struct Generator {
    package: String,
    version: Option<String>,
    from_version: Option<String>,
    extra_service_accounts: Vec<String>,
    base: Option<ClusterServiceVersion>,
    created_at: Option<DateTime<Utc>>,
    validator: DescriptorValidator,
}

impl Generator {
    pub fn builder(package: impl Into<String>) -> GeneratorBuilder {
        GeneratorBuilder {
            package: package.into(),
            ..Default::default()
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    /// Generate the descriptor for `manifests`
    ///
    /// Fails with [`CsvError::InvalidDescriptor`] when the result does not
    /// validate; warnings are logged and returned in the report.
    pub fn generate(&self, manifests: &Manifests) -> Result<Generation> {
        let mut csv = self.baseline(manifests)?;

        self.apply_version(&mut csv);
        let standalone = self.apply_install_strategy(&mut csv, manifests);
        apply_owned_crds(&mut csv, manifests);
        apply_examples(&mut csv, manifests)?;
        csv.spec.webhook_definitions = webhook_descriptions(manifests);
        csv.spec.related_images =
            merge_related_images(&csv.spec.related_images, related_images(manifests));

        let created_at = self.created_at.unwrap_or_else(Utc::now);
        csv.set_annotation(
            CREATED_AT_ANNOTATION,
            created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );

        let report = self.validator.validate(&csv)?;
        for warning in report.warnings() {
            tracing::warn!(path = %warning.path, "{}", warning.message);
        }
        let report = report.into_result()?;

        Ok(Generation {
            package: self.package.clone(),
            descriptor: csv,
            standalone,
            report,
        })
    }

    fn baseline(&self, manifests: &Manifests) -> Result<ClusterServiceVersion> {
        if let Some(base) = &self.base {
            return Ok(base.clone());
        }

        let prefix = format!("{}.", self.package);
        let collected = manifests.cluster_service_versions.iter().find(|object| {
            object
                .metadata
                .name
                .as_deref()
                .is_some_and(|name| name.starts_with(&prefix))
        });

        match collected {
            Some(object) => {
                tracing::debug!(
                    name = object.metadata.name.as_deref().unwrap_or_default(),
                    "using ClusterServiceVersion from manifests as baseline"
                );
                ClusterServiceVersion::from_object(object)
            }
            None => Ok(ClusterServiceVersion::new_default(&self.package)),
        }
    }

    fn apply_version(&self, csv: &mut ClusterServiceVersion) {
        if let Some(version) = &self.version {
            csv.metadata.name = Some(csv_name(&self.package, version));
            csv.spec.version = Some(version.clone());
        }
        if let Some(from_version) = &self.from_version {
            csv.spec.replaces = Some(csv_name(&self.package, from_version));
        }
    }

    fn apply_install_strategy(
        &self,
        csv: &mut ClusterServiceVersion,
        manifests: &Manifests,
    ) -> RbacObjects {
        let extra = &self.extra_service_accounts;
        let split = split_permissions(manifests, extra);

        let install = &mut csv.spec.install.spec;
        install.permissions = apply_role_permissions(manifests, &split.in_descriptor.roles, extra);
        install.cluster_permissions =
            apply_cluster_role_permissions(manifests, &split.in_descriptor.cluster_roles, extra);
        install.deployments = manifests
            .deployments
            .iter()
            .map(|deployment| StrategyDeploymentSpec {
                name: deployment.metadata.name.clone().unwrap_or_default(),
                label: deployment.metadata.labels.clone(),
                spec: deployment.spec.clone().unwrap_or_default(),
            })
            .collect();

        split.standalone
    }
}

/// Owned CRD descriptions for every served version, sorted by name then version
fn apply_owned_crds(csv: &mut ClusterServiceVersion, manifests: &Manifests) {
    let mut existing: HashMap<(String, String), CrdDescription> = csv
        .spec
        .custom_resource_definitions
        .owned
        .drain(..)
        .map(|description| {
            (
                (description.name.clone(), description.version.clone()),
                description,
            )
        })
        .collect();

    let served = manifests
        .v1_crds
        .iter()
        .flat_map(|crd| served_triples(crd))
        .chain(manifests.v1beta1_crds.iter().flat_map(|crd| served_triples(crd)));

    let mut owned: Vec<CrdDescription> = served
        .map(|(name, version, kind)| {
            match existing.remove(&(name.clone(), version.clone())) {
                Some(mut description) => {
                    description.kind = kind;
                    description
                }
                None => CrdDescription::bare(&name, &version, &kind),
            }
        })
        .collect();

    for ((name, version), _) in existing {
        tracing::debug!(%name, %version, "dropping description of a version that is not served");
    }

    owned.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.version.cmp(&b.version)));
    owned.dedup_by(|a, b| a.name == b.name && a.version == b.version);
    csv.spec.custom_resource_definitions.owned = owned;
}

fn served_triples(crd: &impl CrdDefinition) -> Vec<(String, String, String)> {
    crd.served_versions()
        .into_iter()
        .map(|version| (crd.crd_name().to_string(), version, crd.kind().to_string()))
        .collect()
}

/// `alm-examples`: every custom resource, sorted by apiVersion, kind and name
fn apply_examples(csv: &mut ClusterServiceVersion, manifests: &Manifests) -> Result<()> {
    let mut examples: Vec<DynamicObject> = manifests
        .custom_resources
        .iter()
        .cloned()
        .map(strip_server_fields)
        .collect();

    examples.sort_by_cached_key(|object| {
        let (api_version, kind) = object
            .types
            .as_ref()
            .map(|t| (t.api_version.clone(), t.kind.clone()))
            .unwrap_or_default();
        (api_version, kind, object.metadata.name.clone().unwrap_or_default())
    });

    let values = examples
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<Vec<Value>, _>>()?;
    let json = serde_json::to_string_pretty(&values)?;
    csv.set_annotation(ALM_EXAMPLES_ANNOTATION, json);
    Ok(())
}

fn strip_server_fields(mut object: DynamicObject) -> DynamicObject {
    let metadata = &mut object.metadata;
    metadata.namespace = None;
    metadata.resource_version = None;
    metadata.uid = None;
    metadata.creation_timestamp = None;
    metadata.generation = None;
    metadata.managed_fields = None;
    metadata.self_link = None;
    object
}

/// Write a descriptor as YAML to `writer`
///
/// The document is serialized in full before anything is written.
pub fn write_descriptor(writer: &mut impl Write, csv: &ClusterServiceVersion) -> Result<()> {
    let yaml = csv.to_yaml()?;
    writer.write_all(yaml.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Write `<dir>/<package>.clusterserviceversion.yaml`, replacing any existing file
pub fn write_descriptor_file(
    dir: &Path,
    package: &str,
    csv: &ClusterServiceVersion,
) -> Result<PathBuf> {
    let yaml = csv.to_yaml()?;
    std::fs::create_dir_all(dir)?;
    let path = dir.join(descriptor_file_name(package));
    std::fs::write(&path, yaml)?;
    Ok(path)
}

/// Load a baseline descriptor that must exist
pub fn load_base(path: &Path) -> Result<ClusterServiceVersion> {
    if !path.is_file() {
        return Err(CsvError::BaseNotFound {
            path: path.display().to_string(),
        });
    }
    ClusterServiceVersion::from_file(path)
}

/// Load `<dir>/<package>.clusterserviceversion.yaml` when present
pub fn find_base(dir: &Path, package: &str) -> Result<Option<ClusterServiceVersion>> {
    let path = dir.join(descriptor_file_name(package));
    if !path.is_file() {
        return Ok(None);
    }
    tracing::debug!(path = %path.display(), "found baseline descriptor");
    ClusterServiceVersion::from_file(&path).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kbundle_core::CrdPolicy;
    use tempfile::TempDir;

    const PROJECT: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: controller-manager
  labels:
    control-plane: controller-manager
spec:
  selector:
    matchLabels:
      control-plane: controller-manager
  template:
    metadata:
      labels:
        control-plane: controller-manager
    spec:
      serviceAccountName: controller-manager
      containers:
      - name: manager
        image: example.com/memcached-operator:v0.0.1
        env:
        - name: RELATED_IMAGE_MEMCACHED
          value: docker.io/library/memcached:1.6
---
apiVersion: rbac.authorization.k8s.io/v1
kind: Role
metadata:
  name: leader-election-role
rules:
- apiGroups: ["coordination.k8s.io"]
  resources: ["leases"]
  verbs: ["get", "create", "update"]
---
apiVersion: rbac.authorization.k8s.io/v1
kind: RoleBinding
metadata:
  name: leader-election-rolebinding
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: Role
  name: leader-election-role
subjects:
- kind: ServiceAccount
  name: controller-manager
  namespace: system
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: metrics-reader
rules:
- nonResourceURLs: ["/metrics"]
  verbs: ["get"]
---
apiVersion: apiextensions.k8s.io/v1beta1
kind: CustomResourceDefinition
metadata:
  name: memcacheds.cache.example.com
spec:
  group: cache.example.com
  names:
    kind: Memcached
    plural: memcacheds
  scope: Namespaced
  versions:
  - name: v1
    served: true
    storage: true
  - name: v1beta1
    served: false
    storage: false
---
apiVersion: cache.example.com/v1
kind: Memcached
metadata:
  name: memcached-sample
  namespace: default
  uid: 1b4e28ba-2fa1-11d2-883f-0016d3cca427
spec:
  size: 3
"#;

    const BASE: &str = r#"
apiVersion: operators.coreos.com/v1alpha1
kind: ClusterServiceVersion
metadata:
  name: memcached-operator.v0.0.0
  annotations:
    capabilities: Full Lifecycle
spec:
  displayName: Memcached Operator
  description: Runs memcached
  maturity: beta
  provider:
    name: Example
  maintainers:
  - name: Cache Team
    email: cache@example.com
  installModes:
  - type: OwnNamespace
    supported: true
  install:
    strategy: deployment
  customresourcedefinitions:
    owned:
    - name: memcacheds.cache.example.com
      version: v1
      kind: Memcached
      displayName: Memcached App
    - name: memcacheds.cache.example.com
      version: v1beta1
      kind: Memcached
      displayName: Legacy Memcached
  relatedImages:
  - name: bundled
    image: example.com/bundled:v1
"#;

    fn manifests() -> Manifests {
        let mut manifests = Manifests::new();
        manifests
            .add_documents(PROJECT, "project.yaml", CrdPolicy::Accept)
            .unwrap();
        manifests.deduplicate().unwrap().filter()
    }

    fn fixed_time(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn generate(builder: GeneratorBuilder) -> Generation {
        builder.build().unwrap().generate(&manifests()).unwrap()
    }

    #[test]
    fn test_version_and_replaces() {
        let generation = generate(
            Generator::builder("memcached-operator")
                .version("0.0.1")
                .from_version("0.0.0"),
        );
        let csv = &generation.descriptor;

        assert_eq!(csv.name(), "memcached-operator.v0.0.1");
        assert_eq!(csv.spec.version.as_deref(), Some("0.0.1"));
        assert_eq!(csv.spec.replaces.as_deref(), Some("memcached-operator.v0.0.0"));
    }

    #[test]
    fn test_invalid_versions_rejected_at_build() {
        let err = Generator::builder("memcached-operator")
            .version("01.2.3")
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, CsvError::InvalidVersion { .. }));

        let err = Generator::builder("memcached-operator")
            .from_version("v0.0.1")
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, CsvError::InvalidVersion { .. }));
    }

    #[test]
    fn test_invalid_package_name() {
        let err = Generator::builder("Memcached Operator").build().err().unwrap();
        assert!(matches!(err, CsvError::InvalidConfig(_)));
    }

    #[test]
    fn test_install_strategy() {
        let generation = generate(Generator::builder("memcached-operator"));
        let install = &generation.descriptor.spec.install.spec;

        assert_eq!(install.deployments.len(), 1);
        assert_eq!(install.deployments[0].name, "controller-manager");
        assert_eq!(install.permissions.len(), 1);
        assert_eq!(install.permissions[0].service_account_name, "controller-manager");
        assert!(install.cluster_permissions.is_empty());

        // The unbound ClusterRole is shipped next to the descriptor
        assert!(generation.standalone.roles.is_empty());
        assert_eq!(generation.standalone.cluster_roles.len(), 1);
        assert!(generation.standalone.role_bindings.is_empty());
    }

    #[test]
    fn test_owned_crds_only_served_versions() {
        let base = ClusterServiceVersion::from_yaml(BASE).unwrap();
        let generation = generate(Generator::builder("memcached-operator").base(base));
        let owned = &generation.descriptor.spec.custom_resource_definitions.owned;

        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].version, "v1");
        assert_eq!(owned[0].display_name.as_deref(), Some("Memcached App"));
    }

    #[test]
    fn test_baseline_fields_preserved() {
        let base = ClusterServiceVersion::from_yaml(BASE).unwrap();
        let generation = generate(Generator::builder("memcached-operator").base(base));
        let csv = &generation.descriptor;

        assert_eq!(csv.annotation("capabilities"), Some("Full Lifecycle"));
        assert_eq!(csv.spec.maturity.as_deref(), Some("beta"));
        assert_eq!(csv.spec.install_modes.len(), 1);
        let images: Vec<&str> = csv.spec.related_images.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(images, vec!["bundled", "memcached"]);
        assert!(generation.report.is_empty());
    }

    #[test]
    fn test_baseline_found_in_manifests() {
        let mut manifests = manifests();
        manifests
            .add_documents(BASE, "csv.yaml", CrdPolicy::Accept)
            .unwrap();

        let generator = Generator::builder("memcached-operator").build().unwrap();
        let generation = generator.generate(&manifests).unwrap();
        assert_eq!(generation.descriptor.spec.maturity.as_deref(), Some("beta"));

        let other = Generator::builder("other-operator").build().unwrap();
        let generation = other.generate(&manifests).unwrap();
        assert_eq!(generation.descriptor.name(), "other-operator.v0.0.0");
        assert_eq!(generation.descriptor.spec.maturity.as_deref(), Some("alpha"));
    }

    #[test]
    fn test_examples_annotation() {
        let generation = generate(Generator::builder("memcached-operator"));
        let examples = generation
            .descriptor
            .annotation(ALM_EXAMPLES_ANNOTATION)
            .unwrap();

        let parsed: Vec<Value> = serde_json::from_str(examples).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["metadata"]["name"], "memcached-sample");
        assert!(parsed[0]["metadata"].get("namespace").is_none());
        assert!(parsed[0]["metadata"].get("uid").is_none());
        assert_eq!(parsed[0]["spec"]["size"], 3);
    }

    #[test]
    fn test_deterministic_apart_from_created_at() {
        let first = generate(Generator::builder("memcached-operator").created_at(fixed_time(1)));
        let second = generate(Generator::builder("memcached-operator").created_at(fixed_time(2)));

        let mut a = first.descriptor;
        let mut b = second.descriptor;
        assert_eq!(a.annotation(CREATED_AT_ANNOTATION), Some("2024-05-01T01:00:00Z"));
        assert_ne!(a, b);

        a.remove_annotation(CREATED_AT_ANNOTATION);
        b.remove_annotation(CREATED_AT_ANNOTATION);
        assert_eq!(a.to_yaml().unwrap(), b.to_yaml().unwrap());
    }

    #[test]
    fn test_write_descriptor() {
        let generation = generate(Generator::builder("memcached-operator").version("0.0.1"));

        let mut out = Vec::new();
        write_descriptor(&mut out, &generation.descriptor).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("name: memcached-operator.v0.0.1"));

        let dir = TempDir::new().unwrap();
        let stale = dir.path().join("memcached-operator.clusterserviceversion.yaml");
        std::fs::write(&stale, "stale content that is much longer than nothing\n".repeat(500))
            .unwrap();

        let path = write_descriptor_file(dir.path(), "memcached-operator", &generation.descriptor)
            .unwrap();
        assert_eq!(path, stale);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), text);
    }

    #[test]
    fn test_load_and_find_base() {
        let dir = TempDir::new().unwrap();

        let missing = dir.path().join("missing.yaml");
        assert!(matches!(
            load_base(&missing).unwrap_err(),
            CsvError::BaseNotFound { .. }
        ));
        assert!(find_base(dir.path(), "memcached-operator").unwrap().is_none());

        std::fs::write(
            dir.path().join("memcached-operator.clusterserviceversion.yaml"),
            BASE,
        )
        .unwrap();
        let found = find_base(dir.path(), "memcached-operator").unwrap().unwrap();
        assert_eq!(found.spec.description, "Runs memcached");
    }
}
