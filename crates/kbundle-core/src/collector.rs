//! Manifest collection
//!
//! [`Manifests`] holds every typed document gathered from a project's
//! manifest directory (or a single multi-document stream), one list per
//! kind. Collection is read-only with respect to the source files.
//!
//! Directory mode deliberately ignores CRDs found while walking the
//! manifest tree: CRDs are loaded only from the dedicated CRD directory so
//! that both schema dialects are picked up from one place. Stream mode has
//! no such directory and accepts CRDs inline.

use std::io::Read;
use std::path::Path;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::core::DynamicObject;
use serde::Deserialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::crd::CustomResourceDefinitionV1Beta1;
use crate::document::Document;
use crate::error::{CoreError, Result};

/// Whether CRD documents are accepted from a given source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrdPolicy {
    /// Keep CRDs and every other document
    Accept,
    /// Skip CRDs, keep every other document
    Skip,
    /// Keep only CRDs
    Only,
}

/// Every document collected for one generation pass
#[derive(Debug, Clone, Default)]
pub struct Manifests {
    pub roles: Vec<Role>,
    pub cluster_roles: Vec<ClusterRole>,
    pub role_bindings: Vec<RoleBinding>,
    pub cluster_role_bindings: Vec<ClusterRoleBinding>,
    pub service_accounts: Vec<ServiceAccount>,
    pub deployments: Vec<Deployment>,
    pub v1_crds: Vec<CustomResourceDefinition>,
    pub v1beta1_crds: Vec<CustomResourceDefinitionV1Beta1>,
    pub custom_resources: Vec<DynamicObject>,
    pub validating_webhook_configurations: Vec<ValidatingWebhookConfiguration>,
    pub mutating_webhook_configurations: Vec<MutatingWebhookConfiguration>,
    pub services: Vec<Service>,
    pub cluster_service_versions: Vec<DynamicObject>,
    pub others: Vec<DynamicObject>,
}

impl Manifests {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect from a manifest directory and an optional CRD directory
    ///
    /// The result is deduplicated and filtered.
    pub fn from_dirs(root: impl AsRef<Path>, crds_dir: Option<&Path>) -> Result<Self> {
        let mut manifests = Self::new();
        manifests.add_dir(root.as_ref(), CrdPolicy::Skip)?;
        if let Some(crds_dir) = crds_dir {
            manifests.add_dir(crds_dir, CrdPolicy::Only)?;
        }
        Ok(manifests.deduplicate()?.filter())
    }

    /// Collect from a single multi-document stream
    ///
    /// CRDs are accepted inline. The result is deduplicated and filtered.
    pub fn from_reader(mut reader: impl Read) -> Result<Self> {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;

        let mut manifests = Self::new();
        manifests.add_documents(&content, "<stdin>", CrdPolicy::Accept)?;
        Ok(manifests.deduplicate()?.filter())
    }

    /// Walk a directory depth-first and add every manifest file found
    ///
    /// Entries are visited in file name order; hidden files and directories
    /// are skipped, as are files without a `.yaml`, `.yml` or `.json`
    /// extension.
    pub fn add_dir(&mut self, dir: &Path, crds: CrdPolicy) -> Result<()> {
        let walker = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() || !is_manifest_file(entry.path()) {
                continue;
            }

            let content = std::fs::read_to_string(entry.path())?;
            let source = entry
                .path()
                .strip_prefix(dir)
                .unwrap_or(entry.path())
                .display()
                .to_string();
            self.add_documents(&content, &source, crds)?;
        }

        Ok(())
    }

    /// Parse a `---`-delimited stream and add its documents
    ///
    /// Returns the number of documents added. Documents without
    /// `apiVersion`/`kind` and malformed documents of unrecognised kinds are
    /// skipped; a document of a recognised kind that does not parse aborts
    /// the whole call.
    pub fn add_documents(&mut self, content: &str, source: &str, crds: CrdPolicy) -> Result<usize> {
        let mut added = 0;

        for (index, raw) in serde_yaml::Deserializer::from_str(content).enumerate() {
            let value = Value::deserialize(raw).map_err(|e| CoreError::InvalidDocument {
                source_name: source.to_string(),
                message: format!("document {}: {}", index, e),
            })?;

            if value.is_null() {
                continue;
            }
            if !value.is_object() {
                tracing::debug!(source, index, "skipping non-mapping document");
                continue;
            }

            let Some(document) = Document::parse(value, source)? else {
                tracing::debug!(source, index, "skipping document without apiVersion/kind");
                continue;
            };

            let is_crd = document.kind().is_crd();
            let keep = match crds {
                CrdPolicy::Accept => true,
                CrdPolicy::Skip => !is_crd,
                CrdPolicy::Only => is_crd,
            };
            if !keep {
                tracing::debug!(
                    source,
                    kind = %document.kind(),
                    name = document.name(),
                    "document not collected from this source"
                );
                continue;
            }

            self.add_document(document);
            added += 1;
        }

        Ok(added)
    }

    /// Add a single typed document to its list
    pub fn add_document(&mut self, document: Document) {
        match document {
            Document::Role(d) => self.roles.push(d),
            Document::ClusterRole(d) => self.cluster_roles.push(d),
            Document::RoleBinding(d) => self.role_bindings.push(d),
            Document::ClusterRoleBinding(d) => self.cluster_role_bindings.push(d),
            Document::ServiceAccount(d) => self.service_accounts.push(d),
            Document::Deployment(d) => self.deployments.push(d),
            Document::CustomResourceDefinitionV1(d) => self.v1_crds.push(d),
            Document::CustomResourceDefinitionV1Beta1(d) => self.v1beta1_crds.push(d),
            Document::CustomResource(d) => self.custom_resources.push(d),
            Document::ValidatingWebhookConfiguration(d) => {
                self.validating_webhook_configurations.push(d)
            }
            Document::MutatingWebhookConfiguration(d) => {
                self.mutating_webhook_configurations.push(d)
            }
            Document::Service(d) => self.services.push(d),
            Document::ClusterServiceVersion(d) => self.cluster_service_versions.push(d),
            Document::Other(d) => self.others.push(d),
        }
    }

    /// Total number of collected documents
    pub fn len(&self) -> usize {
        self.roles.len()
            + self.cluster_roles.len()
            + self.role_bindings.len()
            + self.cluster_role_bindings.len()
            + self.service_accounts.len()
            + self.deployments.len()
            + self.v1_crds.len()
            + self.v1beta1_crds.len()
            + self.custom_resources.len()
            + self.validating_webhook_configurations.len()
            + self.mutating_webhook_configurations.len()
            + self.services.len()
            + self.cluster_service_versions.len()
            + self.others.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find a Service by name
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services
            .iter()
            .find(|s| s.metadata.name.as_deref() == Some(name))
    }
}

fn is_hidden(file_name: &std::ffi::OsStr) -> bool {
    file_name.to_string_lossy().starts_with('.')
}

fn is_manifest_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            matches!(ext.as_str(), "yaml" | "yml" | "json")
        })
        .unwrap_or(false)
}
