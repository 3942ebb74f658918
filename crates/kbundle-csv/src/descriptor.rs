//! ClusterServiceVersion types
//!
//! Only the fields the generator reads or writes are modelled. Everything
//! else a hand-authored descriptor carries (API service definitions, native
//! APIs, spec/status descriptors on owned CRDs, ...) is kept in `extra` maps
//! and written back untouched.

use std::collections::BTreeMap;
use std::path::Path;

use k8s_openapi::api::admissionregistration::v1::RuleWithOperations;
use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::rbac::v1::PolicyRule;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CsvError, Result};
use crate::version::csv_name;

pub const CSV_API_VERSION: &str = "operators.coreos.com/v1alpha1";
pub const CSV_KIND: &str = "ClusterServiceVersion";

/// File name infix of descriptor files (`<package>.clusterserviceversion.yaml`)
pub const DESCRIPTOR_SUFFIX: &str = "clusterserviceversion";

/// Annotation holding the JSON array of example custom resources
pub const ALM_EXAMPLES_ANNOTATION: &str = "alm-examples";

/// Annotation holding the generation timestamp
pub const CREATED_AT_ANNOTATION: &str = "createdAt";

pub const CAPABILITIES_ANNOTATION: &str = "capabilities";

/// The only install strategy OLM supports
pub const DEPLOYMENT_STRATEGY: &str = "deployment";

/// Port webhooks are assumed to listen on when the service reference has none
pub const DEFAULT_WEBHOOK_PORT: i32 = 443;

/// Maturity given to freshly created descriptors
pub const DEFAULT_MATURITY: &str = "alpha";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterServiceVersion {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: CsvSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<Maintainer>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<AppLink>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<AppLink>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icon: Vec<Icon>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maturity: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_kube_version: Option<String>,

    #[serde(default)]
    pub install_modes: Vec<InstallMode>,

    #[serde(default)]
    pub install: NamedInstallStrategy,

    #[serde(default, rename = "customresourcedefinitions")]
    pub custom_resource_definitions: CustomResourceDefinitions,

    #[serde(
        default,
        rename = "webhookdefinitions",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub webhook_definitions: Vec<WebhookDescription>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_images: Vec<RelatedImage>,

    /// Fields the generator does not touch
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maintainer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppLink {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Icon {
    #[serde(rename = "base64data")]
    pub data: String,
    #[serde(rename = "mediatype")]
    pub media_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InstallModeType {
    OwnNamespace,
    SingleNamespace,
    MultiNamespace,
    AllNamespaces,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallMode {
    #[serde(rename = "type")]
    pub mode: InstallModeType,
    pub supported: bool,
}

/// Install modes of a freshly created descriptor
pub fn default_install_modes() -> Vec<InstallMode> {
    [
        (InstallModeType::OwnNamespace, true),
        (InstallModeType::SingleNamespace, true),
        (InstallModeType::MultiNamespace, false),
        (InstallModeType::AllNamespaces, true),
    ]
    .into_iter()
    .map(|(mode, supported)| InstallMode { mode, supported })
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedInstallStrategy {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub spec: StrategyDetailsDeployment,
}

fn default_strategy() -> String {
    DEPLOYMENT_STRATEGY.to_string()
}

impl Default for NamedInstallStrategy {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            spec: StrategyDetailsDeployment::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyDetailsDeployment {
    #[serde(default)]
    pub deployments: Vec<StrategyDeploymentSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<StrategyDeploymentPermissions>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_permissions: Vec<StrategyDeploymentPermissions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDeploymentSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub spec: DeploymentSpec,
}

/// Rules granted to one service account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyDeploymentPermissions {
    pub service_account_name: String,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomResourceDefinitions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owned: Vec<CrdDescription>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<CrdDescription>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdDescription {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Resources, spec/status/action descriptors
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl CrdDescription {
    /// A description carrying only the identifying triple
    pub fn bare(name: &str, version: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WebhookAdmissionType {
    ValidatingAdmissionWebhook,
    MutatingAdmissionWebhook,
    ConversionWebhook,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDescription {
    pub generate_name: String,

    #[serde(rename = "type")]
    pub webhook_type: WebhookAdmissionType,

    #[serde(default)]
    pub deployment_name: String,

    #[serde(default = "default_container_port")]
    pub container_port: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<IntOrString>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleWithOperations>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_selector: Option<LabelSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_effects: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub admission_review_versions: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reinvocation_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_path: Option<String>,

    #[serde(
        default,
        rename = "conversionCRDs",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub conversion_crds: Vec<String>,
}

fn default_container_port() -> i32 {
    DEFAULT_WEBHOOK_PORT
}

impl WebhookDescription {
    /// A description of the given type with every optional field unset
    pub fn new(generate_name: impl Into<String>, webhook_type: WebhookAdmissionType) -> Self {
        Self {
            generate_name: generate_name.into(),
            webhook_type,
            deployment_name: String::new(),
            container_port: DEFAULT_WEBHOOK_PORT,
            target_port: None,
            rules: Vec::new(),
            failure_policy: None,
            match_policy: None,
            object_selector: None,
            side_effects: None,
            timeout_seconds: None,
            admission_review_versions: Vec::new(),
            reinvocation_policy: None,
            webhook_path: None,
            conversion_crds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelatedImage {
    pub name: String,
    pub image: String,
}

impl ClusterServiceVersion {
    /// Minimal descriptor for a package that has none yet
    pub fn new_default(package: &str) -> Self {
        let annotations = BTreeMap::from([
            (
                CAPABILITIES_ANNOTATION.to_string(),
                "Basic Install".to_string(),
            ),
            (ALM_EXAMPLES_ANNOTATION.to_string(), "[]".to_string()),
        ]);

        Self {
            api_version: CSV_API_VERSION.to_string(),
            kind: CSV_KIND.to_string(),
            metadata: ObjectMeta {
                name: Some(csv_name(package, "0.0.0")),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: CsvSpec {
                display_name: display_name(package),
                maturity: Some(DEFAULT_MATURITY.to_string()),
                version: Some("0.0.0".to_string()),
                install_modes: default_install_modes(),
                ..Default::default()
            },
            status: None,
        }
    }

    /// Parse a descriptor from YAML
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| CsvError::InvalidBase(e.to_string()))
    }

    /// Load a descriptor file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Convert a collected dynamic object into a descriptor
    pub fn from_object(object: &DynamicObject) -> Result<Self> {
        let value = serde_json::to_value(object)?;
        serde_json::from_value(value).map_err(|e| CsvError::InvalidBase(e.to_string()))
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// `metadata.name`, or an empty string when unset
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(key))
            .map(String::as_str)
    }

    pub fn set_annotation(&mut self, key: &str, value: impl Into<String>) {
        self.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.into());
    }

    pub fn remove_annotation(&mut self, key: &str) -> Option<String> {
        self.metadata
            .annotations
            .as_mut()
            .and_then(|annotations| annotations.remove(key))
    }
}

/// Descriptor file name for a package
pub fn descriptor_file_name(package: &str) -> String {
    format!("{}.{}.yaml", package, DESCRIPTOR_SUFFIX)
}

/// Human-readable name derived from a package name
///
/// `memcached-operator` becomes `Memcached Operator`.
pub fn display_name(package: &str) -> String {
    package
        .split(['-', '_', '.'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const HAND_AUTHORED: &str = r#"
apiVersion: operators.coreos.com/v1alpha1
kind: ClusterServiceVersion
metadata:
  name: memcached-operator.v0.0.1
  annotations:
    capabilities: Full Lifecycle
spec:
  displayName: Memcached
  description: Runs memcached
  maturity: beta
  version: 0.0.1
  installModes:
  - type: OwnNamespace
    supported: true
  install:
    strategy: deployment
    spec:
      deployments: []
  customresourcedefinitions:
    owned:
    - name: memcacheds.cache.example.com
      version: v1alpha1
      kind: Memcached
      displayName: Memcached App
      specDescriptors:
      - path: size
        displayName: Size
  apiservicedefinitions: {}
  nativeAPIs:
  - group: ""
    version: v1
    kind: Pod
"#;

    #[test]
    fn test_default_descriptor() {
        let csv = ClusterServiceVersion::new_default("memcached-operator");

        assert_eq!(csv.name(), "memcached-operator.v0.0.0");
        assert_eq!(csv.spec.display_name, "Memcached Operator");
        assert_eq!(csv.spec.maturity.as_deref(), Some("alpha"));
        assert_eq!(csv.annotation(ALM_EXAMPLES_ANNOTATION), Some("[]"));
        assert_eq!(csv.spec.install.strategy, DEPLOYMENT_STRATEGY);
        assert_eq!(csv.spec.install_modes.len(), 4);
        assert!(
            csv.spec
                .install_modes
                .iter()
                .any(|m| m.mode == InstallModeType::MultiNamespace && !m.supported)
        );
    }

    #[test]
    fn test_hand_authored_fields_preserved() {
        let csv = ClusterServiceVersion::from_yaml(HAND_AUTHORED).unwrap();
        assert!(csv.spec.extra.contains_key("apiservicedefinitions"));
        assert!(csv.spec.extra.contains_key("nativeAPIs"));

        let owned = &csv.spec.custom_resource_definitions.owned[0];
        assert_eq!(owned.display_name.as_deref(), Some("Memcached App"));
        assert!(owned.extra.contains_key("specDescriptors"));

        let yaml = csv.to_yaml().unwrap();
        assert!(yaml.contains("nativeAPIs"));
        assert!(yaml.contains("specDescriptors"));

        let reparsed = ClusterServiceVersion::from_yaml(&yaml).unwrap();
        assert_eq!(reparsed, csv);
    }

    #[test]
    fn test_invalid_base() {
        let err = ClusterServiceVersion::from_yaml("apiVersion: [").unwrap_err();
        assert!(matches!(err, CsvError::InvalidBase(_)));
    }

    #[test]
    fn test_annotations() {
        let mut csv = ClusterServiceVersion::new_default("app");
        csv.set_annotation(CREATED_AT_ANNOTATION, "now");
        assert_eq!(csv.annotation(CREATED_AT_ANNOTATION), Some("now"));
        assert_eq!(
            csv.remove_annotation(CREATED_AT_ANNOTATION).as_deref(),
            Some("now")
        );
        assert!(csv.annotation(CREATED_AT_ANNOTATION).is_none());
    }

    #[test]
    fn test_display_name() {
        insta::assert_snapshot!(display_name("memcached-operator"), @"Memcached Operator");
        insta::assert_snapshot!(display_name("my_cool.app"), @"My Cool App");
    }

    #[test]
    fn test_descriptor_file_name() {
        assert_eq!(
            descriptor_file_name("memcached-operator"),
            "memcached-operator.clusterserviceversion.yaml"
        );
    }
}
