//! Typed manifest documents
//!
//! Every document read by the collector is classified by its API group and
//! kind into a [`DocumentKind`], then parsed into the matching [`Document`]
//! variant. Documents whose kind is not one the generator cares about are
//! kept as [`Document::Other`] so they can later be recognised as custom
//! resources.

use std::fmt;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{DynamicObject, GroupVersionKind};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::crd::{CRD_V1BETA1_API_VERSION, CustomResourceDefinitionV1Beta1};
use crate::error::{CoreError, Result};

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";
const APPS_GROUP: &str = "apps";
const CORE_GROUP: &str = "";
const APIEXTENSIONS_GROUP: &str = "apiextensions.k8s.io";
const ADMISSION_GROUP: &str = "admissionregistration.k8s.io";
const OPERATORS_GROUP: &str = "operators.coreos.com";

/// Kind of a manifest document, as far as the generator is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Role,
    ClusterRole,
    RoleBinding,
    ClusterRoleBinding,
    ServiceAccount,
    Deployment,
    CustomResourceDefinitionV1,
    CustomResourceDefinitionV1Beta1,
    /// Instance of a collected CRD (assigned by the filter, never by classification)
    CustomResource,
    ValidatingWebhookConfiguration,
    MutatingWebhookConfiguration,
    Service,
    ClusterServiceVersion,
    Other,
}

impl DocumentKind {
    /// Classify a document from its `apiVersion` and `kind`
    pub fn classify(api_version: &str, kind: &str) -> Self {
        let group = split_api_version(api_version).0;

        match (group, kind) {
            (RBAC_GROUP, "Role") => Self::Role,
            (RBAC_GROUP, "ClusterRole") => Self::ClusterRole,
            (RBAC_GROUP, "RoleBinding") => Self::RoleBinding,
            (RBAC_GROUP, "ClusterRoleBinding") => Self::ClusterRoleBinding,
            (CORE_GROUP, "ServiceAccount") => Self::ServiceAccount,
            (CORE_GROUP, "Service") => Self::Service,
            (APPS_GROUP, "Deployment") => Self::Deployment,
            (APIEXTENSIONS_GROUP, "CustomResourceDefinition") => {
                if api_version == CRD_V1BETA1_API_VERSION {
                    Self::CustomResourceDefinitionV1Beta1
                } else {
                    Self::CustomResourceDefinitionV1
                }
            }
            (ADMISSION_GROUP, "ValidatingWebhookConfiguration") => {
                Self::ValidatingWebhookConfiguration
            }
            (ADMISSION_GROUP, "MutatingWebhookConfiguration") => Self::MutatingWebhookConfiguration,
            (OPERATORS_GROUP, "ClusterServiceVersion") => Self::ClusterServiceVersion,
            _ => Self::Other,
        }
    }

    /// Whether this kind is a CRD of either dialect
    pub fn is_crd(self) -> bool {
        matches!(
            self,
            Self::CustomResourceDefinitionV1 | Self::CustomResourceDefinitionV1Beta1
        )
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Role => "Role",
            Self::ClusterRole => "ClusterRole",
            Self::RoleBinding => "RoleBinding",
            Self::ClusterRoleBinding => "ClusterRoleBinding",
            Self::ServiceAccount => "ServiceAccount",
            Self::Deployment => "Deployment",
            Self::CustomResourceDefinitionV1 => "CustomResourceDefinition (v1)",
            Self::CustomResourceDefinitionV1Beta1 => "CustomResourceDefinition (v1beta1)",
            Self::CustomResource => "custom resource",
            Self::ValidatingWebhookConfiguration => "ValidatingWebhookConfiguration",
            Self::MutatingWebhookConfiguration => "MutatingWebhookConfiguration",
            Self::Service => "Service",
            Self::ClusterServiceVersion => "ClusterServiceVersion",
            Self::Other => "unrecognized kind",
        };
        f.write_str(name)
    }
}

/// A parsed manifest document
#[derive(Debug, Clone)]
pub enum Document {
    Role(Role),
    ClusterRole(ClusterRole),
    RoleBinding(RoleBinding),
    ClusterRoleBinding(ClusterRoleBinding),
    ServiceAccount(ServiceAccount),
    Deployment(Deployment),
    CustomResourceDefinitionV1(CustomResourceDefinition),
    CustomResourceDefinitionV1Beta1(CustomResourceDefinitionV1Beta1),
    CustomResource(DynamicObject),
    ValidatingWebhookConfiguration(ValidatingWebhookConfiguration),
    MutatingWebhookConfiguration(MutatingWebhookConfiguration),
    Service(Service),
    ClusterServiceVersion(DynamicObject),
    Other(DynamicObject),
}

impl Document {
    /// Parse a raw document into its typed form
    ///
    /// Returns `Ok(None)` when the document has no `apiVersion`/`kind` and
    /// therefore cannot be classified, or when a document of an unrecognized
    /// kind is malformed. The namespace is cleared on every parsed document.
    pub fn parse(value: Value, source_name: &str) -> Result<Option<Self>> {
        let Some((api_version, kind)) = type_of(&value) else {
            return Ok(None);
        };
        let document_kind = DocumentKind::classify(&api_version, &kind);
        let name = value
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let ctx = ParseContext {
            source_name,
            kind: &kind,
            name: &name,
        };

        let mut document = match document_kind {
            DocumentKind::Role => Self::Role(ctx.typed(value)?),
            DocumentKind::ClusterRole => Self::ClusterRole(ctx.typed(value)?),
            DocumentKind::RoleBinding => Self::RoleBinding(ctx.typed(value)?),
            DocumentKind::ClusterRoleBinding => Self::ClusterRoleBinding(ctx.typed(value)?),
            DocumentKind::ServiceAccount => Self::ServiceAccount(ctx.typed(value)?),
            DocumentKind::Deployment => Self::Deployment(ctx.typed(value)?),
            DocumentKind::CustomResourceDefinitionV1 => {
                Self::CustomResourceDefinitionV1(ctx.typed(value)?)
            }
            DocumentKind::CustomResourceDefinitionV1Beta1 => {
                Self::CustomResourceDefinitionV1Beta1(ctx.typed(value)?)
            }
            DocumentKind::CustomResource => Self::CustomResource(ctx.typed(value)?),
            DocumentKind::ValidatingWebhookConfiguration => {
                Self::ValidatingWebhookConfiguration(ctx.typed(value)?)
            }
            DocumentKind::MutatingWebhookConfiguration => {
                Self::MutatingWebhookConfiguration(ctx.typed(value)?)
            }
            DocumentKind::Service => Self::Service(ctx.typed(value)?),
            DocumentKind::ClusterServiceVersion => Self::ClusterServiceVersion(ctx.typed(value)?),
            // Unrecognized kinds never abort collection
            DocumentKind::Other => match ctx.typed(value) {
                Ok(object) => Self::Other(object),
                Err(e) => {
                    tracing::debug!(source = source_name, kind = %kind, "skipping document: {}", e);
                    return Ok(None);
                }
            },
        };

        document.metadata_mut().namespace = None;
        Ok(Some(document))
    }

    pub fn kind(&self) -> DocumentKind {
        match self {
            Self::Role(_) => DocumentKind::Role,
            Self::ClusterRole(_) => DocumentKind::ClusterRole,
            Self::RoleBinding(_) => DocumentKind::RoleBinding,
            Self::ClusterRoleBinding(_) => DocumentKind::ClusterRoleBinding,
            Self::ServiceAccount(_) => DocumentKind::ServiceAccount,
            Self::Deployment(_) => DocumentKind::Deployment,
            Self::CustomResourceDefinitionV1(_) => DocumentKind::CustomResourceDefinitionV1,
            Self::CustomResourceDefinitionV1Beta1(_) => {
                DocumentKind::CustomResourceDefinitionV1Beta1
            }
            Self::CustomResource(_) => DocumentKind::CustomResource,
            Self::ValidatingWebhookConfiguration(_) => {
                DocumentKind::ValidatingWebhookConfiguration
            }
            Self::MutatingWebhookConfiguration(_) => DocumentKind::MutatingWebhookConfiguration,
            Self::Service(_) => DocumentKind::Service,
            Self::ClusterServiceVersion(_) => DocumentKind::ClusterServiceVersion,
            Self::Other(_) => DocumentKind::Other,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Role(d) => &d.metadata,
            Self::ClusterRole(d) => &d.metadata,
            Self::RoleBinding(d) => &d.metadata,
            Self::ClusterRoleBinding(d) => &d.metadata,
            Self::ServiceAccount(d) => &d.metadata,
            Self::Deployment(d) => &d.metadata,
            Self::CustomResourceDefinitionV1(d) => &d.metadata,
            Self::CustomResourceDefinitionV1Beta1(d) => &d.metadata,
            Self::ValidatingWebhookConfiguration(d) => &d.metadata,
            Self::MutatingWebhookConfiguration(d) => &d.metadata,
            Self::Service(d) => &d.metadata,
            Self::CustomResource(d) | Self::ClusterServiceVersion(d) | Self::Other(d) => {
                &d.metadata
            }
        }
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Role(d) => &mut d.metadata,
            Self::ClusterRole(d) => &mut d.metadata,
            Self::RoleBinding(d) => &mut d.metadata,
            Self::ClusterRoleBinding(d) => &mut d.metadata,
            Self::ServiceAccount(d) => &mut d.metadata,
            Self::Deployment(d) => &mut d.metadata,
            Self::CustomResourceDefinitionV1(d) => &mut d.metadata,
            Self::CustomResourceDefinitionV1Beta1(d) => &mut d.metadata,
            Self::ValidatingWebhookConfiguration(d) => &mut d.metadata,
            Self::MutatingWebhookConfiguration(d) => &mut d.metadata,
            Self::Service(d) => &mut d.metadata,
            Self::CustomResource(d) | Self::ClusterServiceVersion(d) | Self::Other(d) => {
                &mut d.metadata
            }
        }
    }

    /// `metadata.name`, or an empty string when unset
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }
}

/// Where a document came from, for parse error reporting
struct ParseContext<'a> {
    source_name: &'a str,
    kind: &'a str,
    name: &'a str,
}

impl ParseContext<'_> {
    fn typed<T: DeserializeOwned>(&self, value: Value) -> Result<T> {
        serde_json::from_value(value).map_err(|e| CoreError::Parse {
            source_name: self.source_name.to_string(),
            kind: self.kind.to_string(),
            name: self.name.to_string(),
            message: e.to_string(),
        })
    }
}

/// Extract `apiVersion` and `kind` from a raw document
fn type_of(value: &Value) -> Option<(String, String)> {
    let api_version = value.get("apiVersion")?.as_str()?;
    let kind = value.get("kind")?.as_str()?;
    if api_version.is_empty() || kind.is_empty() {
        return None;
    }
    Some((api_version.to_string(), kind.to_string()))
}

/// Split an `apiVersion` into group and version (`v1` → `("", "v1")`)
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// Group/version/kind of a dynamic object, if it carries type information
pub fn object_gvk(object: &DynamicObject) -> Option<GroupVersionKind> {
    let types = object.types.as_ref()?;
    let (group, version) = split_api_version(&types.api_version);
    Some(GroupVersionKind::gvk(group, version, &types.kind))
}
