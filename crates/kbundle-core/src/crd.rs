//! CustomResourceDefinition dialects and CRD file output
//!
//! Two CRD API versions are accepted:
//!
//! - `apiextensions.k8s.io/v1`, using the `k8s-openapi` types
//! - `apiextensions.k8s.io/v1beta1`, which `k8s-openapi` no longer ships,
//!   modelled here with the fields the generator needs and everything else
//!   kept verbatim
//!
//! Both implement [`CrdDefinition`], which is what the rest of the pipeline
//! works against.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionNames, WebhookClientConfig,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::GroupVersionKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

/// API version of the v1 CRD dialect
pub const CRD_V1_API_VERSION: &str = "apiextensions.k8s.io/v1";

/// API version of the legacy v1beta1 CRD dialect
pub const CRD_V1BETA1_API_VERSION: &str = "apiextensions.k8s.io/v1beta1";

/// Conversion strategy that routes version conversion through a webhook
pub const WEBHOOK_CONVERSION_STRATEGY: &str = "Webhook";

/// Review versions assumed when a CRD does not declare any
pub const DEFAULT_CONVERSION_REVIEW_VERSIONS: [&str; 2] = ["v1beta1", "v1"];

/// A v1beta1 CustomResourceDefinition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceDefinitionV1Beta1 {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: CrdSpecV1Beta1,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdSpecV1Beta1 {
    pub group: String,
    pub names: CustomResourceDefinitionNames,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,

    /// Legacy single-version field, superseded by `versions`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<CrdVersionV1Beta1>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion: Option<CrdConversionV1Beta1>,

    /// Validation, subresources, printer columns and other untouched fields
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdVersionV1Beta1 {
    pub name: String,
    #[serde(default)]
    pub served: bool,
    #[serde(default)]
    pub storage: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdConversionV1Beta1 {
    #[serde(default)]
    pub strategy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_client_config: Option<WebhookClientConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_review_versions: Option<Vec<String>>,
}

/// A declared CRD version and whether the API server serves it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredVersion {
    pub name: String,
    pub served: bool,
}

/// Conversion webhook settings extracted from a CRD
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionWebhook {
    /// Full CRD name (`<plural>.<group>`)
    pub crd_name: String,
    pub client_config: WebhookClientConfig,
    pub review_versions: Vec<String>,
}

/// Dialect-independent view of a CustomResourceDefinition
pub trait CrdDefinition {
    /// Full CRD name (`metadata.name`)
    fn crd_name(&self) -> &str;

    fn group(&self) -> &str;

    fn names(&self) -> &CustomResourceDefinitionNames;

    /// All declared versions in declaration order
    fn declared_versions(&self) -> Vec<DeclaredVersion>;

    /// Webhook conversion settings, when the CRD converts through a webhook
    fn conversion_webhook(&self) -> Option<ConversionWebhook>;

    fn kind(&self) -> &str {
        &self.names().kind
    }

    fn plural(&self) -> &str {
        &self.names().plural
    }

    /// Names of the versions the API server serves
    fn served_versions(&self) -> Vec<String> {
        self.declared_versions()
            .into_iter()
            .filter(|v| v.served)
            .map(|v| v.name)
            .collect()
    }

    /// Group/version/kind of every declared version, served or not
    fn declared_gvks(&self) -> Vec<GroupVersionKind> {
        self.declared_versions()
            .iter()
            .map(|v| GroupVersionKind::gvk(self.group(), &v.name, self.kind()))
            .collect()
    }

    /// File name used when the CRD is written into a bundle
    fn file_name(&self) -> String {
        format!("{}_{}.yaml", self.group(), self.plural())
    }
}

impl CrdDefinition for CustomResourceDefinition {
    fn crd_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn group(&self) -> &str {
        &self.spec.group
    }

    fn names(&self) -> &CustomResourceDefinitionNames {
        &self.spec.names
    }

    fn declared_versions(&self) -> Vec<DeclaredVersion> {
        self.spec
            .versions
            .iter()
            .map(|v| DeclaredVersion {
                name: v.name.clone(),
                served: v.served,
            })
            .collect()
    }

    fn conversion_webhook(&self) -> Option<ConversionWebhook> {
        let conversion = self.spec.conversion.as_ref()?;
        if conversion.strategy != WEBHOOK_CONVERSION_STRATEGY {
            return None;
        }
        let webhook = conversion.webhook.as_ref()?;
        let client_config = webhook.client_config.clone()?;

        let review_versions = if webhook.conversion_review_versions.is_empty() {
            default_review_versions()
        } else {
            webhook.conversion_review_versions.clone()
        };

        Some(ConversionWebhook {
            crd_name: self.crd_name().to_string(),
            client_config,
            review_versions,
        })
    }
}

impl CrdDefinition for CustomResourceDefinitionV1Beta1 {
    fn crd_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn group(&self) -> &str {
        &self.spec.group
    }

    fn names(&self) -> &CustomResourceDefinitionNames {
        &self.spec.names
    }

    fn declared_versions(&self) -> Vec<DeclaredVersion> {
        if self.spec.versions.is_empty() {
            // A CRD that only sets `spec.version` serves that one version
            return self
                .spec
                .version
                .iter()
                .map(|name| DeclaredVersion {
                    name: name.clone(),
                    served: true,
                })
                .collect();
        }

        self.spec
            .versions
            .iter()
            .map(|v| DeclaredVersion {
                name: v.name.clone(),
                served: v.served,
            })
            .collect()
    }

    fn conversion_webhook(&self) -> Option<ConversionWebhook> {
        let conversion = self.spec.conversion.as_ref()?;
        if conversion.strategy != WEBHOOK_CONVERSION_STRATEGY {
            return None;
        }
        let client_config = conversion.webhook_client_config.clone()?;

        let review_versions = match &conversion.conversion_review_versions {
            Some(versions) if !versions.is_empty() => versions.clone(),
            _ => default_review_versions(),
        };

        Some(ConversionWebhook {
            crd_name: self.crd_name().to_string(),
            client_config,
            review_versions,
        })
    }
}

fn default_review_versions() -> Vec<String> {
    DEFAULT_CONVERSION_REVIEW_VERSIONS
        .iter()
        .map(|v| v.to_string())
        .collect()
}

/// Write one `<group>_<plural>.yaml` file per CRD into `dir`
///
/// File names are checked for collisions before anything is written. The
/// `status` stanza is dropped from the written documents.
pub fn write_crd_files(
    dir: &Path,
    v1: &[CustomResourceDefinition],
    v1beta1: &[CustomResourceDefinitionV1Beta1],
) -> Result<Vec<PathBuf>> {
    let mut rendered: BTreeMap<String, (String, String)> = BTreeMap::new();

    let mut insert = |file: String, crd_name: &str, content: String| -> Result<()> {
        if let Some((first, _)) = rendered.get(&file) {
            return Err(CoreError::CrdFileCollision {
                file,
                first: first.clone(),
                second: crd_name.to_string(),
            });
        }
        rendered.insert(file, (crd_name.to_string(), content));
        Ok(())
    };

    for crd in v1 {
        let mut crd = crd.clone();
        crd.status = None;
        let content = serde_yaml::to_string(&crd)?;
        insert(crd.file_name(), crd.crd_name(), content)?;
    }

    for crd in v1beta1 {
        let mut crd = crd.clone();
        crd.status = None;
        let content = serde_yaml::to_string(&crd)?;
        insert(crd.file_name(), crd.crd_name(), content)?;
    }

    std::fs::create_dir_all(dir)?;

    let mut written = Vec::with_capacity(rendered.len());
    for (file, (_, content)) in rendered {
        let path = dir.join(file);
        std::fs::write(&path, content)?;
        written.push(path);
    }

    Ok(written)
}
