//! Webhook descriptions
//!
//! Admission and conversion webhooks are served by one of the operator's
//! deployments. The link is indirect: a webhook points at a Service, and the
//! Service selects pods by label. A deployment serves the webhook when its
//! pod template labels contain every entry of the Service's selector.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::admissionregistration::v1::{MutatingWebhook, ValidatingWebhook};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kbundle_core::{ConversionWebhook, CrdDefinition, Manifests};
use sha2::{Digest, Sha256};

use crate::descriptor::{DEFAULT_WEBHOOK_PORT, WebhookAdmissionType, WebhookDescription};

const EXTERNAL_NAME_SERVICE: &str = "ExternalName";
const CONVERSION_NAME_SUFFIX: &str = "conversion.kbundle.io";
const NO_SIDE_EFFECTS: &str = "None";

/// The Service endpoint a webhook client config points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    pub name: String,
    pub path: Option<String>,
    pub port: Option<i32>,
}

impl ServiceTarget {
    /// Port the webhook is called on (443 when unset)
    pub fn port_or_default(&self) -> i32 {
        self.port.unwrap_or(DEFAULT_WEBHOOK_PORT)
    }
}

impl From<&k8s_openapi::api::admissionregistration::v1::ServiceReference> for ServiceTarget {
    fn from(service: &k8s_openapi::api::admissionregistration::v1::ServiceReference) -> Self {
        Self {
            name: service.name.clone(),
            path: service.path.clone(),
            port: service.port,
        }
    }
}

impl From<&k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::ServiceReference>
    for ServiceTarget
{
    fn from(
        service: &k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::ServiceReference,
    ) -> Self {
        Self {
            name: service.name.clone(),
            path: service.path.clone(),
            port: service.port,
        }
    }
}

/// Resolve the deployment serving a webhook endpoint
///
/// Returns the deployment name and the Service, each when found. A URL-only
/// client config (`target` is `None`) matches nothing. An `ExternalName`
/// Service, or one without a selector, is returned without a deployment.
pub fn find_deployment_for_service<'a>(
    manifests: &'a Manifests,
    target: Option<&ServiceTarget>,
) -> (Option<String>, Option<&'a Service>) {
    let Some(target) = target else {
        return (None, None);
    };

    let Some(service) = manifests.service(&target.name) else {
        tracing::info!(service = %target.name, "webhook service not found in manifests");
        return (None, None);
    };

    let Some(spec) = service.spec.as_ref() else {
        return (None, Some(service));
    };
    if spec.type_.as_deref() == Some(EXTERNAL_NAME_SERVICE) {
        return (None, Some(service));
    }
    let selector = match spec.selector.as_ref() {
        Some(selector) if !selector.is_empty() => selector,
        _ => return (None, Some(service)),
    };

    let deployment = manifests.deployments.iter().find(|deployment| {
        let labels = deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.template.metadata.as_ref())
            .and_then(|meta| meta.labels.as_ref());

        match labels {
            Some(labels) => selector
                .iter()
                .all(|(key, value)| labels.get(key) == Some(value)),
            None => false,
        }
    });

    let name = deployment.and_then(|d| d.metadata.name.clone());
    if name.is_none() {
        tracing::info!(service = %target.name, "no deployment matches webhook service selector");
    }
    (name, Some(service))
}

/// Target port of the Service port exposing `port`
fn service_target_port(service: Option<&Service>, port: i32) -> Option<IntOrString> {
    service?
        .spec
        .as_ref()?
        .ports
        .as_ref()?
        .iter()
        .find(|p| p.port == port)
        .and_then(|p| p.target_port.clone())
}

/// Build every webhook description, sorted by generate name then type
pub fn webhook_descriptions(manifests: &Manifests) -> Vec<WebhookDescription> {
    let mut descriptions = Vec::new();

    for config in &manifests.validating_webhook_configurations {
        for webhook in config.webhooks.iter().flatten() {
            descriptions.push(validating_description(manifests, webhook));
        }
    }
    for config in &manifests.mutating_webhook_configurations {
        for webhook in config.webhooks.iter().flatten() {
            descriptions.push(mutating_description(manifests, webhook));
        }
    }
    descriptions.extend(conversion_descriptions(manifests));

    descriptions.sort_by(|a, b| {
        a.generate_name
            .cmp(&b.generate_name)
            .then(a.webhook_type.cmp(&b.webhook_type))
    });
    descriptions
}

/// Description skeleton for a webhook called through `target`
fn endpoint_description(
    manifests: &Manifests,
    generate_name: &str,
    webhook_type: WebhookAdmissionType,
    target: Option<&ServiceTarget>,
) -> WebhookDescription {
    let (deployment, service) = find_deployment_for_service(manifests, target);
    if target.is_none() {
        tracing::info!(webhook = generate_name, "webhook has no service reference, skipping deployment match");
    }

    let mut description = WebhookDescription::new(generate_name, webhook_type);
    description.deployment_name = deployment.unwrap_or_default();
    if let Some(target) = target {
        description.container_port = target.port_or_default();
        description.webhook_path = target.path.clone();
        description.target_port = service_target_port(service, description.container_port);
    }
    description
}

fn validating_description(manifests: &Manifests, webhook: &ValidatingWebhook) -> WebhookDescription {
    let target = webhook.client_config.service.as_ref().map(ServiceTarget::from);
    let mut description = endpoint_description(
        manifests,
        &webhook.name,
        WebhookAdmissionType::ValidatingAdmissionWebhook,
        target.as_ref(),
    );

    description.rules = webhook.rules.clone().unwrap_or_default();
    description.failure_policy = webhook.failure_policy.clone();
    description.match_policy = webhook.match_policy.clone();
    description.object_selector = webhook.object_selector.clone();
    description.side_effects = Some(webhook.side_effects.clone());
    description.timeout_seconds = webhook.timeout_seconds;
    description.admission_review_versions = webhook.admission_review_versions.clone();
    description
}

fn mutating_description(manifests: &Manifests, webhook: &MutatingWebhook) -> WebhookDescription {
    let target = webhook.client_config.service.as_ref().map(ServiceTarget::from);
    let mut description = endpoint_description(
        manifests,
        &webhook.name,
        WebhookAdmissionType::MutatingAdmissionWebhook,
        target.as_ref(),
    );

    description.rules = webhook.rules.clone().unwrap_or_default();
    description.failure_policy = webhook.failure_policy.clone();
    description.match_policy = webhook.match_policy.clone();
    description.object_selector = webhook.object_selector.clone();
    description.side_effects = Some(webhook.side_effects.clone());
    description.timeout_seconds = webhook.timeout_seconds;
    description.admission_review_versions = webhook.admission_review_versions.clone();
    description.reinvocation_policy = webhook.reinvocation_policy.clone();
    description
}

struct ConversionGroup {
    target: ServiceTarget,
    crds: BTreeSet<String>,
    review_versions: Vec<String>,
}

/// One description per (port, path) shared by conversion webhooks
fn conversion_descriptions(manifests: &Manifests) -> Vec<WebhookDescription> {
    let webhooks = manifests
        .v1_crds
        .iter()
        .filter_map(|crd| crd.conversion_webhook())
        .chain(
            manifests
                .v1beta1_crds
                .iter()
                .filter_map(|crd| crd.conversion_webhook()),
        );

    let mut groups: BTreeMap<(i32, String), ConversionGroup> = BTreeMap::new();
    for webhook in webhooks {
        add_to_group(&mut groups, webhook);
    }

    groups
        .into_values()
        .map(|group| {
            let crds: Vec<String> = group.crds.into_iter().collect();
            let mut description = endpoint_description(
                manifests,
                &conversion_generate_name(&crds),
                WebhookAdmissionType::ConversionWebhook,
                Some(&group.target),
            );
            description.conversion_crds = crds;
            description.admission_review_versions = group.review_versions;
            description.side_effects = Some(NO_SIDE_EFFECTS.to_string());
            description
        })
        .collect()
}

fn add_to_group(groups: &mut BTreeMap<(i32, String), ConversionGroup>, webhook: ConversionWebhook) {
    let Some(service) = webhook.client_config.service.as_ref() else {
        tracing::info!(crd = %webhook.crd_name, "conversion webhook uses a URL, not describing it");
        return;
    };
    let target = ServiceTarget::from(service);
    let key = (target.port_or_default(), target.path.clone().unwrap_or_default());

    let group = groups.entry(key).or_insert_with(|| ConversionGroup {
        target,
        crds: BTreeSet::new(),
        review_versions: Vec::new(),
    });
    group.crds.insert(webhook.crd_name);
    for version in webhook.review_versions {
        if !group.review_versions.contains(&version) {
            group.review_versions.push(version);
        }
    }
}

/// Stable name for a conversion webhook serving the given (sorted) CRDs
pub fn conversion_generate_name(crds: &[String]) -> String {
    let digest = Sha256::digest(crds.join(",").as_bytes());
    let hash = hex::encode(digest);
    format!("c{}.{}", &hash[..12], CONVERSION_NAME_SUFFIX)
}
