//! Descriptor validation
//!
//! Two passes: a JSON Schema for structure, then semantic checks on the
//! typed descriptor. The semantic pass only runs when the structure is
//! valid.

use std::collections::HashSet;

use serde_json::Value;

use crate::descriptor::{
    ALM_EXAMPLES_ANNOTATION, ClusterServiceVersion, StrategyDeploymentPermissions,
    WebhookAdmissionType,
};
use crate::error::{CsvError, Result};
use crate::version::parse_version;

const SCHEMA: &str = include_str!("../schema/clusterserviceversion.json");

const KNOWN_MATURITIES: [&str; 8] = [
    "planning",
    "pre-alpha",
    "alpha",
    "beta",
    "stable",
    "mature",
    "inactive",
    "deprecated",
];

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

/// A single validation finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub severity: Severity,
    /// JSON pointer-ish location (`/spec/version`), empty for the root
    pub path: String,
    pub message: String,
}

/// All findings for one descriptor
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, path: &str, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: Severity::Error,
            path: path.to_string(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, path: &str, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: Severity::Warning,
            path: path.to_string(),
            message: message.into(),
        });
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// (errors, warnings)
    pub fn summary(&self) -> (usize, usize) {
        (self.errors().count(), self.warnings().count())
    }

    /// Error messages prefixed with their location
    pub fn error_messages(&self) -> Vec<String> {
        self.errors().map(format_issue).collect()
    }

    /// Fail with [`CsvError::InvalidDescriptor`] when there are errors
    pub fn into_result(self) -> Result<Self> {
        if self.has_errors() {
            return Err(CsvError::InvalidDescriptor {
                errors: self.error_messages(),
            });
        }
        Ok(self)
    }
}

fn format_issue(issue: &ValidationIssue) -> String {
    if issue.path.is_empty() {
        issue.message.clone()
    } else {
        format!("{}: {}", issue.path, issue.message)
    }
}

/// Validates descriptors against the embedded schema and semantic rules
pub struct DescriptorValidator {
    compiled: jsonschema::Validator,
}

impl DescriptorValidator {
    pub fn new() -> Result<Self> {
        let schema: Value = serde_json::from_str(SCHEMA)
            .map_err(|e| CsvError::Schema(format!("embedded schema is not JSON: {}", e)))?;
        let compiled = jsonschema::validator_for(&schema)
            .map_err(|e| CsvError::Schema(e.to_string()))?;
        Ok(Self { compiled })
    }

    /// Validate a typed descriptor
    pub fn validate(&self, csv: &ClusterServiceVersion) -> Result<ValidationReport> {
        let value = serde_json::to_value(csv)?;
        let mut report = self.validate_structure(&value);
        if !report.has_errors() {
            check_semantics(csv, &mut report);
        }
        Ok(report)
    }

    /// Validate a descriptor that has not been parsed yet
    pub fn validate_value(&self, value: &Value) -> ValidationReport {
        let mut report = self.validate_structure(value);
        if report.has_errors() {
            return report;
        }

        match serde_json::from_value::<ClusterServiceVersion>(value.clone()) {
            Ok(csv) => check_semantics(&csv, &mut report),
            Err(e) => report.add_error("", format!("not a ClusterServiceVersion: {}", e)),
        }
        report
    }

    fn validate_structure(&self, value: &Value) -> ValidationReport {
        let mut report = ValidationReport::new();
        for error in self.compiled.iter_errors(value) {
            let path = error.instance_path.to_string();
            report.add_error(&path, error.to_string().replace('"', "'"));
        }
        report
    }
}

fn check_semantics(csv: &ClusterServiceVersion, report: &mut ValidationReport) {
    check_version(csv, report);
    check_examples(csv, report);
    check_owned_crds(csv, report);
    check_install(csv, report);
    check_webhooks(csv, report);
    check_metadata(csv, report);
}

fn check_version(csv: &ClusterServiceVersion, report: &mut ValidationReport) {
    if let Some(version) = csv.spec.version.as_deref()
        && let Err(e) = parse_version("spec.version", version)
    {
        report.add_error("/spec/version", e.to_string());
    }

    if let Some(replaces) = csv.spec.replaces.as_deref()
        && replaces == csv.name()
    {
        report.add_error(
            "/spec/replaces",
            format!("descriptor {:?} cannot replace itself", replaces),
        );
    }
}

fn check_examples(csv: &ClusterServiceVersion, report: &mut ValidationReport) {
    let Some(examples) = csv.annotation(ALM_EXAMPLES_ANNOTATION) else {
        return;
    };
    match serde_json::from_str::<Value>(examples) {
        Ok(Value::Array(_)) => {}
        Ok(_) => report.add_error(
            "/metadata/annotations/alm-examples",
            "must be a JSON array",
        ),
        Err(e) => report.add_error(
            "/metadata/annotations/alm-examples",
            format!("invalid JSON: {}", e),
        ),
    }
}

fn check_owned_crds(csv: &ClusterServiceVersion, report: &mut ValidationReport) {
    let mut seen = HashSet::new();
    for (i, owned) in csv.spec.custom_resource_definitions.owned.iter().enumerate() {
        let path = format!("/spec/customresourcedefinitions/owned/{}", i);
        for (field, value) in [
            ("name", &owned.name),
            ("version", &owned.version),
            ("kind", &owned.kind),
        ] {
            if value.is_empty() {
                report.add_error(&path, format!("missing {}", field));
            }
        }
        if !seen.insert((owned.name.as_str(), owned.version.as_str())) {
            report.add_error(
                &path,
                format!("duplicate owned CRD {} {}", owned.name, owned.version),
            );
        }
    }
}

fn check_install(csv: &ClusterServiceVersion, report: &mut ValidationReport) {
    if !csv.spec.install_modes.iter().any(|mode| mode.supported) {
        report.add_error("/spec/installModes", "no install mode is supported");
    }

    let install = &csv.spec.install.spec;
    check_permissions("/spec/install/spec/permissions", &install.permissions, report);
    check_permissions(
        "/spec/install/spec/clusterPermissions",
        &install.cluster_permissions,
        report,
    );

    let mut names = HashSet::new();
    for (i, deployment) in install.deployments.iter().enumerate() {
        if !names.insert(deployment.name.as_str()) {
            report.add_error(
                &format!("/spec/install/spec/deployments/{}", i),
                format!("duplicate deployment name {:?}", deployment.name),
            );
        }
    }
}

fn check_permissions(
    path: &str,
    permissions: &[StrategyDeploymentPermissions],
    report: &mut ValidationReport,
) {
    for (i, permission) in permissions.iter().enumerate() {
        if permission.service_account_name.is_empty() {
            report.add_error(&format!("{}/{}", path, i), "empty serviceAccountName");
        }
    }
}

fn check_webhooks(csv: &ClusterServiceVersion, report: &mut ValidationReport) {
    let deployments: HashSet<&str> = csv
        .spec
        .install
        .spec
        .deployments
        .iter()
        .map(|d| d.name.as_str())
        .collect();

    let mut names = HashSet::new();
    for (i, webhook) in csv.spec.webhook_definitions.iter().enumerate() {
        let path = format!("/spec/webhookdefinitions/{}", i);

        if !names.insert(webhook.generate_name.as_str()) {
            report.add_error(
                &path,
                format!("duplicate generateName {:?}", webhook.generate_name),
            );
        }
        if webhook.webhook_type == WebhookAdmissionType::ConversionWebhook
            && webhook.conversion_crds.is_empty()
        {
            report.add_error(&path, "conversion webhook lists no CRDs");
        }
        if !deployments.contains(webhook.deployment_name.as_str()) {
            report.add_warning(
                &path,
                format!(
                    "webhook {} is served by {:?}, which is not an install strategy deployment",
                    webhook.generate_name, webhook.deployment_name
                ),
            );
        }
    }
}

fn check_metadata(csv: &ClusterServiceVersion, report: &mut ValidationReport) {
    if csv.spec.display_name.is_empty() {
        report.add_warning("/spec/displayName", "display name is empty");
    }
    if csv.spec.description.is_empty() {
        report.add_warning("/spec/description", "description is empty");
    }
    if csv.spec.maintainers.is_empty() {
        report.add_warning("/spec/maintainers", "no maintainers listed");
    }
    if csv.spec.provider.as_ref().is_none_or(|p| p.name.is_empty()) {
        report.add_warning("/spec/provider", "no provider set");
    }
    if let Some(maturity) = csv.spec.maturity.as_deref()
        && !KNOWN_MATURITIES.contains(&maturity)
    {
        report.add_warning(
            "/spec/maturity",
            format!("unknown maturity {:?}", maturity),
        );
    }
}
