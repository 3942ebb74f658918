//! kbundle CSV - ClusterServiceVersion synthesis
//!
//! This crate turns collected manifests into an OLM bundle descriptor:
//! - `descriptor`: the ClusterServiceVersion types
//! - `permissions`: which RBAC goes into the descriptor and which stays standalone
//! - `webhooks`: webhook descriptions and the deployments serving them
//! - `generator`: the generation pipeline and descriptor output
//! - `validation`: schema and semantic checks of the result
//! - `bundle`: the bundle manifests directory

pub mod bundle;
pub mod descriptor;
pub mod error;
pub mod generator;
pub mod permissions;
pub mod related_images;
pub mod validation;
pub mod version;
pub mod webhooks;

pub use bundle::{BundleFiles, object_file_name, write_bundle};
pub use descriptor::{
    ClusterServiceVersion, CrdDescription, CsvSpec, InstallMode, InstallModeType, RelatedImage,
    StrategyDeploymentPermissions, StrategyDeploymentSpec, WebhookAdmissionType,
    WebhookDescription, descriptor_file_name, display_name,
};
pub use error::{CsvError, Result};
pub use generator::{
    Generation, Generator, GeneratorBuilder, find_base, load_base, write_descriptor,
    write_descriptor_file,
};
pub use permissions::{
    PermissionSplit, RbacObjects, apply_cluster_role_permissions, apply_role_permissions,
    deployment_service_accounts, split_permissions,
};
pub use related_images::{merge_related_images, related_images};
pub use validation::{DescriptorValidator, Severity, ValidationIssue, ValidationReport};
pub use version::{csv_name, parse_version};
pub use webhooks::{ServiceTarget, find_deployment_for_service, webhook_descriptions};
