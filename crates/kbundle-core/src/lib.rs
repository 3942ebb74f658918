//! kbundle Core - manifest collection for operator bundle generation
//!
//! This crate turns a directory tree (or a stream) of Kubernetes manifests
//! into a typed, deduplicated collection:
//! - `Document`: closed sum type over the kinds the generator understands
//! - `Manifests`: the collection, one list per kind
//! - `deduplicate` / `filter`: content-hash dedup and custom resource detection
//! - `crd`: the v1 and v1beta1 CRD dialects and CRD file output

pub mod collector;
pub mod crd;
pub mod dedup;
pub mod document;
pub mod error;

pub use collector::{CrdPolicy, Manifests};
pub use crd::{
    ConversionWebhook, CrdDefinition, CustomResourceDefinitionV1Beta1, DeclaredVersion,
    write_crd_files,
};
pub use dedup::content_hash;
pub use document::{Document, DocumentKind, object_gvk, split_api_version};
pub use error::{CoreError, Result};
