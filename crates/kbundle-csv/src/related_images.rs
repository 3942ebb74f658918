//! Related images
//!
//! Operators that deploy other images advertise them through
//! `RELATED_IMAGE_<NAME>` environment variables on their containers. These
//! are listed in `spec.relatedImages` so disconnected mirrors know what to
//! copy.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Container;
use kbundle_core::Manifests;

use crate::descriptor::RelatedImage;

pub const RELATED_IMAGE_PREFIX: &str = "RELATED_IMAGE_";

/// Related images declared by the collected deployments, sorted by name
///
/// When two variables map to the same name the first one found wins.
pub fn related_images(manifests: &Manifests) -> Vec<RelatedImage> {
    let mut images: BTreeMap<String, String> = BTreeMap::new();

    let containers = manifests
        .deployments
        .iter()
        .filter_map(|deployment| deployment.spec.as_ref()?.template.spec.as_ref())
        .flat_map(|pod| {
            pod.init_containers
                .iter()
                .flatten()
                .chain(pod.containers.iter())
        });

    for container in containers {
        for (name, image) in container_images(container) {
            match images.get(&name) {
                Some(existing) if *existing != image => {
                    tracing::warn!(
                        name = %name,
                        kept = %existing,
                        ignored = %image,
                        "conflicting related image, keeping the first"
                    );
                }
                Some(_) => {}
                None => {
                    images.insert(name, image);
                }
            }
        }
    }

    images
        .into_iter()
        .map(|(name, image)| RelatedImage { name, image })
        .collect()
}

fn container_images(container: &Container) -> Vec<(String, String)> {
    container
        .env
        .iter()
        .flatten()
        .filter_map(|var| {
            let suffix = var.name.strip_prefix(RELATED_IMAGE_PREFIX)?;
            let image = var.value.as_deref()?;
            if suffix.is_empty() || image.is_empty() {
                return None;
            }
            Some((suffix.to_lowercase(), image.to_string()))
        })
        .collect()
}

/// Merge generated related images into a baseline list
///
/// Generated entries replace baseline entries of the same name. The result
/// is sorted by name.
pub fn merge_related_images(base: &[RelatedImage], generated: Vec<RelatedImage>) -> Vec<RelatedImage> {
    let mut merged: BTreeMap<String, String> = base
        .iter()
        .map(|r| (r.name.clone(), r.image.clone()))
        .collect();

    for RelatedImage { name, image } in generated {
        if let Some(previous) = merged.insert(name.clone(), image.clone())
            && previous != image
        {
            tracing::warn!(
                name = %name,
                previous = %previous,
                image = %image,
                "related image from deployments replaces baseline entry"
            );
        }
    }

    merged
        .into_iter()
        .map(|(name, image)| RelatedImage { name, image })
        .collect()
}
