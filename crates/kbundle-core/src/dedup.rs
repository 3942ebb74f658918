//! Deduplication and custom resource filtering
//!
//! Identical documents commonly appear more than once when a project keeps
//! the same manifest in several kustomize layers. Identity is the SHA-256 of
//! a canonical JSON serialization, so the same object collapses to one entry
//! whichever file it came from.

use std::collections::HashSet;

use kube::core::{DynamicObject, GroupVersionKind};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::collector::Manifests;
use crate::crd::CrdDefinition;
use crate::document::object_gvk;
use crate::error::Result;

impl Manifests {
    /// Drop repeated documents, keeping the first occurrence of each
    pub fn deduplicate(self) -> Result<Self> {
        Ok(Self {
            roles: dedup_list(self.roles)?,
            cluster_roles: dedup_list(self.cluster_roles)?,
            role_bindings: dedup_list(self.role_bindings)?,
            cluster_role_bindings: dedup_list(self.cluster_role_bindings)?,
            service_accounts: dedup_list(self.service_accounts)?,
            deployments: dedup_list(self.deployments)?,
            v1_crds: dedup_list(self.v1_crds)?,
            v1beta1_crds: dedup_list(self.v1beta1_crds)?,
            custom_resources: dedup_list(self.custom_resources)?,
            validating_webhook_configurations: dedup_list(self.validating_webhook_configurations)?,
            mutating_webhook_configurations: dedup_list(self.mutating_webhook_configurations)?,
            services: dedup_list(self.services)?,
            cluster_service_versions: dedup_list(self.cluster_service_versions)?,
            others: dedup_list(self.others)?,
        })
    }

    /// Sort unrecognised documents into custom resources and the rest
    ///
    /// An object is a custom resource when its group/version/kind is declared
    /// by a collected CRD of either dialect, served or not. Custom resources
    /// that no longer match any CRD move back to `others`.
    pub fn filter(self) -> Self {
        let declared = self.declared_gvks();

        let (custom_resources, others): (Vec<DynamicObject>, Vec<DynamicObject>) = self
            .custom_resources
            .into_iter()
            .chain(self.others)
            .partition(|object| {
                object_gvk(object)
                    .map(|gvk| declared.contains(&gvk))
                    .unwrap_or(false)
            });

        Self {
            custom_resources,
            others,
            ..self
        }
    }

    /// Group/version/kind of every version declared by a collected CRD
    pub fn declared_gvks(&self) -> HashSet<GroupVersionKind> {
        let v1 = self.v1_crds.iter().flat_map(|crd| crd.declared_gvks());
        let v1beta1 = self.v1beta1_crds.iter().flat_map(|crd| crd.declared_gvks());
        v1.chain(v1beta1).collect()
    }
}

/// Content hash of a serializable document
///
/// The hash covers a canonical JSON rendering in which object keys are
/// sorted, so key order in the source file does not matter.
pub fn content_hash<T: Serialize>(item: &T) -> Result<String> {
    let value = serde_json::to_value(item)?;
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical)?;

    let digest = Sha256::digest(canonical.as_bytes());
    Ok(hex::encode(digest))
}

fn write_canonical(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(&map[key.as_str()], out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

fn dedup_list<T: Serialize>(items: Vec<T>) -> Result<Vec<T>> {
    let mut seen = HashSet::with_capacity(items.len());
    let mut kept = Vec::with_capacity(items.len());

    for item in items {
        if seen.insert(content_hash(&item)?) {
            kept.push(item);
        }
    }

    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CrdPolicy;

    const ROLE: &str = r#"
apiVersion: rbac.authorization.k8s.io/v1
kind: Role
metadata:
  name: manager-role
rules:
- apiGroups: [""]
  resources: ["pods"]
  verbs: ["get"]
"#;

    // Same role, keys in a different order and a namespace that is cleared
    const ROLE_REORDERED: &str = r#"
kind: Role
metadata:
  namespace: other
  name: manager-role
apiVersion: rbac.authorization.k8s.io/v1
rules:
- verbs: ["get"]
  resources: ["pods"]
  apiGroups: [""]
"#;

    const CRD: &str = r#"
apiVersion: apiextensions.k8s.io/v1beta1
kind: CustomResourceDefinition
metadata:
  name: memcacheds.cache.example.com
spec:
  group: cache.example.com
  names:
    kind: Memcached
    plural: memcacheds
  versions:
  - name: v1
    served: true
    storage: true
  - name: v1beta1
    served: false
    storage: false
"#;

    const OBJECTS: &str = r#"
apiVersion: cache.example.com/v1beta1
kind: Memcached
metadata:
  name: unserved-but-declared
---
apiVersion: cache.example.com/v2
kind: Memcached
metadata:
  name: undeclared-version
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: config
"#;

    fn collect(parts: &[&str]) -> Manifests {
        let mut manifests = Manifests::new();
        for (i, part) in parts.iter().enumerate() {
            manifests
                .add_documents(part, &format!("part-{i}.yaml"), CrdPolicy::Accept)
                .unwrap();
        }
        manifests
    }

    fn fingerprint(manifests: &Manifests) -> Vec<String> {
        let mut hashes = Vec::new();
        for object in manifests.custom_resources.iter() {
            hashes.push(format!("cr:{}", content_hash(object).unwrap()));
        }
        for object in manifests.others.iter() {
            hashes.push(format!("other:{}", content_hash(object).unwrap()));
        }
        for role in manifests.roles.iter() {
            hashes.push(format!("role:{}", content_hash(role).unwrap()));
        }
        hashes.push(format!("crds:{}", manifests.v1beta1_crds.len()));
        hashes
    }

    #[test]
    fn test_identical_documents_collapse_across_sources() {
        let manifests = collect(&[ROLE, ROLE_REORDERED, ROLE]).deduplicate().unwrap();
        assert_eq!(manifests.roles.len(), 1);
    }

    #[test]
    fn test_different_documents_are_kept() {
        let other = ROLE.replace("\"get\"", "\"list\"");
        let manifests = collect(&[ROLE, &other]).deduplicate().unwrap();
        assert_eq!(manifests.roles.len(), 2);
    }

    #[test]
    fn test_filter_reclassifies_declared_kinds() {
        let manifests = collect(&[CRD, OBJECTS]).deduplicate().unwrap().filter();

        assert_eq!(manifests.custom_resources.len(), 1);
        assert_eq!(
            manifests.custom_resources[0].metadata.name.as_deref(),
            Some("unserved-but-declared")
        );
        assert_eq!(manifests.others.len(), 2);
    }

    #[test]
    fn test_filter_without_crds_keeps_others() {
        let manifests = collect(&[OBJECTS]).deduplicate().unwrap().filter();
        assert!(manifests.custom_resources.is_empty());
        assert_eq!(manifests.others.len(), 3);
    }

    #[test]
    fn test_dedup_and_filter_idempotent() {
        let input = collect(&[CRD, OBJECTS, ROLE, OBJECTS, ROLE_REORDERED, CRD]);

        let once = input.clone().deduplicate().unwrap().filter();
        let twice = input
            .deduplicate()
            .unwrap()
            .deduplicate()
            .unwrap()
            .filter()
            .filter();

        assert_eq!(fingerprint(&once), fingerprint(&twice));
        assert_eq!(once.len(), twice.len());
        assert_eq!(once.v1beta1_crds.len(), 1);
    }

    #[test]
    fn test_content_hash_ignores_key_order() {
        let a = serde_json::json!({"a": 1, "b": {"c": [1, 2], "d": null}});
        let b = serde_json::json!({"b": {"d": null, "c": [1, 2]}, "a": 1});
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());

        let c = serde_json::json!({"b": {"d": null, "c": [2, 1]}, "a": 1});
        assert_ne!(content_hash(&a).unwrap(), content_hash(&c).unwrap());
    }
}
