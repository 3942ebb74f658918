//! Permission splitting
//!
//! RBAC documents either end up summarized inside the descriptor's install
//! strategy (as `permissions` / `clusterPermissions` keyed by service
//! account) or are shipped as standalone manifests next to it. A role whose
//! binding targets only the operator's own service accounts can be folded
//! into the descriptor; anything the descriptor cannot express is kept
//! standalone, and a role bound to a mix of both ends up in both places.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use kbundle_core::Manifests;
use serde_json::Value;

use crate::descriptor::StrategyDeploymentPermissions;
use crate::error::Result;

/// Service account a pod runs as when its spec names none
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

const SERVICE_ACCOUNT_SUBJECT: &str = "ServiceAccount";
const ROLE_KIND: &str = "Role";
const CLUSTER_ROLE_KIND: &str = "ClusterRole";

trait RbacRole: Clone {
    fn name(&self) -> &str;
    fn rules(&self) -> &[PolicyRule];
}

impl RbacRole for Role {
    fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn rules(&self) -> &[PolicyRule] {
        self.rules.as_deref().unwrap_or_default()
    }
}

impl RbacRole for ClusterRole {
    fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn rules(&self) -> &[PolicyRule] {
        self.rules.as_deref().unwrap_or_default()
    }
}

trait RbacBinding: Clone {
    fn role_ref(&self) -> &RoleRef;
    fn subjects(&self) -> &[Subject];
}

impl RbacBinding for RoleBinding {
    fn role_ref(&self) -> &RoleRef {
        &self.role_ref
    }

    fn subjects(&self) -> &[Subject] {
        self.subjects.as_deref().unwrap_or_default()
    }
}

impl RbacBinding for ClusterRoleBinding {
    fn role_ref(&self) -> &RoleRef {
        &self.role_ref
    }

    fn subjects(&self) -> &[Subject] {
        self.subjects.as_deref().unwrap_or_default()
    }
}

/// A set of RBAC documents
#[derive(Debug, Clone, Default)]
pub struct RbacObjects {
    pub roles: Vec<Role>,
    pub cluster_roles: Vec<ClusterRole>,
    pub role_bindings: Vec<RoleBinding>,
    pub cluster_role_bindings: Vec<ClusterRoleBinding>,
    pub service_accounts: Vec<ServiceAccount>,
}

impl RbacObjects {
    pub fn len(&self) -> usize {
        self.roles.len()
            + self.cluster_roles.len()
            + self.role_bindings.len()
            + self.cluster_role_bindings.len()
            + self.service_accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every document as JSON, service accounts first, then roles and bindings
    pub fn to_values(&self) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(self.len());
        for sa in &self.service_accounts {
            values.push(serde_json::to_value(sa)?);
        }
        for role in &self.roles {
            values.push(serde_json::to_value(role)?);
        }
        for role in &self.cluster_roles {
            values.push(serde_json::to_value(role)?);
        }
        for binding in &self.role_bindings {
            values.push(serde_json::to_value(binding)?);
        }
        for binding in &self.cluster_role_bindings {
            values.push(serde_json::to_value(binding)?);
        }
        Ok(values)
    }
}

/// Result of [`split_permissions`]
#[derive(Debug, Clone, Default)]
pub struct PermissionSplit {
    /// Roles (and single-subject bindings) summarized in the descriptor
    pub in_descriptor: RbacObjects,
    /// Documents written next to the descriptor
    pub standalone: RbacObjects,
}

/// Service accounts the operator's own pods run as, plus `extra`
pub fn deployment_service_accounts(manifests: &Manifests, extra: &[String]) -> BTreeSet<String> {
    let mut accounts: BTreeSet<String> = manifests
        .deployments
        .iter()
        .map(|deployment| {
            deployment
                .spec
                .as_ref()
                .and_then(|spec| spec.template.spec.as_ref())
                .and_then(|pod| pod.service_account_name.as_deref())
                .filter(|name| !name.is_empty())
                .unwrap_or(DEFAULT_SERVICE_ACCOUNT)
                .to_string()
        })
        .collect();

    accounts.extend(extra.iter().filter(|name| !name.is_empty()).cloned());
    accounts
}

/// Namespaced permissions granted through RoleBindings to `roles`
pub fn apply_role_permissions(
    manifests: &Manifests,
    roles: &[Role],
    extra: &[String],
) -> Vec<StrategyDeploymentPermissions> {
    accumulate(
        deployment_service_accounts(manifests, extra),
        roles,
        &manifests.role_bindings,
        ROLE_KIND,
    )
}

/// Cluster permissions granted through ClusterRoleBindings to `cluster_roles`
pub fn apply_cluster_role_permissions(
    manifests: &Manifests,
    cluster_roles: &[ClusterRole],
    extra: &[String],
) -> Vec<StrategyDeploymentPermissions> {
    accumulate(
        deployment_service_accounts(manifests, extra),
        cluster_roles,
        &manifests.cluster_role_bindings,
        CLUSTER_ROLE_KIND,
    )
}

fn accumulate<R: RbacRole, B: RbacBinding>(
    seed: BTreeSet<String>,
    roles: &[R],
    bindings: &[B],
    role_kind: &str,
) -> Vec<StrategyDeploymentPermissions> {
    let mut sets: BTreeMap<String, Vec<PolicyRule>> =
        seed.into_iter().map(|name| (name, Vec::new())).collect();

    for binding in bindings.iter().filter(|b| b.role_ref().kind == role_kind) {
        let Some(role) = roles.iter().find(|r| r.name() == binding.role_ref().name) else {
            continue;
        };

        for subject in binding.subjects() {
            if subject.kind != SERVICE_ACCOUNT_SUBJECT {
                continue;
            }
            if let Some(rules) = sets.get_mut(&subject.name) {
                rules.extend_from_slice(role.rules());
            }
        }
    }

    sets.into_iter()
        .filter(|(_, rules)| !rules.is_empty())
        .map(|(service_account_name, rules)| StrategyDeploymentPermissions {
            service_account_name,
            rules,
        })
        .collect()
}

/// Decide which RBAC documents are summarized in the descriptor
///
/// Per role:
/// - unbound: standalone
/// - bound by a single-subject binding to a known service account: in the
///   descriptor only
/// - bound by a single-subject binding to anything else: role and binding
///   standalone
/// - bound by a multi-subject binding: in the descriptor when any subject
///   is known, and role and binding standalone regardless
///
/// Bindings whose role was not collected, and bindings without subjects,
/// are standalone. Service accounts the operator runs as are dropped (OLM
/// creates them); all others are standalone.
pub fn split_permissions(manifests: &Manifests, extra: &[String]) -> PermissionSplit {
    let known = deployment_service_accounts(manifests, extra);

    let roles = split_scope(&manifests.roles, &manifests.role_bindings, ROLE_KIND, &known);
    let cluster_roles = split_scope(
        &manifests.cluster_roles,
        &manifests.cluster_role_bindings,
        CLUSTER_ROLE_KIND,
        &known,
    );

    let (dropped, standalone_accounts): (Vec<ServiceAccount>, Vec<ServiceAccount>) = manifests
        .service_accounts
        .iter()
        .cloned()
        .partition(|sa| {
            sa.metadata
                .name
                .as_deref()
                .is_some_and(|name| known.contains(name))
        });
    for sa in &dropped {
        tracing::debug!(
            name = sa.metadata.name.as_deref().unwrap_or_default(),
            "service account is created by OLM, dropping"
        );
    }

    PermissionSplit {
        in_descriptor: RbacObjects {
            roles: roles.in_roles,
            cluster_roles: cluster_roles.in_roles,
            role_bindings: roles.in_bindings,
            cluster_role_bindings: cluster_roles.in_bindings,
            service_accounts: Vec::new(),
        },
        standalone: RbacObjects {
            roles: roles.out_roles,
            cluster_roles: cluster_roles.out_roles,
            role_bindings: roles.out_bindings,
            cluster_role_bindings: cluster_roles.out_bindings,
            service_accounts: standalone_accounts,
        },
    }
}

struct ScopeSplit<R, B> {
    in_roles: Vec<R>,
    in_bindings: Vec<B>,
    out_roles: Vec<R>,
    out_bindings: Vec<B>,
}

fn split_scope<R: RbacRole, B: RbacBinding>(
    roles: &[R],
    bindings: &[B],
    role_kind: &str,
    known: &BTreeSet<String>,
) -> ScopeSplit<R, B> {
    let is_known = |subject: &Subject| {
        subject.kind == SERVICE_ACCOUNT_SUBJECT && known.contains(&subject.name)
    };

    let mut in_roles = BTreeSet::new();
    let mut out_roles = BTreeSet::new();
    let mut in_bindings = BTreeSet::new();
    let mut out_bindings = BTreeSet::new();

    for (role_index, role) in roles.iter().enumerate() {
        let mut bound = false;

        for (binding_index, binding) in bindings.iter().enumerate() {
            let role_ref = binding.role_ref();
            if role_ref.kind != role_kind || role_ref.name != role.name() {
                continue;
            }
            bound = true;

            match binding.subjects() {
                [] => {
                    out_roles.insert(role_index);
                    out_bindings.insert(binding_index);
                }
                [subject] if is_known(subject) => {
                    in_roles.insert(role_index);
                    in_bindings.insert(binding_index);
                }
                [_] => {
                    out_roles.insert(role_index);
                    out_bindings.insert(binding_index);
                }
                subjects => {
                    if subjects.iter().any(is_known) {
                        in_roles.insert(role_index);
                    }
                    out_roles.insert(role_index);
                    out_bindings.insert(binding_index);
                }
            }
        }

        if !bound {
            tracing::debug!(role = role.name(), kind = role_kind, "unbound role is standalone");
            out_roles.insert(role_index);
        }
    }

    // Bindings to roles that were never collected (built-in roles, or a
    // RoleBinding to a ClusterRole) cannot be summarized
    for (binding_index, binding) in bindings.iter().enumerate() {
        let role_ref = binding.role_ref();
        let collected =
            role_ref.kind == role_kind && roles.iter().any(|r| r.name() == role_ref.name);
        if !collected {
            out_bindings.insert(binding_index);
        }
    }

    ScopeSplit {
        in_roles: pick(roles, &in_roles),
        in_bindings: pick(bindings, &in_bindings),
        out_roles: pick(roles, &out_roles),
        out_bindings: pick(bindings, &out_bindings),
    }
}

fn pick<T: Clone>(items: &[T], indices: &BTreeSet<usize>) -> Vec<T> {
    indices.iter().map(|&i| items[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbundle_core::CrdPolicy;

    const DEPLOYMENT: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: controller-manager
spec:
  selector:
    matchLabels:
      control-plane: controller-manager
  template:
    metadata:
      labels:
        control-plane: controller-manager
    spec:
      serviceAccountName: controller-manager
      containers:
      - name: manager
        image: example.com/memcached-operator:v0.0.1
"#;

    fn role(name: &str, resource: &str) -> String {
        format!(
            r#"
apiVersion: rbac.authorization.k8s.io/v1
kind: Role
metadata:
  name: {name}
rules:
- apiGroups: [""]
  resources: ["{resource}"]
  verbs: ["get", "list"]
"#
        )
    }

    fn binding(name: &str, role: &str, subjects: &[&str]) -> String {
        let subjects: String = subjects
            .iter()
            .map(|s| format!("- kind: ServiceAccount\n  name: {s}\n  namespace: system\n"))
            .collect();
        format!(
            r#"
apiVersion: rbac.authorization.k8s.io/v1
kind: RoleBinding
metadata:
  name: {name}
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: Role
  name: {role}
subjects:
{subjects}"#
        )
    }

    fn collect(parts: &[String]) -> Manifests {
        let mut manifests = Manifests::new();
        manifests
            .add_documents(DEPLOYMENT, "manager.yaml", CrdPolicy::Accept)
            .unwrap();
        for (i, part) in parts.iter().enumerate() {
            manifests
                .add_documents(part, &format!("rbac-{i}.yaml"), CrdPolicy::Accept)
                .unwrap();
        }
        manifests
    }

    fn names<R: RbacRole>(roles: &[R]) -> Vec<&str> {
        roles.iter().map(|r| r.name()).collect()
    }

    #[test]
    fn test_deployment_service_accounts() {
        let mut manifests = collect(&[]);
        let mut unnamed = manifests.deployments[0].clone();
        unnamed.metadata.name = Some("other".to_string());
        if let Some(pod) = unnamed
            .spec
            .as_mut()
            .and_then(|spec| spec.template.spec.as_mut())
        {
            pod.service_account_name = None;
        }
        manifests.deployments.push(unnamed);

        let accounts = deployment_service_accounts(&manifests, &["metrics-reader".to_string()]);
        let accounts: Vec<&str> = accounts.iter().map(String::as_str).collect();
        assert_eq!(accounts, vec!["controller-manager", "default", "metrics-reader"]);
    }

    #[test]
    fn test_single_known_subject_is_in_descriptor_only() {
        let manifests = collect(&[
            role("manager-role", "pods"),
            binding("manager-rolebinding", "manager-role", &["controller-manager"]),
        ]);

        let split = split_permissions(&manifests, &[]);
        assert_eq!(names(&split.in_descriptor.roles), vec!["manager-role"]);
        assert!(split.standalone.roles.is_empty());
        assert!(split.standalone.role_bindings.is_empty());

        let permissions = apply_role_permissions(&manifests, &split.in_descriptor.roles, &[]);
        assert_eq!(permissions.len(), 1);
        assert_eq!(permissions[0].service_account_name, "controller-manager");
        assert_eq!(permissions[0].rules, manifests.roles[0].rules.clone().unwrap());
    }

    #[test]
    fn test_unbound_role_is_standalone_only() {
        let manifests = collect(&[role("orphan-role", "secrets")]);

        let split = split_permissions(&manifests, &[]);
        assert!(split.in_descriptor.roles.is_empty());
        assert_eq!(names(&split.standalone.roles), vec!["orphan-role"]);

        let permissions = apply_role_permissions(&manifests, &split.in_descriptor.roles, &[]);
        assert!(permissions.is_empty());
    }

    #[test]
    fn test_single_unknown_subject_is_standalone() {
        let manifests = collect(&[
            role("reader-role", "configmaps"),
            binding("reader-rolebinding", "reader-role", &["someone-else"]),
        ]);

        let split = split_permissions(&manifests, &[]);
        assert!(split.in_descriptor.roles.is_empty());
        assert_eq!(names(&split.standalone.roles), vec!["reader-role"]);
        assert_eq!(split.standalone.role_bindings.len(), 1);
    }

    #[test]
    fn test_multi_subject_binding_is_in_both() {
        let manifests = collect(&[
            role("shared-role", "services"),
            binding(
                "shared-rolebinding",
                "shared-role",
                &["controller-manager", "someone-else"],
            ),
        ]);

        let split = split_permissions(&manifests, &[]);
        assert_eq!(names(&split.in_descriptor.roles), vec!["shared-role"]);
        assert_eq!(names(&split.standalone.roles), vec!["shared-role"]);
        assert_eq!(split.standalone.role_bindings.len(), 1);

        let permissions = apply_role_permissions(&manifests, &split.in_descriptor.roles, &[]);
        assert_eq!(permissions.len(), 1);
        assert_eq!(permissions[0].service_account_name, "controller-manager");
    }

    #[test]
    fn test_extra_service_accounts_are_known() {
        let manifests = collect(&[
            role("reader-role", "configmaps"),
            binding("reader-rolebinding", "reader-role", &["metrics-reader"]),
        ]);
        let extra = vec!["metrics-reader".to_string()];

        let split = split_permissions(&manifests, &extra);
        assert_eq!(names(&split.in_descriptor.roles), vec!["reader-role"]);

        let permissions = apply_role_permissions(&manifests, &split.in_descriptor.roles, &extra);
        assert_eq!(permissions.len(), 1);
        assert_eq!(permissions[0].service_account_name, "metrics-reader");
    }

    #[test]
    fn test_permissions_sorted_by_service_account() {
        let manifests = collect(&[
            role("a-role", "pods"),
            role("b-role", "secrets"),
            binding("b-binding", "b-role", &["zeta"]),
            binding("a-binding", "a-role", &["alpha"]),
            binding("c-binding", "b-role", &["controller-manager"]),
        ]);
        let extra = vec!["zeta".to_string(), "alpha".to_string()];

        let permissions = apply_role_permissions(&manifests, &manifests.roles, &extra);
        let accounts: Vec<&str> = permissions
            .iter()
            .map(|p| p.service_account_name.as_str())
            .collect();
        assert_eq!(accounts, vec!["alpha", "controller-manager", "zeta"]);
    }

    #[test]
    fn test_binding_to_uncollected_role_is_standalone() {
        let cluster_binding = r#"
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: proxy-rolebinding
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: system:auth-delegator
subjects:
- kind: ServiceAccount
  name: controller-manager
  namespace: system
"#;
        let manifests = collect(&[cluster_binding.to_string()]);

        let split = split_permissions(&manifests, &[]);
        assert_eq!(split.standalone.cluster_role_bindings.len(), 1);
        assert!(split.in_descriptor.cluster_roles.is_empty());
        assert!(
            apply_cluster_role_permissions(&manifests, &manifests.cluster_roles, &[]).is_empty()
        );
    }

    #[test]
    fn test_cluster_role_permissions() {
        let cluster_rbac = r#"
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: manager-role
rules:
- apiGroups: ["cache.example.com"]
  resources: ["memcacheds"]
  verbs: ["*"]
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: manager-rolebinding
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: manager-role
subjects:
- kind: ServiceAccount
  name: controller-manager
  namespace: system
"#;
        let manifests = collect(&[cluster_rbac.to_string()]);

        let split = split_permissions(&manifests, &[]);
        assert_eq!(names(&split.in_descriptor.cluster_roles), vec!["manager-role"]);
        assert!(split.standalone.is_empty());

        let permissions =
            apply_cluster_role_permissions(&manifests, &split.in_descriptor.cluster_roles, &[]);
        assert_eq!(permissions.len(), 1);
        assert_eq!(permissions[0].rules.len(), 1);
    }

    #[test]
    fn test_service_accounts_split() {
        let accounts = r#"
apiVersion: v1
kind: ServiceAccount
metadata:
  name: controller-manager
---
apiVersion: v1
kind: ServiceAccount
metadata:
  name: helper
"#;
        let manifests = collect(&[accounts.to_string()]);

        let split = split_permissions(&manifests, &[]);
        assert_eq!(split.standalone.service_accounts.len(), 1);
        assert_eq!(
            split.standalone.service_accounts[0].metadata.name.as_deref(),
            Some("helper")
        );
    }

    #[test]
    fn test_to_values_carry_type_information() {
        let manifests = collect(&[role("orphan-role", "secrets")]);
        let split = split_permissions(&manifests, &[]);

        let values = split.standalone.to_values().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["kind"], "Role");
        assert_eq!(values[0]["apiVersion"], "rbac.authorization.k8s.io/v1");
    }
}
