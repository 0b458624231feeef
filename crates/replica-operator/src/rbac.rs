//! RBAC bundle provisioning
//!
//! Every managed workload gets a ServiceAccount plus a ClusterRoleBinding
//! to the shared `replica-controller` ClusterRole. Objects are created once
//! and never updated; objects that already exist are not written again.

use crate::cluster_api::ClusterApi;
use crate::error::{OperatorError, Result};
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Name of the ClusterRole shared by every bundle
pub const ROLE_NAME: &str = "replica-controller";

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Role, identity and binding for one managed workload
#[derive(Debug, Clone)]
pub struct RbacBundle {
    pub role: ClusterRole,
    pub service_account: ServiceAccount,
    pub role_binding: ClusterRoleBinding,
}

impl RbacBundle {
    /// Build the bundle for a target; the same inputs always give the same objects
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            role: build_cluster_role(),
            service_account: build_service_account(name, namespace),
            role_binding: build_cluster_role_binding(name, namespace),
        }
    }
}

fn managed_labels(name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "replica-operator".to_string(),
    );
    labels.insert("app.kubernetes.io/instance".to_string(), name.to_string());
    labels
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Shared ClusterRole for workload controller processes
pub fn build_cluster_role() -> ClusterRole {
    let verbs = strings(&["get", "list", "watch", "update", "create", "delete"]);

    ClusterRole {
        metadata: ObjectMeta {
            name: Some(ROLE_NAME.to_string()),
            labels: Some(managed_labels(ROLE_NAME)),
            ..Default::default()
        },
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(strings(&[""])),
                resources: Some(strings(&["pods"])),
                verbs: verbs.clone(),
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(strings(&["apps"])),
                resources: Some(strings(&["deployments"])),
                verbs,
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

/// ServiceAccount named after the workload, in the workload's namespace
pub fn build_service_account(name: &str, namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(managed_labels(name)),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Cluster-scoped binding name, unique per target namespace/name.
///
/// `:` cannot appear in a namespace or ServiceAccount name, so distinct
/// targets never map to the same binding.
pub fn binding_name(name: &str, namespace: &str) -> String {
    format!("{}:{}:{}", ROLE_NAME, namespace, name)
}

/// Binding of the workload's ServiceAccount to the shared ClusterRole
pub fn build_cluster_role_binding(name: &str, namespace: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(binding_name(name, namespace)),
            labels: Some(managed_labels(name)),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: ROLE_NAME.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

/// `true` when the lookup found no object
fn is_missing<T>(lookup: Result<T>) -> Result<bool> {
    match lookup {
        Ok(_) => Ok(false),
        Err(OperatorError::NotFound { .. }) => Ok(true),
        Err(e) => Err(e),
    }
}

/// Treat a create that hit an existing object as success
fn created_or_exists(result: Result<()>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(OperatorError::AlreadyExists { kind, name }) => {
            debug!(kind = %kind, name = %name, "RBAC object already exists");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Ensure the RBAC bundle for a target exists.
///
/// Each object is looked up first and created only when missing. A create
/// that races with another writer and gets `AlreadyExists` counts as
/// success. Returns the bundle and the number of objects actually created.
pub async fn ensure_bundle(
    api: &dyn ClusterApi,
    name: &str,
    namespace: &str,
) -> Result<(RbacBundle, usize)> {
    let bundle = RbacBundle::new(name, namespace);
    let mut created = 0;

    let binding = binding_name(name, namespace);

    if is_missing(api.get_cluster_role(ROLE_NAME).await)?
        && created_or_exists(api.create_cluster_role(&bundle.role).await)?
    {
        created += 1;
    }
    if is_missing(api.get_service_account(namespace, name).await)?
        && created_or_exists(api.create_service_account(&bundle.service_account).await)?
    {
        created += 1;
    }
    if is_missing(api.get_cluster_role_binding(&binding).await)?
        && created_or_exists(api.create_cluster_role_binding(&bundle.role_binding).await)?
    {
        created += 1;
    }

    if created > 0 {
        info!(name = %name, namespace = %namespace, created, "Provisioned RBAC bundle");
    }

    Ok((bundle, created))
}
