//! Cluster API client
//!
//! The reconcile engine talks to the API server only through [`ClusterApi`].
//! [`KubeClusterApi`] is the production implementation on top of
//! `kube::Api`; tests substitute an in-memory fake.

use crate::crd::{Controller, ControllerStatus};
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::debug;

/// Typed get/create/update primitives consumed by the engine.
///
/// Implementations must report failures through [`OperatorError::from_kube`]
/// so that `NotFound`, `AlreadyExists` and `Conflict` arrive as their own
/// variants.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch a Controller resource
    async fn get_controller(&self, namespace: &str, name: &str) -> Result<Controller>;

    /// Merge-patch the status subresource of a Controller
    async fn patch_controller_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ControllerStatus,
    ) -> Result<()>;

    /// Fetch a Deployment
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment>;

    /// Replace a Deployment; `resourceVersion` guards against lost updates
    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment>;

    /// Fetch a ClusterRole
    async fn get_cluster_role(&self, name: &str) -> Result<ClusterRole>;

    /// Fetch a ServiceAccount
    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccount>;

    /// Fetch a ClusterRoleBinding
    async fn get_cluster_role_binding(&self, name: &str) -> Result<ClusterRoleBinding>;

    /// Create a ClusterRole
    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<()>;

    /// Create a ServiceAccount
    async fn create_service_account(&self, account: &ServiceAccount) -> Result<()>;

    /// Create a ClusterRoleBinding
    async fn create_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<()>;
}

/// [`ClusterApi`] backed by a `kube::Client`
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
    field_manager: String,
}

impl KubeClusterApi {
    /// Create a new API wrapper
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

/// Name of an object about to be written
fn object_name(name: &Option<String>, kind: &str) -> Result<String> {
    name.clone()
        .ok_or_else(|| OperatorError::InvalidConfig(format!("{} missing metadata.name", kind)))
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_controller(&self, namespace: &str, name: &str) -> Result<Controller> {
        let api: Api<Controller> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| OperatorError::from_kube(e, "Controller", namespace, name))
    }

    async fn patch_controller_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ControllerStatus,
    ) -> Result<()> {
        let api: Api<Controller> = Api::namespaced(self.client.clone(), namespace);

        debug!(name = %name, phase = ?status.phase, "Updating controller status");

        let patch = serde_json::json!({
            "status": status
        });

        let patch_params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        api.patch_status(name, &patch_params, &Patch::Merge(&patch))
            .await
            .map_err(|e| OperatorError::from_kube(e, "Controller", namespace, name))?;

        Ok(())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| OperatorError::from_kube(e, "Deployment", namespace, name))
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let name = object_name(&deployment.metadata.name, "Deployment")?;
        let namespace = deployment
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);

        debug!(name = %name, namespace = %namespace, "Replacing Deployment");

        api.replace(&name, &self.post_params(), deployment)
            .await
            .map_err(|e| OperatorError::from_kube(e, "Deployment", &namespace, &name))
    }

    async fn get_cluster_role(&self, name: &str) -> Result<ClusterRole> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        api.get(name)
            .await
            .map_err(|e| OperatorError::from_kube(e, "ClusterRole", "", name))
    }

    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccount> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| OperatorError::from_kube(e, "ServiceAccount", namespace, name))
    }

    async fn get_cluster_role_binding(&self, name: &str) -> Result<ClusterRoleBinding> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        api.get(name)
            .await
            .map_err(|e| OperatorError::from_kube(e, "ClusterRoleBinding", "", name))
    }

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<()> {
        let name = object_name(&role.metadata.name, "ClusterRole")?;
        let api: Api<ClusterRole> = Api::all(self.client.clone());

        debug!(name = %name, "Creating ClusterRole");

        api.create(&self.post_params(), role)
            .await
            .map_err(|e| OperatorError::from_kube(e, "ClusterRole", "", &name))?;
        Ok(())
    }

    async fn create_service_account(&self, account: &ServiceAccount) -> Result<()> {
        let name = object_name(&account.metadata.name, "ServiceAccount")?;
        let namespace = account
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), &namespace);

        debug!(name = %name, namespace = %namespace, "Creating ServiceAccount");

        api.create(&self.post_params(), account)
            .await
            .map_err(|e| OperatorError::from_kube(e, "ServiceAccount", &namespace, &name))?;
        Ok(())
    }

    async fn create_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<()> {
        let name = object_name(&binding.metadata.name, "ClusterRoleBinding")?;
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());

        debug!(name = %name, "Creating ClusterRoleBinding");

        api.create(&self.post_params(), binding)
            .await
            .map_err(|e| OperatorError::from_kube(e, "ClusterRoleBinding", "", &name))?;
        Ok(())
    }
}
