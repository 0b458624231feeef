//! In-memory [`ClusterApi`] used by unit tests

use crate::cluster_api::ClusterApi;
use crate::crd::{Controller, ControllerSpec, ControllerStatus};
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Build a Controller resource with a uid and generation
pub fn controller(name: &str, namespace: &str, spec: ControllerSpec) -> Controller {
    let mut controller = Controller::new(name, spec);
    controller.metadata.namespace = Some(namespace.to_string());
    controller.metadata.uid = Some(format!("uid-{}", name));
    controller.metadata.generation = Some(1);
    controller
}

/// Build a Deployment with the given replica count
pub fn deployment(name: &str, namespace: &str, replicas: i32) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build an owner reference
pub fn owner_ref(api_version: &str, kind: &str, name: &str, controller: bool) -> OwnerReference {
    OwnerReference {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("uid-{}", name),
        controller: Some(controller),
        block_owner_deletion: None,
    }
}

#[derive(Default)]
struct State {
    controllers: BTreeMap<Key, Controller>,
    deployments: BTreeMap<Key, Deployment>,
    cluster_roles: BTreeMap<String, ClusterRole>,
    service_accounts: BTreeMap<Key, ServiceAccount>,
    bindings: BTreeMap<String, ClusterRoleBinding>,
    update_errors: VecDeque<OperatorError>,
    get_errors: VecDeque<OperatorError>,
    create_errors: VecDeque<OperatorError>,
    deployment_updates: usize,
    status_patches: usize,
    create_calls: usize,
    resource_version: u64,
}

impl State {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

/// Fake API server: stores objects, counts writes, and injects errors
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
    get_delay: Option<Duration>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `get_deployment` sleep first
    pub fn with_get_delay(mut self, delay: Duration) -> Self {
        self.get_delay = Some(delay);
        self
    }

    pub fn insert_controller(&self, controller: Controller) {
        let mut state = self.state.lock().unwrap();
        let k = key(
            controller.metadata.namespace.as_deref().unwrap_or("default"),
            controller.metadata.name.as_deref().unwrap_or_default(),
        );
        state.controllers.insert(k, controller);
    }

    pub fn remove_controller(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .controllers
            .remove(&key(namespace, name));
    }

    pub fn insert_deployment(&self, mut deployment: Deployment) {
        let mut state = self.state.lock().unwrap();
        deployment.metadata.resource_version = Some(state.next_version());
        let k = key(
            deployment.metadata.namespace.as_deref().unwrap_or("default"),
            deployment.metadata.name.as_deref().unwrap_or_default(),
        );
        state.deployments.insert(k, deployment);
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.state
            .lock()
            .unwrap()
            .deployments
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn replicas(&self, namespace: &str, name: &str) -> Option<i32> {
        self.deployment(namespace, name)
            .and_then(|d| d.spec)
            .and_then(|s| s.replicas)
    }

    pub fn controller_status(&self, namespace: &str, name: &str) -> Option<ControllerStatus> {
        self.state
            .lock()
            .unwrap()
            .controllers
            .get(&key(namespace, name))
            .and_then(|c| c.status.clone())
    }

    /// Queue an error returned by the next `update_deployment`
    pub fn fail_next_update(&self, err: OperatorError) {
        self.state.lock().unwrap().update_errors.push_back(err);
    }

    /// Queue an error returned by the next RBAC lookup
    pub fn fail_next_get(&self, err: OperatorError) {
        self.state.lock().unwrap().get_errors.push_back(err);
    }

    /// Queue an error returned by the next create call
    pub fn fail_next_create(&self, err: OperatorError) {
        self.state.lock().unwrap().create_errors.push_back(err);
    }

    pub fn deployment_updates(&self) -> usize {
        self.state.lock().unwrap().deployment_updates
    }

    pub fn status_patches(&self) -> usize {
        self.state.lock().unwrap().status_patches
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }

    pub fn cluster_role_count(&self) -> usize {
        self.state.lock().unwrap().cluster_roles.len()
    }

    pub fn service_account_count(&self) -> usize {
        self.state.lock().unwrap().service_accounts.len()
    }

    pub fn binding_count(&self) -> usize {
        self.state.lock().unwrap().bindings.len()
    }

    pub fn has_service_account(&self, namespace: &str, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .service_accounts
            .contains_key(&key(namespace, name))
    }

    fn begin_create(&self, kind: &str, name: &str) -> Result<std::sync::MutexGuard<'_, State>> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        if let Some(err) = state.create_errors.pop_front() {
            return Err(err);
        }
        if name.is_empty() {
            return Err(OperatorError::InvalidConfig(format!(
                "{} missing metadata.name",
                kind
            )));
        }
        Ok(state)
    }
}

/// A 500 from the API server, classified as transient
pub fn transient_error() -> OperatorError {
    OperatorError::KubeError(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: "etcdserver: request timed out".to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

fn already_exists(kind: &str, name: &str) -> OperatorError {
    OperatorError::AlreadyExists {
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

fn not_found(kind: &str, namespace: &str, name: &str) -> OperatorError {
    OperatorError::NotFound {
        kind: kind.to_string(),
        name: name.to_string(),
        namespace: namespace.to_string(),
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_controller(&self, namespace: &str, name: &str) -> Result<Controller> {
        self.state
            .lock()
            .unwrap()
            .controllers
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("Controller", namespace, name))
    }

    async fn patch_controller_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ControllerStatus,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.status_patches += 1;
        let controller = state
            .controllers
            .get_mut(&key(namespace, name))
            .ok_or_else(|| not_found("Controller", namespace, name))?;
        controller.status = Some(status.clone());
        Ok(())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        if let Some(delay) = self.get_delay {
            tokio::time::sleep(delay).await;
        }
        self.deployment(namespace, name)
            .ok_or_else(|| not_found("Deployment", namespace, name))
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let mut state = self.state.lock().unwrap();
        state.deployment_updates += 1;
        if let Some(err) = state.update_errors.pop_front() {
            return Err(err);
        }

        let namespace = deployment.metadata.namespace.clone().unwrap_or_default();
        let name = deployment.metadata.name.clone().unwrap_or_default();
        let k = key(&namespace, &name);

        let stored_version = match state.deployments.get(&k) {
            Some(stored) => stored.metadata.resource_version.clone(),
            None => return Err(not_found("Deployment", &namespace, &name)),
        };
        if deployment.metadata.resource_version != stored_version {
            return Err(OperatorError::Conflict {
                kind: "Deployment".to_string(),
                name,
                message: "the object has been modified".to_string(),
            });
        }

        let mut updated = deployment.clone();
        updated.metadata.resource_version = Some(state.next_version());
        state.deployments.insert(k, updated.clone());
        Ok(updated)
    }

    async fn get_cluster_role(&self, name: &str) -> Result<ClusterRole> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.get_errors.pop_front() {
            return Err(err);
        }
        state
            .cluster_roles
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("ClusterRole", "", name))
    }

    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccount> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.get_errors.pop_front() {
            return Err(err);
        }
        state
            .service_accounts
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("ServiceAccount", namespace, name))
    }

    async fn get_cluster_role_binding(&self, name: &str) -> Result<ClusterRoleBinding> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.get_errors.pop_front() {
            return Err(err);
        }
        state
            .bindings
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("ClusterRoleBinding", "", name))
    }

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<()> {
        let name = role.metadata.name.clone().unwrap_or_default();
        let mut state = self.begin_create("ClusterRole", &name)?;
        if state.cluster_roles.contains_key(&name) {
            return Err(already_exists("ClusterRole", &name));
        }
        state.cluster_roles.insert(name, role.clone());
        Ok(())
    }

    async fn create_service_account(&self, account: &ServiceAccount) -> Result<()> {
        let name = account.metadata.name.clone().unwrap_or_default();
        let namespace = account.metadata.namespace.clone().unwrap_or_default();
        let mut state = self.begin_create("ServiceAccount", &name)?;
        let k = key(&namespace, &name);
        if state.service_accounts.contains_key(&k) {
            return Err(already_exists("ServiceAccount", &name));
        }
        state.service_accounts.insert(k, account.clone());
        Ok(())
    }

    async fn create_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<()> {
        let name = binding.metadata.name.clone().unwrap_or_default();
        let mut state = self.begin_create("ClusterRoleBinding", &name)?;
        if state.bindings.contains_key(&name) {
            return Err(already_exists("ClusterRoleBinding", &name));
        }
        state.bindings.insert(name, binding.clone());
        Ok(())
    }
}
