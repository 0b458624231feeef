//! Deployment synchronizer
//!
//! Converges `spec.replicas` of the managed Deployment to the count declared
//! on the Controller. A write happens only on drift.

use crate::cluster_api::ClusterApi;
use crate::error::Result;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use tracing::{debug, info};

/// Replica count the API server assumes when `spec.replicas` is unset
const DEFAULT_DEPLOYMENT_REPLICAS: i32 = 1;

/// Observed state of the managed workload
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadSnapshot {
    pub name: String,
    pub namespace: String,
    pub replicas: i32,
    pub owner_references: Vec<OwnerReference>,
}

impl WorkloadSnapshot {
    pub fn from_deployment(deployment: &Deployment) -> Self {
        Self {
            name: deployment.name_any(),
            namespace: deployment.namespace().unwrap_or_default(),
            replicas: current_replicas(deployment),
            owner_references: deployment.owner_references().to_vec(),
        }
    }
}

/// Replica count as stored on the Deployment
pub fn current_replicas(deployment: &Deployment) -> i32 {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(DEFAULT_DEPLOYMENT_REPLICAS)
}

/// Result of a convergence step
#[derive(Debug, Clone, PartialEq)]
pub struct Convergence {
    pub snapshot: WorkloadSnapshot,
    /// Count observed before the step
    pub previous_replicas: i32,
    /// Whether an update was issued
    pub updated: bool,
}

/// Fetch the Deployment and set its replica count to `desired` if it differs.
///
/// `NotFound` on the fetch and `Conflict` on the update are returned as-is;
/// the caller decides how to treat them.
pub async fn converge(
    api: &dyn ClusterApi,
    name: &str,
    namespace: &str,
    desired: i32,
) -> Result<Convergence> {
    let mut deployment = api.get_deployment(namespace, name).await?;
    let current = current_replicas(&deployment);

    if current == desired {
        debug!(name = %name, namespace = %namespace, replicas = current, "Replica count in sync");
        return Ok(Convergence {
            snapshot: WorkloadSnapshot::from_deployment(&deployment),
            previous_replicas: current,
            updated: false,
        });
    }

    info!(
        name = %name,
        namespace = %namespace,
        from = current,
        to = desired,
        "Scaling Deployment"
    );

    deployment.spec.get_or_insert_with(Default::default).replicas = Some(desired);
    api.update_deployment(&deployment).await?;

    Ok(Convergence {
        snapshot: WorkloadSnapshot::from_deployment(&deployment),
        previous_replicas: current,
        updated: true,
    })
}
