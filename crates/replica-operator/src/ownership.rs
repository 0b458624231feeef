//! Ownership binder
//!
//! Makes the managed Deployment carry a controller owner reference back to
//! its Controller. The reference is set once; non-matching references are
//! preserved.

use crate::cluster_api::ClusterApi;
use crate::crd::Controller;
use crate::error::{OperatorError, Result};
use crate::owner_index::OwnerIndex;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use tracing::{info, warn};

/// Controller owner reference pointing at `owner`
pub fn build_owner_reference(index: &OwnerIndex, owner: &Controller) -> Result<OwnerReference> {
    let uid = owner.uid().ok_or_else(|| {
        OperatorError::InvalidConfig(format!(
            "Controller {} has no metadata.uid",
            owner.name_any()
        ))
    })?;

    Ok(OwnerReference {
        api_version: index.api_version().to_string(),
        kind: index.kind().to_string(),
        name: owner.name_any(),
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Ensure `deployment` is controlled by `owner`.
///
/// Returns `true` if an update was issued. A workload already controlled by
/// a different kind is refused with [`OperatorError::OwnershipConflict`].
/// Owner references cannot cross namespaces; the API server's garbage
/// collector treats such a reference as dangling.
pub async fn ensure_owned(
    api: &dyn ClusterApi,
    index: &OwnerIndex,
    mut deployment: Deployment,
    owner: &Controller,
) -> Result<bool> {
    let owner_name = owner.name_any();

    if let Some(existing) = deployment.owner_references().iter().find(|r| index.matches(r)) {
        if existing.name != owner_name {
            warn!(
                deployment = %deployment.name_any(),
                owner = %existing.name,
                expected = %owner_name,
                "Deployment already controlled by another Controller, leaving reference as-is"
            );
        }
        return Ok(false);
    }

    if let Some(foreign) = deployment
        .owner_references()
        .iter()
        .find(|r| r.controller == Some(true))
    {
        return Err(OperatorError::OwnershipConflict {
            kind: "Deployment".to_string(),
            name: deployment.name_any(),
            owner: format!("{}/{}", foreign.kind, foreign.name),
        });
    }

    if owner.namespace() != deployment.namespace() {
        return Err(OperatorError::InvalidConfig(format!(
            "Controller {} cannot own Deployment {} across namespaces",
            owner_name,
            deployment.name_any()
        )));
    }

    let reference = build_owner_reference(index, owner)?;
    deployment
        .metadata
        .owner_references
        .get_or_insert_with(Vec::new)
        .push(reference);

    api.update_deployment(&deployment).await?;

    info!(
        deployment = %deployment.name_any(),
        owner = %owner_name,
        "Bound Deployment to Controller"
    );

    Ok(true)
}
