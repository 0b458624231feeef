//! # Replica Operator
//!
//! Kubernetes operator that keeps a Deployment at the replica count declared
//! by a `Controller` custom resource.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use replica_operator::prelude::*;
//! use kube::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::try_default().await?;
//!     run_controller(client, None, ReconcilerConfig::default()).await
//! }
//! ```
//!
//! ## Architecture
//!
//! Every pass is level-triggered. It re-reads all state and corrects only
//! what drifted:
//!
//! 1. **Fetch**: read the `Controller`. If it is gone, there is nothing to do.
//! 2. **RBAC**: create the ServiceAccount, the shared ClusterRole and a
//!    binding for the target. Existing objects are left alone.
//! 3. **Own**: add a controller owner reference to the target Deployment.
//! 4. **Scale**: update `spec.replicas` when it differs from `count`.
//!
//! Changes to a managed Deployment are routed back to the Controller that
//! owns it through the [`owner_index`], so a manual scale is reverted on the
//! next pass.
//!
//! ## Custom Resource Definition
//!
//! ```yaml
//! apiVersion: batch.controller.kubebuilder.io/v1
//! kind: Controller
//! metadata:
//!   name: web
//! spec:
//!   name: web
//!   namespace: default
//!   count: 5
//! ```
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types with validation
//! - [`controller`] - Reconcile engine and controller setup
//! - [`cluster_api`] - Typed API primitives the engine consumes
//! - [`owner_index`] - Deployment to Controller trigger mapping
//! - [`ownership`] - Owner reference binding
//! - [`deployment`] - Replica count convergence
//! - [`rbac`] - RBAC bundle provisioning
//! - [`config`] - Engine tunables
//! - [`error`] - Error types and classification
//!
//! ## Metrics
//!
//! - `replica_operator_reconciliations_total` - Total reconciliation attempts
//! - `replica_operator_reconciliation_errors_total{kind}` - Failed passes by error kind
//! - `replica_operator_writes_total` - Corrective create/update calls
//! - `replica_operator_reconciliation_duration_seconds` - Reconciliation latency

pub mod cluster_api;
pub mod config;
pub mod controller;
pub mod crd;
pub mod deployment;
pub mod error;
pub mod owner_index;
pub mod ownership;
pub mod rbac;

#[cfg(test)]
mod testing;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::cluster_api::{ClusterApi, KubeClusterApi};
    pub use crate::config::ReconcilerConfig;
    pub use crate::controller::{run_controller, ControllerMetrics, PassReport, Reconciler};
    pub use crate::crd::{Controller, ControllerPhase, ControllerSpec, ControllerStatus};
    pub use crate::deployment::{converge, Convergence, WorkloadSnapshot};
    pub use crate::error::{ErrorKind, OperatorError, Result};
    pub use crate::owner_index::OwnerIndex;
    pub use crate::ownership::ensure_owned;
    pub use crate::rbac::{ensure_bundle, RbacBundle};
}
