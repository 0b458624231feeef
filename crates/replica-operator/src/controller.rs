//! Controller reconciliation
//!
//! This module implements the Kubernetes controller pattern for `Controller`
//! resources. Each pass re-reads the resource, provisions the RBAC bundle,
//! binds the target Deployment to its owner and converges its replica
//! count. Passes are level-triggered and bounded by a deadline; retries and
//! periodic re-checks are expressed only through the returned [`Action`].

use crate::cluster_api::{ClusterApi, KubeClusterApi};
use crate::config::ReconcilerConfig;
use crate::crd::{Controller, ControllerPhase, ControllerStatus};
use crate::deployment::{self, Convergence};
use crate::error::{ErrorKind, OperatorError, Result};
use crate::owner_index::OwnerIndex;
use crate::ownership;
use crate::rbac;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::Api;
use kube::runtime::controller::{Action, Config as ControllerConfig};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Metrics for the controller
#[derive(Clone)]
pub struct ControllerMetrics {
    /// Counter for reconciliation attempts
    pub reconciliations: metrics::Counter,
    /// Counter for corrective writes (creates and updates)
    pub writes: metrics::Counter,
    /// Histogram for reconciliation duration
    pub duration: metrics::Histogram,
}

impl ControllerMetrics {
    /// Create new controller metrics
    pub fn new() -> Self {
        Self {
            reconciliations: metrics::counter!("replica_operator_reconciliations_total"),
            writes: metrics::counter!("replica_operator_writes_total"),
            duration: metrics::histogram!("replica_operator_reconciliation_duration_seconds"),
        }
    }

    /// Count a failed pass under its error kind
    pub fn record_error(&self, kind: ErrorKind) {
        metrics::counter!("replica_operator_reconciliation_errors_total", "kind" => kind.as_str())
            .increment(1);
    }
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// What a successful pass did
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    /// RBAC objects created in this pass
    pub rbac_created: usize,
    /// Whether the owner reference was added in this pass
    pub bound: bool,
    /// Whether the Deployment is controlled by this Controller after the pass
    pub owner_bound: bool,
    /// Why the Deployment is not bound, when it is not
    pub notice: Option<String>,
    /// Replica convergence step
    pub convergence: Convergence,
}

impl PassReport {
    /// Number of write calls issued
    pub fn writes(&self) -> usize {
        self.rbac_created + usize::from(self.bound) + usize::from(self.convergence.updated)
    }
}

/// The reconcile engine.
///
/// Holds no mutable state: everything a pass needs is re-read through the
/// [`ClusterApi`] it was constructed with.
pub struct Reconciler {
    api: Arc<dyn ClusterApi>,
    index: OwnerIndex,
    config: ReconcilerConfig,
    metrics: Option<ControllerMetrics>,
}

impl Reconciler {
    /// Create an engine over the given API
    pub fn new(api: Arc<dyn ClusterApi>, config: ReconcilerConfig) -> Self {
        Self {
            api,
            index: OwnerIndex::for_controller(),
            config,
            metrics: None,
        }
    }

    /// Record metrics for every pass
    pub fn with_metrics(mut self, metrics: ControllerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Override the owner apiVersion/kind used for binding and indexing
    pub fn with_owner_index(mut self, index: OwnerIndex) -> Self {
        self.index = index;
        self
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn owner_index(&self) -> &OwnerIndex {
        &self.index
    }

    /// Run one bounded pass for `key`.
    ///
    /// A deleted Controller yields `Action::await_change()`; success yields a
    /// requeue after the resync interval. Exceeding the deadline drops the
    /// in-flight call and reports [`OperatorError::Cancelled`].
    #[instrument(skip(self), fields(name = %key.name, namespace = key.namespace.as_deref()))]
    pub async fn reconcile(&self, key: &ObjectRef<Controller>) -> Result<Action> {
        let start = Instant::now();

        if let Some(ref metrics) = self.metrics {
            metrics.reconciliations.increment(1);
        }

        let result = match tokio::time::timeout(self.config.reconcile_timeout, self.pass(key)).await
        {
            Ok(result) => result,
            Err(_) => Err(OperatorError::Cancelled(self.config.reconcile_timeout)),
        };

        if let Some(ref metrics) = self.metrics {
            metrics.duration.record(start.elapsed().as_secs_f64());
            if let Err(ref e) = result {
                metrics.record_error(e.kind());
            }
        }

        result
    }

    async fn pass(&self, key: &ObjectRef<Controller>) -> Result<Action> {
        let namespace = key.namespace.as_deref().unwrap_or("default");

        let controller = match self.api.get_controller(namespace, &key.name).await {
            Ok(controller) => controller,
            Err(OperatorError::NotFound { .. }) => {
                debug!(name = %key.name, namespace = %namespace, "Controller deleted, nothing to do");
                return Ok(Action::await_change());
            }
            Err(e) => return Err(e),
        };

        match self.apply(&controller).await {
            Ok(report) => {
                if let Some(ref metrics) = self.metrics {
                    metrics.writes.increment(report.writes() as u64);
                }
                self.write_status(&controller, Some(synced_status(&controller, &report)))
                    .await;
                Ok(Action::requeue(self.config.resync_interval))
            }
            Err(e) => {
                self.write_status(&controller, failed_status(&controller, &e))
                    .await;
                Err(e)
            }
        }
    }

    /// Converge one Controller: RBAC, ownership, then replicas
    #[instrument(skip(self, controller), fields(workload = %controller.spec.name, workload_namespace = %controller.spec.namespace))]
    async fn apply(&self, controller: &Controller) -> Result<PassReport> {
        let spec = &controller.spec;

        if let Some(message) = spec.validation_message() {
            warn!(name = %controller.name_any(), errors = %message, "Controller spec validation failed");
            return Err(OperatorError::InvalidConfig(message));
        }
        let desired = spec.desired_replicas().ok_or_else(|| {
            OperatorError::InvalidConfig(format!("count {} out of range", spec.count))
        })?;

        let (_, rbac_created) =
            rbac::ensure_bundle(self.api.as_ref(), &spec.name, &spec.namespace).await?;

        let owner_name = controller.name_any();
        let owner_namespace = controller
            .namespace()
            .unwrap_or_else(|| "default".to_string());
        let same_namespace = owner_namespace == spec.namespace;

        let workload = self.api.get_deployment(&spec.namespace, &spec.name).await?;
        let bound = if same_namespace {
            ownership::ensure_owned(self.api.as_ref(), &self.index, workload, controller).await?
        } else {
            // Owner references cannot cross namespaces; scale without binding
            warn!(
                name = %owner_name,
                namespace = %owner_namespace,
                "Target Deployment is in another namespace, skipping owner reference"
            );
            false
        };

        let convergence =
            deployment::converge(self.api.as_ref(), &spec.name, &spec.namespace, desired).await?;

        let owner_bound = same_namespace
            && self.index.owner_of(&convergence.snapshot.owner_references)
                == Some(owner_name.as_str());
        let notice = match (owner_bound, same_namespace) {
            (true, _) => None,
            (false, false) => Some(format!(
                "Deployment {}/{} is outside namespace {}; owner reference not set",
                spec.namespace, spec.name, owner_namespace
            )),
            (false, true) => Some(format!(
                "Deployment {}/{} is controlled by another owner",
                spec.namespace, spec.name
            )),
        };

        info!(
            name = %controller.name_any(),
            replicas = convergence.snapshot.replicas,
            scaled = convergence.updated,
            bound,
            owner_bound,
            rbac_created,
            "Reconciliation complete"
        );

        Ok(PassReport {
            rbac_created,
            bound,
            owner_bound,
            notice,
            convergence,
        })
    }

    /// Patch status only when it changed. Failures are logged, not returned.
    async fn write_status(&self, controller: &Controller, status: Option<ControllerStatus>) {
        if !self.config.update_status {
            return;
        }
        let Some(status) = status else {
            return;
        };
        if controller.status.as_ref() == Some(&status) {
            return;
        }

        let namespace = controller.namespace().unwrap_or_else(|| "default".to_string());
        let name = controller.name_any();
        if let Err(e) = self
            .api
            .patch_controller_status(&namespace, &name, &status)
            .await
        {
            warn!(name = %name, error = %e, "Failed to update controller status");
        }
    }
}

/// Status after a successful pass
fn synced_status(controller: &Controller, report: &PassReport) -> ControllerStatus {
    ControllerStatus {
        phase: ControllerPhase::Synced,
        replicas: Some(report.convergence.snapshot.replicas),
        owner_bound: report.owner_bound,
        observed_generation: controller.metadata.generation.unwrap_or(0),
        message: report.notice.clone(),
    }
}

/// Status after a failed pass; `None` leaves the status untouched
fn failed_status(controller: &Controller, error: &OperatorError) -> Option<ControllerStatus> {
    let previous = controller.status.clone().unwrap_or_default();
    let observed_generation = controller.metadata.generation.unwrap_or(0);

    match error.kind() {
        ErrorKind::Cancelled | ErrorKind::Conflict => None,
        ErrorKind::NotFoundTarget => Some(ControllerStatus {
            phase: ControllerPhase::WorkloadMissing,
            replicas: None,
            owner_bound: false,
            observed_generation,
            message: Some(error.to_string()),
        }),
        ErrorKind::Transient
        | ErrorKind::Invalid
        | ErrorKind::NotFoundPrimary
        | ErrorKind::AlreadyExists => Some(ControllerStatus {
            phase: ControllerPhase::Failed,
            replicas: previous.replicas,
            owner_bound: previous.owner_bound,
            observed_generation,
            message: Some(error.to_string()),
        }),
    }
}

/// Start the Controller controller
pub async fn run_controller(
    client: Client,
    namespace: Option<String>,
    config: ReconcilerConfig,
) -> Result<()> {
    let controllers: Api<Controller> = match &namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    // Watch managed Deployments and route them to their owner
    let deployments: Api<Deployment> = match &namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    let api = Arc::new(KubeClusterApi::new(client, config.field_manager.clone()));
    let runtime_config = ControllerConfig::default().concurrency(config.concurrency);
    let ctx = Arc::new(Reconciler::new(api, config).with_metrics(ControllerMetrics::new()));
    let index = ctx.owner_index().clone();

    info!(
        namespace = namespace.as_deref().unwrap_or("all"),
        "Starting Controller controller"
    );

    kube::runtime::Controller::new(controllers, Config::default())
        .watches(deployments, Config::default(), move |deployment| {
            index.owner_refs(&deployment)
        })
        .with_config(runtime_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    debug!(
                        name = obj.name,
                        namespace = obj.namespace,
                        ?action,
                        "Reconciliation completed"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation failed");
                }
            }
        })
        .await;

    Ok(())
}

/// Runtime entry point; re-reads the object by key rather than trusting the event
async fn reconcile(controller: Arc<Controller>, ctx: Arc<Reconciler>) -> Result<Action> {
    ctx.reconcile(&ObjectRef::from_obj(controller.as_ref())).await
}

/// Error policy for the controller: every error requeues with a kind-based delay.
fn error_policy(controller: Arc<Controller>, error: &OperatorError, ctx: Arc<Reconciler>) -> Action {
    let delay = error.requeue_delay(ctx.config());

    warn!(
        error = %error,
        kind = error.kind().as_str(),
        retryable = error.is_retryable(),
        delay_secs = delay.as_secs(),
        "Reconciliation error for '{}', will retry",
        controller.name_any()
    );

    Action::requeue(delay)
}
