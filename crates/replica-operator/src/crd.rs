//! Custom Resource Definition for the replica operator
//!
//! This module defines the `Controller` CRD that declares which Deployment
//! to manage and how many replicas it should run.

use kube::CustomResource;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use validator::{Validate, ValidationError};

/// API group of the Controller CRD
pub const CONTROLLER_GROUP: &str = "batch.controller.kubebuilder.io";

/// API version of the Controller CRD
pub const CONTROLLER_VERSION: &str = "v1";

/// Kind of the Controller CRD
pub const CONTROLLER_KIND: &str = "Controller";

/// Regex for validating Kubernetes object names (RFC 1123 subdomain)
static SUBDOMAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap()
});

/// Regex for validating namespace names (RFC 1123 label)
static LABEL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

/// Validate a workload name (RFC 1123 subdomain)
fn validate_workload_name(value: &str) -> Result<(), ValidationError> {
    if !SUBDOMAIN_REGEX.is_match(value) {
        return Err(ValidationError::new("invalid_name").with_message(
            format!("'{}' is not a valid Kubernetes name (RFC 1123)", value).into(),
        ));
    }
    Ok(())
}

/// Validate a namespace (RFC 1123 label)
fn validate_namespace(value: &str) -> Result<(), ValidationError> {
    if !LABEL_REGEX.is_match(value) {
        return Err(ValidationError::new("invalid_namespace").with_message(
            format!("'{}' is not a valid Kubernetes namespace (RFC 1123)", value).into(),
        ));
    }
    Ok(())
}

/// Controller custom resource definition
///
/// Names a Deployment and the replica count it should be held at. The
/// operator keeps the Deployment owned by this resource, provisions the RBAC
/// bundle its controlling process needs, and converges `spec.replicas` to
/// `count` on every pass.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[kube(
    group = "batch.controller.kubebuilder.io",
    version = "v1",
    kind = "Controller",
    plural = "controllers",
    shortname = "ctrl",
    namespaced,
    status = "ControllerStatus",
    printcolumn = r#"{"name":"Target", "type":"string", "jsonPath":".spec.name"}"#,
    printcolumn = r#"{"name":"Count", "type":"integer", "jsonPath":".spec.count"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSpec {
    /// Name of the target Deployment
    #[validate(length(min = 1, max = 253, message = "name must be 1-253 characters"))]
    #[validate(custom(function = "validate_workload_name"))]
    pub name: String,

    /// Namespace of the target Deployment
    #[validate(length(min = 1, max = 63, message = "namespace must be 1-63 characters"))]
    #[validate(custom(function = "validate_namespace"))]
    pub namespace: String,

    /// Desired replica count. Deployments store replicas as int32.
    #[validate(range(min = 0, max = 2147483647, message = "count must be between 0 and 2147483647"))]
    pub count: i64,
}

impl ControllerSpec {
    /// Desired replica count narrowed to the Deployment field type
    pub fn desired_replicas(&self) -> Option<i32> {
        i32::try_from(self.count).ok().filter(|c| *c >= 0)
    }

    /// Flatten validator output into one message
    pub fn validation_message(&self) -> Option<String> {
        let errors = self.validate().err()?;
        let mut messages: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(msg) => format!("{}: {}", field, msg),
                    None => format!("{}: {}", field, e.code),
                })
            })
            .collect();
        messages.sort();
        Some(messages.join("; "))
    }
}

/// Status of a Controller resource
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    /// Current phase
    pub phase: ControllerPhase,

    /// Replica count observed on the workload after the last pass
    #[serde(default)]
    pub replicas: Option<i32>,

    /// Whether the workload carries this Controller's owner reference
    #[serde(default)]
    pub owner_bound: bool,

    /// Generation of the spec the status was computed from
    #[serde(default)]
    pub observed_generation: i64,

    /// Human-readable detail for the phase
    #[serde(default)]
    pub message: Option<String>,
}

/// Phase of a Controller
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ControllerPhase {
    /// Not reconciled yet
    #[default]
    Pending,
    /// Workload is owned and at the declared count
    Synced,
    /// Target Deployment does not exist
    WorkloadMissing,
    /// Last pass failed
    Failed,
}
