//! Owner index
//!
//! Maps a managed Deployment back to the Controller that owns it, so that
//! edits made directly to the workload (a manual scale, a rollout) trigger
//! reconciliation of the owning resource.

use crate::crd::Controller;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::reflector::ObjectRef;
use kube::{Resource, ResourceExt};

/// Extracts owner keys for a fixed owner apiVersion/kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerIndex {
    api_version: String,
    kind: String,
}

impl OwnerIndex {
    /// Index on an arbitrary owner apiVersion/kind
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }

    /// Index on the Controller CRD
    pub fn for_controller() -> Self {
        Self::new(Controller::api_version(&()), Controller::kind(&()))
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// True for a controller-flagged reference of the indexed apiVersion/kind
    pub fn matches(&self, reference: &OwnerReference) -> bool {
        reference.controller == Some(true)
            && reference.api_version == self.api_version
            && reference.kind == self.kind
    }

    /// Names of the owning Controller; zero or one entries.
    ///
    /// Returns a name only when exactly one reference matches. Zero matches
    /// or an ambiguous set both yield an empty result, independent of the
    /// order of the references.
    pub fn owner_keys(&self, deployment: &Deployment) -> Vec<String> {
        self.owner_of(deployment.owner_references())
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Name of the single controlling owner among `references`, if any
    pub fn owner_of<'a>(&self, references: &'a [OwnerReference]) -> Option<&'a str> {
        let mut matching = references.iter().filter(|r| self.matches(r));

        match (matching.next(), matching.next()) {
            (Some(owner), None) => Some(owner.name.as_str()),
            _ => None,
        }
    }

    /// Owner keys as reconcile triggers in the Deployment's namespace
    pub fn owner_refs(&self, deployment: &Deployment) -> Vec<ObjectRef<Controller>> {
        let namespace = deployment.namespace();
        self.owner_keys(deployment)
            .into_iter()
            .map(|name| match &namespace {
                Some(ns) => ObjectRef::new(&name).within(ns),
                None => ObjectRef::new(&name),
            })
            .collect()
    }
}

impl Default for OwnerIndex {
    fn default() -> Self {
        Self::for_controller()
    }
}
