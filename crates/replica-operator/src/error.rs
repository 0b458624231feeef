//! Error types for the replica operator

use crate::config::ReconcilerConfig;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during operator operations
#[derive(Error, Debug)]
pub enum OperatorError {
    /// Kubernetes API error that does not map to a more specific variant
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Resource not found
    #[error("Resource not found: {kind}/{name} in namespace {namespace}")]
    NotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    /// Create collided with an existing object
    #[error("Resource already exists: {kind}/{name}")]
    AlreadyExists { kind: String, name: String },

    /// Update raced with another writer
    #[error("Conflicting update on {kind}/{name}: {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    /// Workload is already controlled by something else
    #[error("{kind}/{name} is controlled by {owner}, refusing to add a second controller reference")]
    OwnershipConflict {
        kind: String,
        name: String,
        owner: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Reconcile pass ran past its deadline
    #[error("Reconcile pass cancelled after {0:?}")]
    Cancelled(Duration),
}

/// Result type for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Classification of a failed (or swallowed) operation.
///
/// `NotFoundPrimary` and `AlreadyExists` never reach the scheduler: the engine
/// absorbs them locally. Every other kind is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The Controller resource itself is gone
    NotFoundPrimary,
    /// The managed workload is missing
    NotFoundTarget,
    /// Idempotent create hit an existing object
    AlreadyExists,
    /// Concurrent modification
    Conflict,
    /// Generic infrastructure failure
    Transient,
    /// Pass deadline exceeded
    Cancelled,
    /// Spec or ownership is invalid; waits for a change or the longest backoff
    Invalid,
}

impl ErrorKind {
    /// Metric label for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFoundPrimary => "not_found_primary",
            ErrorKind::NotFoundTarget => "not_found_target",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Transient => "transient",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Invalid => "invalid",
        }
    }
}

impl OperatorError {
    /// Map a raw `kube::Error` onto the variant the engine reasons about.
    pub fn from_kube(err: kube::Error, kind: &str, namespace: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => OperatorError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            },
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                OperatorError::AlreadyExists {
                    kind: kind.to_string(),
                    name: name.to_string(),
                }
            }
            kube::Error::Api(ae) if ae.code == 409 => OperatorError::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
                message: ae.message,
            },
            other => OperatorError::KubeError(other),
        }
    }

    /// Classify an error that surfaced from a reconcile pass.
    ///
    /// A `NotFound` that escapes the engine always refers to the target
    /// workload; a missing Controller is handled before it can surface.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OperatorError::NotFound { .. } => ErrorKind::NotFoundTarget,
            OperatorError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            OperatorError::Conflict { .. } => ErrorKind::Conflict,
            OperatorError::Cancelled(_) => ErrorKind::Cancelled,
            OperatorError::OwnershipConflict { .. } | OperatorError::InvalidConfig(_) => {
                ErrorKind::Invalid
            }
            OperatorError::KubeError(_) | OperatorError::SerializationError(_) => {
                ErrorKind::Transient
            }
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self.kind() {
            ErrorKind::NotFoundTarget
            | ErrorKind::Conflict
            | ErrorKind::Transient
            | ErrorKind::Cancelled => true,
            ErrorKind::NotFoundPrimary | ErrorKind::AlreadyExists | ErrorKind::Invalid => false,
        }
    }

    /// Requeue delay handed back to the scheduler.
    ///
    /// Non-retryable errors still requeue, at the maximum delay, so that no
    /// error permanently stops reconciliation of a resource.
    pub fn requeue_delay(&self, config: &ReconcilerConfig) -> Duration {
        match self.kind() {
            ErrorKind::Conflict | ErrorKind::Cancelled => config.conflict_requeue,
            ErrorKind::NotFoundTarget | ErrorKind::Transient => config.error_requeue,
            ErrorKind::NotFoundPrimary | ErrorKind::AlreadyExists | ErrorKind::Invalid => {
                config.max_error_requeue
            }
        }
    }
}
