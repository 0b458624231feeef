//! Reconciler configuration

use std::time::Duration;

/// Periodic re-check after a successful pass
const DEFAULT_RESYNC_SECONDS: u64 = 300; // 5 minutes

/// Deadline for a single reconcile pass
const DEFAULT_RECONCILE_TIMEOUT_SECONDS: u64 = 30;

/// Requeue after a conflict or cancelled pass
const CONFLICT_REQUEUE_SECONDS: u64 = 5;

/// Requeue after a transient failure or missing workload
const ERROR_REQUEUE_SECONDS: u64 = 30;

/// Requeue for errors that need a spec or ownership change
const MAX_ERROR_REQUEUE_SECONDS: u64 = 600;

/// Field manager name used for status patches
pub const DEFAULT_FIELD_MANAGER: &str = "replica-operator";

/// Tunables for the reconcile engine and the controller loop
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Requeue-after returned on success
    pub resync_interval: Duration,
    /// Deadline for one pass
    pub reconcile_timeout: Duration,
    /// Requeue-after for `Conflict` and `Cancelled`
    pub conflict_requeue: Duration,
    /// Requeue-after for `NotFoundTarget` and `Transient`
    pub error_requeue: Duration,
    /// Requeue-after for `Invalid`
    pub max_error_requeue: Duration,
    /// Whether the Controller status subresource is maintained
    pub update_status: bool,
    /// Maximum concurrent reconciles across keys (0 = unbounded)
    pub concurrency: u16,
    /// Field manager for server-side writes
    pub field_manager: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_SECONDS),
            reconcile_timeout: Duration::from_secs(DEFAULT_RECONCILE_TIMEOUT_SECONDS),
            conflict_requeue: Duration::from_secs(CONFLICT_REQUEUE_SECONDS),
            error_requeue: Duration::from_secs(ERROR_REQUEUE_SECONDS),
            max_error_requeue: Duration::from_secs(MAX_ERROR_REQUEUE_SECONDS),
            update_status: true,
            concurrency: 0,
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.resync_interval, Duration::from_secs(300));
        assert_eq!(config.reconcile_timeout, Duration::from_secs(30));
        assert!(config.conflict_requeue < config.error_requeue);
        assert!(config.error_requeue < config.max_error_requeue);
        assert!(config.update_status);
        assert_eq!(config.field_manager, "replica-operator");
    }
}
