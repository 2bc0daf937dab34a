//! Rollout error types.

use thiserror::Error;

use cage_aws::ControlPlaneError;
use cage_core::ConfigError;
use cage_health::HealthError;

#[derive(Debug, Error)]
pub enum RolloutError {
    /// A canary round measured the next service below threshold.
    #[error(
        "canary test failed at round {round}: availability={availability} (threshold: {availability_threshold}), response time={response_time}s (threshold: {response_time_threshold}s)"
    )]
    CanaryFailed {
        round: u32,
        availability: f64,
        availability_threshold: f64,
        response_time: f64,
        response_time_threshold: f64,
    },

    /// The loop ran more batches than the snapshot can explain.
    #[error(
        "estimated roll out attempts count exceeded: estimated={estimated}, replaced={replaced}/{original}"
    )]
    BudgetExceeded {
        estimated: u32,
        replaced: u64,
        original: u64,
    },

    /// Rollback ran to completion but some of it failed; the cluster
    /// needs manual remediation.
    #[error("rollback has not completed: succeeded={completed}, failed={failed}")]
    RollbackIncomplete { completed: u64, failed: u64 },

    #[error("next service '{0}' has no load balancer attached")]
    NoLoadBalancer(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Health(#[from] HealthError),

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
}

pub type RolloutResult<T> = Result<T, RolloutError>;
