//! Health sampling error types.

use thiserror::Error;

use cage_aws::ControlPlaneError;

#[derive(Debug, Error)]
pub enum HealthError {
    /// An ARN did not carry the expected suffix pattern.
    #[error("could not find {pattern} id in '{arn}'")]
    MalformedArn { pattern: &'static str, arn: String },

    /// The window carried no usable traffic data. The sample is an
    /// error, never a zero reading; the operator re-runs.
    #[error("failed to get precise metric data for the window")]
    InsufficientMetricData,

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
}

pub type HealthResult<T> = Result<T, HealthError>;
