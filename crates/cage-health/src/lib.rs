//! Health sampling — windowed availability and latency measurements
//! for a load-balancer target group.
//!
//! A sample *is* the measurement window: the sampler sleeps for the
//! rollout period, then aggregates the window's request, error, and
//! response-time metrics into one [`cage_core::types::ServiceHealth`].

pub mod arn;
pub mod error;
pub mod sampler;

pub use arn::{extract_alb_id, extract_target_group_id};
pub use error::HealthError;
pub use sampler::HealthSampler;
