//! The rollout engine — canary-gated gradual replacement of a running
//! service by a next service.
//!
//! [`driver::RolloutDriver`] owns the state machine: register the next
//! task definition, create the next service in parallel with the
//! current one, then loop sampling target-group health and replacing
//! tasks in exponentially growing batches until the current service is
//! empty, rolling everything back if a canary round fails.

pub mod driver;
pub mod error;
pub mod plan;
pub mod replace;
pub mod rollback;

pub use driver::{RolloutDriver, RolloutSummary, UpResult};
pub use error::RolloutError;
pub use plan::{batch_size, estimate_roll_out_count, RolloutState};
