//! Control-plane error types.

use thiserror::Error;

/// Errors surfaced by the control-plane adapter.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// The control plane rejected an RPC.
    #[error("control plane rejected {operation}: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },

    /// A described resource was not present.
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// A polling waiter exhausted its maximum attempts.
    #[error("waiter '{waiter}' timed out after {attempts} attempts")]
    WaiterTimeout {
        waiter: &'static str,
        attempts: u32,
    },

    /// The ambient cancellation signal fired mid-operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl ControlPlaneError {
    /// Wrap an SDK error for the named operation.
    pub fn rejected(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Rejected {
            operation,
            message: err.to_string(),
        }
    }
}

pub type ApiResult<T> = Result<T, ControlPlaneError>;
