//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while assembling the deploy configuration. All of these
/// abort before any control-plane side effect.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("deploy context at '{dir}' has no '{file}'")]
    MissingContext { dir: PathBuf, file: &'static str },

    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
