//! Convergence error types

use rigging_core::CoreError;
use thiserror::Error;

/// Errors that stop a run before any host is touched
#[derive(Error, Debug)]
pub enum ConvergeError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvergeError {
    pub fn validation(message: impl Into<String>) -> Self {
        ConvergeError::Validation(message.into())
    }
}

impl From<CoreError> for ConvergeError {
    fn from(err: CoreError) -> Self {
        ConvergeError::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConvergeError>;

/// Outcome of a single executor call that did not succeed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecError {
    #[error("{0}")]
    Failed(String),

    #[error("Host unreachable: {0}")]
    Unreachable(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}
