//! Reconciliation error types

use rigging_core::CoreError;
use thiserror::Error;

/// Reconciliation errors
///
/// `Validation` is raised before any provider call. `Provider` and `Timeout`
/// are reported per change inside an apply report; `StateCorruption` is
/// fatal and never repaired automatically.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("State file is corrupt: {0}")]
    StateCorruption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub fn validation(message: impl Into<String>) -> Self {
        CloudError::Validation(message.into())
    }

    pub fn provider(message: impl Into<String>) -> Self {
        CloudError::Provider(message.into())
    }
}

impl From<CoreError> for CloudError {
    fn from(err: CoreError) -> Self {
        CloudError::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
