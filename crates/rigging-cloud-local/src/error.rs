//! Local provider error types

use rigging_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocalError {
    #[error("Unsupported resource type: {0}")]
    UnsupportedType(String),

    #[error("Missing attribute '{attribute}' on {resource_type}")]
    MissingAttribute {
        resource_type: String,
        attribute: String,
    },

    #[error("Invalid attribute '{attribute}': {message}")]
    InvalidAttribute { attribute: String, message: String },

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl LocalError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        LocalError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

impl From<LocalError> for CloudError {
    fn from(err: LocalError) -> Self {
        match err {
            LocalError::UnsupportedType(_)
            | LocalError::MissingAttribute { .. }
            | LocalError::InvalidAttribute { .. } => CloudError::Validation(err.to_string()),
            LocalError::Io { .. } => CloudError::Provider(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LocalError>;
