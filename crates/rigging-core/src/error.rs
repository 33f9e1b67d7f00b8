//! Shared error types

use thiserror::Error;

/// Errors raised while parsing or evaluating expressions and while
/// validating dependency graphs.
///
/// All of them are validation failures: they are detected before any
/// provider or executor is called.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Expression parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("Type error: {0}")]
    Type(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Dependency cycle detected: {0}")]
    Cycle(String),

    #[error("Unknown graph node: {0}")]
    UnknownNode(String),
}

impl CoreError {
    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        CoreError::Parse {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        CoreError::Type(message.into())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
