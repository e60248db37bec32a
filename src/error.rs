use thiserror::Error;

use crate::driver::{SqlDataType, SqlReturn};

#[derive(Debug, Error)]
pub enum OdbcStatementError {
    /// Non-success status from a driver call, with the diagnostic read right after the failure.
    #[error("{context}: driver returned {code} [{state}] {message}")]
    DriverError {
        context: &'static str,
        code: SqlReturn,
        state: String,
        message: String,
    },

    #[error(
        "the number of parameters in the prepared statement ({expected}) doesn't match the number of parameters passed to bind ({actual})"
    )]
    ParameterCountMismatch { expected: usize, actual: usize },

    #[error("parameter {index}: cannot bind a {value_type} value to a {sql_type} slot")]
    UnsupportedParameterType {
        index: usize,
        value_type: &'static str,
        sql_type: SqlDataType,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Background worker error: {0}")]
    WorkerError(String),

    #[error("Result conversion error: {0}")]
    ConversionError(String),
}

impl OdbcStatementError {
    /// Return code carried by a [`OdbcStatementError::DriverError`].
    #[must_use]
    pub fn driver_code(&self) -> Option<SqlReturn> {
        match self {
            Self::DriverError { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Diagnostic text carried by a [`OdbcStatementError::DriverError`].
    #[must_use]
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::DriverError { message, .. } => Some(message),
            _ => None,
        }
    }
}

pub type Result<T, E = OdbcStatementError> = std::result::Result<T, E>;
