//! Error types.

use std::time::Duration;

use thiserror::Error;

use crate::driver::{DriverError, FailureClass};
use crate::value::Value;

/// Errors that can occur during pool and executor operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Connection establishment exhausted all retries.
    #[error("unable to establish a database connection to {host}:{port} after {attempts} attempt(s)")]
    Connection {
        /// Server host.
        host: String,
        /// Server port.
        port: u16,
        /// Connect attempts made.
        attempts: u32,
        /// Last connect failure.
        #[source]
        source: DriverError,
    },

    /// An operation exhausted its retries or hit a query-level error.
    #[error("database operation failed after {attempts} attempt(s): {sql}")]
    OperationFailed {
        /// Statement text.
        sql: String,
        /// Positional parameters the statement was issued with.
        params: Vec<Value>,
        /// Attempts made before giving up.
        attempts: u32,
        /// Last failure; `None` when no attempt was allowed.
        #[source]
        source: Option<DriverError>,
    },

    /// Unclassified driver failure, propagated as-is.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The pool has been closed.
    #[error("pool is closed")]
    PoolClosed,

    /// No connection became available within the acquire timeout.
    #[error("connection acquisition timeout after {0:?}")]
    AcquisitionTimeout(Duration),

    /// Invalid table or column name.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Invalid batch arguments.
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Check if this error came from retries running out on connectivity failures.
    #[must_use]
    pub fn is_retries_exhausted(&self) -> bool {
        match self {
            Self::OperationFailed { source, .. } => source
                .as_ref()
                .is_none_or(|e| e.class() == FailureClass::Connectivity),
            Self::Connection { .. } => true,
            _ => false,
        }
    }

    /// Classification of the underlying driver failure, if any.
    #[must_use]
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            Self::Connection { source, .. } | Self::Driver(source) => Some(source.class()),
            Self::OperationFailed { source, .. } => source.as_ref().map(DriverError::class),
            _ => None,
        }
    }

    /// Statement text, for operation failures.
    #[must_use]
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::OperationFailed { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
