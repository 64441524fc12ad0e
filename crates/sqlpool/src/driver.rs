//! Database driver collaborator.
//!
//! The pool does not speak any wire protocol itself. A [`Driver`] opens
//! sessions to the server, and each [`DriverConnection`] runs text SQL with
//! positional placeholders, exposes a [`Cursor`] over the results and commits
//! the implicit transaction.
//!
//! Every failure a driver reports is a [`DriverError`], and
//! [`DriverError::class`] is the single place that decides whether a failure
//! is worth retrying on a fresh connection.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::value::{Row, Value};

/// Settings handed to [`Driver::connect`].
#[derive(Clone)]
pub struct ConnectOptions {
    /// Server hostname or IP address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login name.
    pub user: String,
    /// Login password.
    pub password: String,
    /// Default database (schema) for the session.
    pub database: String,
    /// Connection character set.
    pub charset: String,
    /// Time allowed to establish the session.
    pub connect_timeout: Duration,
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("charset", &self.charset)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Opens new sessions to the database server.
pub trait Driver: Send + Sync + 'static {
    /// The session type produced by this driver.
    type Connection: DriverConnection;

    /// Open and authenticate a new session.
    fn connect(&self, options: &ConnectOptions) -> Result<Self::Connection, DriverError>;
}

/// An open session to the database server.
pub trait DriverConnection: Send + 'static {
    /// Result cursor borrowed from the session.
    type Cursor<'c>: Cursor
    where
        Self: 'c;

    /// Lightweight round-trip to verify the session is usable.
    ///
    /// With `reconnect` set the driver may transparently re-open a dropped
    /// session before reporting failure.
    fn ping(&mut self, reconnect: bool) -> Result<(), DriverError>;

    /// Run a statement with positional parameters.
    fn execute<'c>(&'c mut self, sql: &str, params: &[Value])
    -> Result<Self::Cursor<'c>, DriverError>;

    /// Commit the implicit transaction.
    fn commit(&mut self) -> Result<(), DriverError>;

    /// Close the session.
    fn close(&mut self) -> Result<(), DriverError>;
}

/// Results of one executed statement.
pub trait Cursor {
    /// Read all remaining rows.
    fn fetch_all(&mut self) -> Result<Vec<Row>, DriverError>;

    /// Identifier generated by the last INSERT, zero when none was generated.
    fn last_insert_id(&self) -> u64;

    /// Number of rows changed by the statement.
    fn rows_affected(&self) -> u64;
}

/// How a failure should be handled by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network or session level; a fresh connection may succeed.
    Connectivity,
    /// Deterministic SQL-level error; retrying cannot succeed.
    Query,
    /// Anything else; surfaced immediately.
    Unexpected,
}

/// Errors reported by a [`Driver`] or its connections.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DriverError {
    /// The server could not be reached.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The session dropped (server restart, network failure).
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Connect or read timed out.
    #[error("operation timed out")]
    Timeout,

    /// IO error on the underlying socket.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Login was rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The server rejected the statement.
    #[error("server error {code}: {message}")]
    Server {
        /// Server error number.
        code: u32,
        /// SQLSTATE, when the server reports one.
        sqlstate: Option<String>,
        /// Error message.
        message: String,
    },

    /// Parameter or column type mismatch.
    #[error("type error: {0}")]
    Type(String),

    /// Anything the driver cannot categorise.
    #[error("driver error: {0}")]
    Other(String),
}

impl DriverError {
    /// Classify this error for retry decisions.
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Connect(_) | Self::ConnectionLost(_) | Self::Timeout | Self::Io(_) => {
                FailureClass::Connectivity
            }
            Self::Authentication(_) | Self::Server { .. } | Self::Type(_) => FailureClass::Query,
            Self::Other(_) => FailureClass::Unexpected,
        }
    }

    /// Check if this error is transient and may succeed on a new connection.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.class() == FailureClass::Connectivity
    }

    /// Server error number, if this is a server error.
    #[must_use]
    pub fn code(&self) -> Option<u32> {
        match self {
            Self::Server { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert_eq!(
            DriverError::ConnectionLost("reset".into()).class(),
            FailureClass::Connectivity
        );
        assert_eq!(DriverError::Timeout.class(), FailureClass::Connectivity);
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(DriverError::from(io).is_transient());
    }

    #[test]
    fn test_query_classification() {
        let err = DriverError::Server {
            code: 1062,
            sqlstate: Some("23000".into()),
            message: "Duplicate entry".into(),
        };
        assert_eq!(err.class(), FailureClass::Query);
        assert_eq!(err.code(), Some(1062));
        assert!(!err.is_transient());
        assert_eq!(
            DriverError::Authentication("denied".into()).class(),
            FailureClass::Query
        );
    }

    #[test]
    fn test_unexpected_classification() {
        assert_eq!(
            DriverError::Other("boom".into()).class(),
            FailureClass::Unexpected
        );
    }

    #[test]
    fn test_connect_options_debug_redacts_password() {
        let options = ConnectOptions {
            host: "db".into(),
            port: 3306,
            user: "app".into(),
            password: "hunter2".into(),
            database: "main".into(),
            charset: "utf8mb4".into(),
            connect_timeout: Duration::from_secs(5),
        };
        let debug = format!("{options:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
    }
}
