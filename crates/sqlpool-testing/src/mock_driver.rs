//! In-memory mock driver for unit testing.
//!
//! [`MockDriver`] implements [`Driver`] without any network I/O. Tests
//! script its behaviour up front (responses keyed by SQL prefix, connect
//! failures, execute failures, broken sessions) and inspect what the pool
//! and executor did afterwards through its counters and statement log.
//!
//! ## Example
//!
//! ```rust
//! use sqlpool::{Database, params};
//! use sqlpool_testing::fixtures::test_config;
//! use sqlpool_testing::mock_driver::{MockDriver, MockResponse};
//!
//! let driver = MockDriver::builder()
//!     .with_response("SELECT name", MockResponse::rows(&["name"], vec![params!["alice"]]))
//!     .build();
//!
//! let db = Database::connect(test_config(2), driver.clone()).unwrap();
//! let rows = db.fetch_all("SELECT name FROM users", &[]).unwrap();
//!
//! assert_eq!(rows.len(), 1);
//! assert_eq!(driver.connections_opened(), 2);
//! ```

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use sqlpool::{ConnectOptions, Cursor, Driver, DriverConnection, DriverError, Row, Value};

/// A failure the mock can be scripted to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    /// Server unreachable.
    Refused,
    /// Session dropped mid-operation.
    ConnectionLost,
    /// Operation timed out.
    Timeout,
    /// Credentials rejected.
    AccessDenied,
    /// Server rejected the statement.
    Server {
        /// Error number.
        code: u32,
        /// Error message.
        message: String,
    },
    /// Driver failure with no category.
    Other(String),
}

impl MockFailure {
    /// A server-side syntax error.
    #[must_use]
    pub fn syntax() -> Self {
        Self::Server {
            code: 1064,
            message: "You have an error in your SQL syntax".into(),
        }
    }

    /// A duplicate-key violation.
    #[must_use]
    pub fn duplicate_key() -> Self {
        Self::Server {
            code: 1062,
            message: "Duplicate entry for key 'PRIMARY'".into(),
        }
    }
}

impl From<MockFailure> for DriverError {
    fn from(failure: MockFailure) -> Self {
        match failure {
            MockFailure::Refused => DriverError::Connect("connection refused".into()),
            MockFailure::ConnectionLost => {
                DriverError::ConnectionLost("server has gone away".into())
            }
            MockFailure::Timeout => DriverError::Timeout,
            MockFailure::AccessDenied => DriverError::Authentication("access denied".into()),
            MockFailure::Server { code, message } => DriverError::Server {
                code,
                sqlstate: None,
                message,
            },
            MockFailure::Other(message) => DriverError::Other(message),
        }
    }
}

/// Scripted result for a statement.
#[derive(Clone)]
pub enum MockResponse {
    /// Rows returned by a query.
    Rows {
        /// Column names.
        columns: Arc<[String]>,
        /// Row data.
        rows: Vec<Vec<Value>>,
    },
    /// Rows changed by a statement.
    Affected(u64),
    /// Id generated by an INSERT.
    InsertId(u64),
    /// Statement fails.
    Fail(MockFailure),
    /// Computed from the statement and its parameters.
    Custom(Arc<dyn Fn(&str, &[Value]) -> MockResponse + Send + Sync>),
}

impl MockResponse {
    /// Rows with the given column names.
    #[must_use]
    pub fn rows(columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        Self::Rows {
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            rows,
        }
    }

    /// No rows, nothing changed.
    #[must_use]
    pub fn empty() -> Self {
        Self::Affected(0)
    }

    /// Compute the response from the statement.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str, &[Value]) -> MockResponse + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    fn resolve(&self, sql: &str, params: &[Value]) -> Self {
        match self {
            Self::Custom(f) => f(sql, params),
            other => other.clone(),
        }
    }
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows { columns, rows } => f
                .debug_struct("Rows")
                .field("columns", columns)
                .field("rows", &rows.len())
                .finish(),
            Self::Affected(n) => f.debug_tuple("Affected").field(n).finish(),
            Self::InsertId(id) => f.debug_tuple("InsertId").field(id).finish(),
            Self::Fail(failure) => f.debug_tuple("Fail").field(failure).finish(),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

/// A statement the mock received.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    /// Mock-assigned id of the connection that ran it.
    pub connection_id: u64,
    /// Statement text.
    pub sql: String,
    /// Positional parameters.
    pub params: Vec<Value>,
}

#[derive(Debug)]
struct MockState {
    responses: Vec<(String, MockResponse)>,
    default_response: MockResponse,
    connect_failures: VecDeque<MockFailure>,
    execute_failures: VecDeque<MockFailure>,
    broken: HashSet<u64>,
    break_on_connection_lost: bool,
    next_id: u64,
    connect_attempts: u64,
    opened: u64,
    closed: u64,
    pings: u64,
    commits: u64,
    last_options: Option<ConnectOptions>,
    log: Vec<ExecutedStatement>,
}

impl MockState {
    fn respond(&self, sql: &str, params: &[Value]) -> MockResponse {
        self.responses
            .iter()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .map_or(&self.default_response, |(_, response)| response)
            .resolve(sql, params)
    }
}

/// Builder for [`MockDriver`].
#[derive(Debug)]
pub struct MockDriverBuilder {
    responses: Vec<(String, MockResponse)>,
    default_response: MockResponse,
    break_on_connection_lost: bool,
}

impl MockDriverBuilder {
    /// Respond with `response` to statements starting with `sql_prefix`.
    ///
    /// Prefixes are tried in registration order.
    #[must_use]
    pub fn with_response(mut self, sql_prefix: impl Into<String>, response: MockResponse) -> Self {
        self.responses.push((sql_prefix.into(), response));
        self
    }

    /// Response for statements matching no prefix (default: `Affected(1)`).
    #[must_use]
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.default_response = response;
        self
    }

    /// Mark a connection broken when an execute on it fails with
    /// [`MockFailure::ConnectionLost`], so its next ping fails too.
    #[must_use]
    pub fn break_on_connection_lost(mut self, enabled: bool) -> Self {
        self.break_on_connection_lost = enabled;
        self
    }

    /// Build the driver.
    #[must_use]
    pub fn build(self) -> MockDriver {
        MockDriver {
            state: Arc::new(Mutex::new(MockState {
                responses: self.responses,
                default_response: self.default_response,
                connect_failures: VecDeque::new(),
                execute_failures: VecDeque::new(),
                broken: HashSet::new(),
                break_on_connection_lost: self.break_on_connection_lost,
                next_id: 1,
                connect_attempts: 0,
                opened: 0,
                closed: 0,
                pings: 0,
                commits: 0,
                last_options: None,
                log: Vec::new(),
            })),
        }
    }
}

/// Scriptable in-memory [`Driver`].
///
/// Clones share state, so a test can keep a handle after moving the driver
/// into a pool.
#[derive(Debug, Clone)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MockDriver {
    /// Create a driver that answers every statement with `Affected(1)`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start configuring a driver.
    #[must_use]
    pub fn builder() -> MockDriverBuilder {
        MockDriverBuilder {
            responses: Vec::new(),
            default_response: MockResponse::Affected(1),
            break_on_connection_lost: false,
        }
    }

    /// Fail the next `n` connect attempts with `failure`.
    pub fn fail_next_connects(&self, n: usize, failure: MockFailure) {
        let mut state = self.state.lock();
        state
            .connect_failures
            .extend(std::iter::repeat_n(failure, n));
    }

    /// Fail the next `n` executes, on any connection, with `failure`.
    pub fn fail_next_executes(&self, n: usize, failure: MockFailure) {
        let mut state = self.state.lock();
        state
            .execute_failures
            .extend(std::iter::repeat_n(failure, n));
    }

    /// Make every ping and execute on connection `id` fail.
    pub fn break_connection(&self, id: u64) {
        self.state.lock().broken.insert(id);
    }

    /// Break every connection opened so far.
    pub fn break_all_connections(&self) {
        let mut state = self.state.lock();
        let last = state.next_id;
        state.broken.extend(1..last);
    }

    /// Connect attempts, successful or not.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.state.lock().connect_attempts
    }

    /// Connections successfully opened.
    #[must_use]
    pub fn connections_opened(&self) -> u64 {
        self.state.lock().opened
    }

    /// Connections closed.
    #[must_use]
    pub fn connections_closed(&self) -> u64 {
        self.state.lock().closed
    }

    /// Connections opened and not yet closed.
    #[must_use]
    pub fn open_connections(&self) -> u64 {
        let state = self.state.lock();
        state.opened - state.closed
    }

    /// Pings received.
    #[must_use]
    pub fn pings(&self) -> u64 {
        self.state.lock().pings
    }

    /// Commits received.
    #[must_use]
    pub fn commits(&self) -> u64 {
        self.state.lock().commits
    }

    /// Options passed to the most recent connect.
    #[must_use]
    pub fn last_options(&self) -> Option<ConnectOptions> {
        self.state.lock().last_options.clone()
    }

    /// Every statement executed, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.state.lock().log.clone()
    }

    /// Statements whose text starts with `prefix`.
    #[must_use]
    pub fn executed_matching(&self, prefix: &str) -> Vec<ExecutedStatement> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|s| s.sql.starts_with(prefix))
            .cloned()
            .collect()
    }
}

impl Driver for MockDriver {
    type Connection = MockConnection;

    fn connect(&self, options: &ConnectOptions) -> Result<MockConnection, DriverError> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;
        state.last_options = Some(options.clone());

        if let Some(failure) = state.connect_failures.pop_front() {
            return Err(failure.into());
        }

        let id = state.next_id;
        state.next_id += 1;
        state.opened += 1;
        Ok(MockConnection {
            id,
            state: Arc::clone(&self.state),
            open: true,
        })
    }
}

/// A session opened by [`MockDriver`].
#[derive(Debug)]
pub struct MockConnection {
    id: u64,
    state: Arc<Mutex<MockState>>,
    open: bool,
}

impl MockConnection {
    /// Mock-assigned connection id, starting at 1 in connect order.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    fn check_alive(&self, state: &MockState) -> Result<(), DriverError> {
        if !self.open || state.broken.contains(&self.id) {
            return Err(MockFailure::ConnectionLost.into());
        }
        Ok(())
    }
}

impl DriverConnection for MockConnection {
    type Cursor<'c>
        = MockCursor
    where
        Self: 'c;

    fn ping(&mut self, _reconnect: bool) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        state.pings += 1;
        self.check_alive(&state)
    }

    fn execute<'c>(&'c mut self, sql: &str, params: &[Value]) -> Result<MockCursor, DriverError> {
        let mut state = self.state.lock();
        state.log.push(ExecutedStatement {
            connection_id: self.id,
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        self.check_alive(&state)?;

        let response = match state.execute_failures.pop_front() {
            Some(failure) => MockResponse::Fail(failure),
            None => state.respond(sql, params),
        };

        match response {
            MockResponse::Fail(failure) => {
                if failure == MockFailure::ConnectionLost && state.break_on_connection_lost {
                    state.broken.insert(self.id);
                }
                Err(failure.into())
            }
            response => Ok(MockCursor::from_response(response)),
        }
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        self.check_alive(&state)?;
        state.commits += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        if self.open {
            self.open = false;
            self.state.lock().closed += 1;
        }
        Ok(())
    }
}

/// Results of one mock statement.
#[derive(Debug, Default)]
pub struct MockCursor {
    rows: Vec<Row>,
    last_insert_id: u64,
    rows_affected: u64,
}

impl MockCursor {
    fn from_response(response: MockResponse) -> Self {
        match response {
            MockResponse::Rows { columns, rows } => {
                let rows: Vec<Row> = rows
                    .into_iter()
                    .map(|values| Row::new(Arc::clone(&columns), values))
                    .collect();
                Self {
                    rows_affected: rows.len() as u64,
                    rows,
                    last_insert_id: 0,
                }
            }
            MockResponse::Affected(n) => Self {
                rows_affected: n,
                ..Self::default()
            },
            MockResponse::InsertId(id) => Self {
                rows_affected: 1,
                last_insert_id: id,
                ..Self::default()
            },
            MockResponse::Fail(_) | MockResponse::Custom(_) => Self::default(),
        }
    }
}

impl Cursor for MockCursor {
    fn fetch_all(&mut self) -> Result<Vec<Row>, DriverError> {
        Ok(std::mem::take(&mut self.rows))
    }

    fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    fn rows_affected(&self) -> u64 {
        self.rows_affected
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn options() -> ConnectOptions {
        ConnectOptions {
            host: "mock".into(),
            port: 3306,
            user: "test".into(),
            password: "secret".into(),
            database: "testdb".into(),
            charset: "utf8mb4".into(),
            connect_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_connect_assigns_sequential_ids() {
        let driver = MockDriver::new();
        let a = driver.connect(&options()).unwrap();
        let b = driver.connect(&options()).unwrap();
        assert_eq!((a.id(), b.id()), (1, 2));
        assert_eq!(driver.connections_opened(), 2);
        assert_eq!(driver.last_options().unwrap().database, "testdb");
    }

    #[test]
    fn test_scripted_connect_failures() {
        let driver = MockDriver::new();
        driver.fail_next_connects(2, MockFailure::Refused);

        assert!(driver.connect(&options()).is_err());
        assert!(driver.connect(&options()).is_err());
        assert!(driver.connect(&options()).is_ok());
        assert_eq!(driver.connect_attempts(), 3);
        assert_eq!(driver.connections_opened(), 1);
    }

    #[test]
    fn test_prefix_responses() {
        let driver = MockDriver::builder()
            .with_response("INSERT", MockResponse::InsertId(42))
            .with_response("SELECT", MockResponse::rows(&["n"], vec![vec![Value::Int(1)]]))
            .build();
        let mut conn = driver.connect(&options()).unwrap();

        let cursor = conn.execute("INSERT INTO t (a) VALUES (?)", &[Value::Int(1)]).unwrap();
        assert_eq!(cursor.last_insert_id(), 42);

        let mut cursor = conn.execute("SELECT n FROM t", &[]).unwrap();
        assert_eq!(cursor.fetch_all().unwrap().len(), 1);

        let cursor = conn.execute("DELETE FROM t", &[]).unwrap();
        assert_eq!(cursor.rows_affected(), 1);
        assert_eq!(driver.executed().len(), 3);
    }

    #[test]
    fn test_broken_connection_fails_ping() {
        let driver = MockDriver::new();
        let mut conn = driver.connect(&options()).unwrap();
        assert!(conn.ping(true).is_ok());

        driver.break_connection(conn.id());
        let err = conn.ping(true).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(driver.pings(), 2);
    }

    #[test]
    fn test_execute_failure_marks_connection_broken() {
        let driver = MockDriver::builder().break_on_connection_lost(true).build();
        driver.fail_next_executes(1, MockFailure::ConnectionLost);
        let mut conn = driver.connect(&options()).unwrap();

        assert!(conn.execute("SELECT 1", &[]).is_err());
        assert!(conn.ping(false).is_err());
    }

    #[test]
    fn test_close_is_idempotent() {
        let driver = MockDriver::new();
        let mut conn = driver.connect(&options()).unwrap();
        conn.close().unwrap();
        conn.close().unwrap();
        assert!(!conn.is_open());
        assert_eq!(driver.connections_closed(), 1);
        assert_eq!(driver.open_connections(), 0);
    }

    #[test]
    fn test_failure_classes() {
        let lost: DriverError = MockFailure::ConnectionLost.into();
        assert!(lost.is_transient());
        let syntax: DriverError = MockFailure::syntax().into();
        assert_eq!(syntax.code(), Some(1064));
        assert!(!DriverError::from(MockFailure::AccessDenied).is_transient());
    }
}
