//! Execute-with-retry.
//!
//! Each call to [`Executor::execute_with_retries`] runs this state machine:
//!
//! ```text
//! ATTEMPT ──acquire──> ISSUE ──ok──────────────> DONE
//!    ^                   │
//!    │                   ├─connectivity, retries left: release, sleep, backoff
//!    └───────────────────┘
//!                        ├─connectivity, none left ─> OperationFailed
//!                        ├─query-class ─────────────> OperationFailed (no retry)
//!                        └─unexpected ──────────────> Driver error (no retry)
//! ```
//!
//! The connection is released before the outcome is acted on, exactly once
//! per attempt. A connection that failed with a connectivity error goes back
//! to the pool like any other; the liveness probe on its next checkout
//! discards it if it is really broken.
//!
//! Retried statements may have reached the server before the link dropped,
//! so retries give at-least-once execution. Only idempotent statements
//! should rely on them.

use std::fmt;
use std::sync::Arc;

use crate::driver::{Cursor, Driver, DriverConnection, DriverError, FailureClass};
use crate::error::{Error, Result};
use crate::instrumentation::{Observer, PoolEvent, truncate_sql};
use crate::pool::Pool;
use crate::retry::Sleep;
use crate::value::{Row, Value};

/// What to read back after a statement runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultMode {
    /// Nothing; report success and the affected row count.
    #[default]
    None,
    /// All result rows.
    FetchAll,
    /// The id generated by an INSERT.
    LastInsertId,
}

/// A single SQL operation: statement text, positional parameters and result mode.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    sql: String,
    params: Vec<Value>,
    mode: ResultMode,
}

impl OperationRequest {
    /// Create a request with the given result mode.
    #[must_use]
    pub fn new(sql: impl Into<String>, mode: ResultMode) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            mode,
        }
    }

    /// A statement whose result is only success and the affected row count.
    #[must_use]
    pub fn execute(sql: impl Into<String>) -> Self {
        Self::new(sql, ResultMode::None)
    }

    /// A query whose rows are all fetched.
    #[must_use]
    pub fn fetch(sql: impl Into<String>) -> Self {
        Self::new(sql, ResultMode::FetchAll)
    }

    /// An INSERT whose generated id is returned.
    #[must_use]
    pub fn insert(sql: impl Into<String>) -> Self {
        Self::new(sql, ResultMode::LastInsertId)
    }

    /// Append a positional parameter.
    #[must_use]
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Append several positional parameters.
    #[must_use]
    pub fn params<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.params.extend(values.into_iter().map(Into::into));
        self
    }

    /// Statement text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Positional parameters.
    #[must_use]
    pub fn param_values(&self) -> &[Value] {
        &self.params
    }

    /// Result mode.
    #[must_use]
    pub fn mode(&self) -> ResultMode {
        self.mode
    }

    fn failed(&self, attempts: u32, source: Option<DriverError>) -> Error {
        Error::OperationFailed {
            sql: self.sql.clone(),
            params: self.params.clone(),
            attempts,
            source,
        }
    }
}

/// Typed result of a successful operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Statement ran; number of rows it changed.
    Done {
        /// Rows changed by the statement.
        rows_affected: u64,
    },
    /// Rows returned by a query.
    Rows(Vec<Row>),
    /// Id generated by an INSERT.
    LastInsertId(u64),
}

impl Outcome {
    /// Affected row count, for [`ResultMode::None`] requests.
    #[must_use]
    pub fn rows_affected(&self) -> Option<u64> {
        match self {
            Self::Done { rows_affected } => Some(*rows_affected),
            _ => None,
        }
    }

    /// Rows, for [`ResultMode::FetchAll`] requests.
    #[must_use]
    pub fn into_rows(self) -> Option<Vec<Row>> {
        match self {
            Self::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    /// Generated id, for [`ResultMode::LastInsertId`] requests.
    #[must_use]
    pub fn last_insert_id(&self) -> Option<u64> {
        match self {
            Self::LastInsertId(id) => Some(*id),
            _ => None,
        }
    }
}

/// Runs operations against pooled connections, retrying connectivity failures.
pub struct Executor<D: Driver> {
    pool: Pool<D>,
    sleep: Arc<dyn Sleep>,
    observer: Arc<dyn Observer>,
    default_retries: u32,
}

impl<D: Driver> Executor<D> {
    /// Create an executor over `pool`.
    ///
    /// Backoff, sleeping and event reporting are shared with the pool's factory.
    pub fn new(pool: Pool<D>) -> Self {
        let sleep = Arc::clone(pool.factory().sleeper());
        let observer = Arc::clone(pool.observer());
        let default_retries = pool.factory().retry_policy().max_retries;
        Self {
            pool,
            sleep,
            observer,
            default_retries,
        }
    }

    /// Run `request` with the policy's default retry budget.
    pub fn execute(&self, request: &OperationRequest) -> Result<Outcome> {
        self.execute_with_retries(request, self.default_retries)
    }

    /// Run `request`, allowing up to `retries` attempts on connectivity failures.
    ///
    /// With `retries == 0` nothing is attempted and the call fails with
    /// [`Error::OperationFailed`] without a source.
    pub fn execute_with_retries(
        &self,
        request: &OperationRequest,
        retries: u32,
    ) -> Result<Outcome> {
        let _span = tracing::debug_span!("execute", sql = %truncate_sql(&request.sql)).entered();

        let mut backoff = self.pool.factory().retry_policy().backoff();
        let mut last_error = None;
        let mut attempt = 0;

        while attempt < retries {
            attempt += 1;

            let mut conn = self.pool.acquire()?;
            let result = issue(&mut *conn, request);
            drop(conn);

            let err = match result {
                Ok(outcome) => return Ok(outcome),
                Err(err) => err,
            };

            match err.class() {
                FailureClass::Connectivity => {
                    let remaining = retries - attempt;
                    let delay = (remaining > 0).then(|| backoff.next_delay());
                    self.observer.warn(&PoolEvent::OperationRetry {
                        sql: truncate_sql(&request.sql),
                        attempt,
                        remaining,
                        delay,
                        error: err.to_string(),
                    });
                    if let Some(delay) = delay {
                        self.sleep.sleep(delay);
                    }
                    last_error = Some(err);
                }
                FailureClass::Query => {
                    self.observer.error(&PoolEvent::QueryFailed {
                        sql: truncate_sql(&request.sql),
                        param_count: request.params.len(),
                        error: err.to_string(),
                    });
                    return Err(request.failed(attempt, Some(err)));
                }
                FailureClass::Unexpected => {
                    self.observer.error(&PoolEvent::Unexpected {
                        sql: truncate_sql(&request.sql),
                        param_count: request.params.len(),
                        error: err.to_string(),
                    });
                    return Err(Error::Driver(err));
                }
            }
        }

        if let Some(err) = &last_error {
            self.observer.error(&PoolEvent::OperationRetry {
                sql: truncate_sql(&request.sql),
                attempt,
                remaining: 0,
                delay: None,
                error: err.to_string(),
            });
        }
        Err(request.failed(attempt, last_error))
    }

    /// Run a statement and return the affected row count.
    pub fn run(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let request = OperationRequest::execute(sql).params(params.iter().cloned());
        Ok(self.execute(&request)?.rows_affected().unwrap_or_default())
    }

    /// Run a query and return all rows.
    pub fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let request = OperationRequest::fetch(sql).params(params.iter().cloned());
        Ok(self.execute(&request)?.into_rows().unwrap_or_default())
    }

    /// Run an INSERT and return the generated id.
    pub fn insert(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let request = OperationRequest::insert(sql).params(params.iter().cloned());
        Ok(self.execute(&request)?.last_insert_id().unwrap_or_default())
    }

    /// The pool operations run against.
    #[must_use]
    pub fn pool(&self) -> &Pool<D> {
        &self.pool
    }

    /// Retry budget used by [`Executor::execute`].
    #[must_use]
    pub fn default_retries(&self) -> u32 {
        self.default_retries
    }
}

impl<D: Driver> fmt::Debug for Executor<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("pool", &self.pool)
            .field("default_retries", &self.default_retries)
            .finish()
    }
}

/// Run the statement, read results per the request's mode, then commit.
fn issue<C: DriverConnection>(
    conn: &mut C,
    request: &OperationRequest,
) -> std::result::Result<Outcome, DriverError> {
    let outcome = {
        let mut cursor = conn.execute(&request.sql, &request.params)?;
        match request.mode {
            ResultMode::None => Outcome::Done {
                rows_affected: cursor.rows_affected(),
            },
            ResultMode::FetchAll => Outcome::Rows(cursor.fetch_all()?),
            ResultMode::LastInsertId => Outcome::LastInsertId(cursor.last_insert_id()),
        }
    };
    conn.commit()?;
    Ok(outcome)
}
