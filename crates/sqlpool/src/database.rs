//! High-level database handle.

use std::fmt;
use std::sync::Arc;

use crate::batch::{BatchRunner, BatchSummary};
use crate::config::Config;
use crate::driver::Driver;
use crate::error::Result;
use crate::executor::{Executor, OperationRequest, Outcome};
use crate::factory::ConnectionFactory;
use crate::instrumentation::Observer;
use crate::pool::{Pool, PoolStatus};
use crate::retry::Sleep;
use crate::value::{Row, Value};

/// A pooled database: factory, pool and executor wired from one [`Config`].
///
/// `Database` is `Send + Sync`; share it between threads behind an `Arc`.
pub struct Database<D: Driver> {
    executor: Executor<D>,
}

impl<D: Driver> Database<D> {
    /// Validate `config`, open the pool and pre-fill it.
    pub fn connect(config: Config, driver: D) -> Result<Self> {
        Self::builder(config, driver).build()
    }

    /// Start building a database with custom collaborators.
    pub fn builder(config: Config, driver: D) -> DatabaseBuilder<D> {
        DatabaseBuilder {
            config,
            driver,
            sleep: None,
            observer: None,
        }
    }

    /// Run a request with the default retry budget.
    pub fn run(&self, request: &OperationRequest) -> Result<Outcome> {
        self.executor.execute(request)
    }

    /// Run a request with an explicit retry budget.
    pub fn run_with_retries(&self, request: &OperationRequest, retries: u32) -> Result<Outcome> {
        self.executor.execute_with_retries(request, retries)
    }

    /// Run a statement and return the affected row count.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.executor.run(sql, params)
    }

    /// Run a query and return all rows.
    pub fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.executor.fetch_all(sql, params)
    }

    /// Run an INSERT and return the generated id.
    pub fn insert(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.executor.insert(sql, params)
    }

    /// Insert `records` in chunks of `chunk_size` rows.
    pub fn batch_insert(
        &self,
        table: &str,
        columns: &[&str],
        records: &[Vec<Value>],
        chunk_size: usize,
    ) -> Result<BatchSummary> {
        BatchRunner::new(&self.executor).batch_insert(table, columns, records, chunk_size)
    }

    /// Update `records`, one statement per record, keyed on `key_column`.
    pub fn batch_update(
        &self,
        table: &str,
        columns: &[&str],
        records: &[Vec<Value>],
        key_column: &str,
        chunk_size: usize,
    ) -> Result<BatchSummary> {
        BatchRunner::new(&self.executor)
            .batch_update(table, columns, records, key_column, chunk_size)
    }

    /// Close every queued connection. Returns how many were closed.
    pub fn close_all_connections(&self) -> usize {
        self.executor.pool().drain()
    }

    /// Close the pool; later operations fail with `PoolClosed`.
    pub fn close(&self) {
        self.executor.pool().close();
    }

    /// Current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.executor.pool().status()
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &Pool<D> {
        self.executor.pool()
    }

    /// The underlying executor.
    #[must_use]
    pub fn executor(&self) -> &Executor<D> {
        &self.executor
    }
}

impl<D: Driver> fmt::Debug for Database<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("executor", &self.executor)
            .finish()
    }
}

/// Builder for [`Database`].
pub struct DatabaseBuilder<D: Driver> {
    config: Config,
    driver: D,
    sleep: Option<Arc<dyn Sleep>>,
    observer: Option<Arc<dyn Observer>>,
}

impl<D: Driver> DatabaseBuilder<D> {
    /// Use `sleep` for backoff delays.
    #[must_use]
    pub fn sleep(mut self, sleep: Arc<dyn Sleep>) -> Self {
        self.sleep = Some(sleep);
        self
    }

    /// Report events to `observer`.
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Validate the configuration and open the pool.
    pub fn build(self) -> Result<Database<D>> {
        self.config.validate()?;

        let mut factory = ConnectionFactory::new(
            self.driver,
            self.config.connect_options(),
            self.config.retry.clone(),
        );
        if let Some(sleep) = self.sleep {
            factory = factory.with_sleep(sleep);
        }
        if let Some(observer) = self.observer {
            factory = factory.with_observer(observer);
        }

        let pool = Pool::new(factory, self.config.pool)?;
        Ok(Database {
            executor: Executor::new(pool),
        })
    }
}
