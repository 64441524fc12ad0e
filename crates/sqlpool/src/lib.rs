//! # sqlpool
//!
//! Fixed-size database connection pool with liveness checks,
//! retry-with-backoff and chunked bulk writes.
//!
//! ## Features
//!
//! - Pool pre-filled to a fixed size, backed by a bounded channel
//! - Liveness probe (`ping`) on every checkout; broken connections are
//!   discarded and replaced
//! - Connect retries with exponential backoff
//! - Operation retries on connectivity failures only; query errors surface
//!   immediately
//! - Multi-row batch inserts and per-record batch updates
//! - Structured events through an injectable [`Observer`], `tracing` by default
//!
//! The wire protocol is supplied by a [`Driver`] implementation.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlpool::{Config, Database, params};
//!
//! let config = Config::from_connection_string(
//!     "host=localhost;user=app;password=secret;database=shop;pool size=4",
//! )?;
//! let db = Database::connect(config, MyDriver::default())?;
//!
//! let id = db.insert("INSERT INTO users (name) VALUES (?)", &params!["alice"])?;
//! let rows = db.fetch_all("SELECT name FROM users WHERE id = ?", &params![id])?;
//!
//! db.batch_insert("users", &["name", "email"], &records, 100)?;
//! db.close_all_connections();
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod batch;
pub mod config;
pub mod database;
pub mod driver;
pub mod error;
pub mod executor;
pub mod factory;
pub mod instrumentation;
pub mod lifecycle;
pub mod pool;
pub mod retry;
pub mod value;

pub use batch::{BatchRunner, BatchSummary, DEFAULT_CHUNK_SIZE};
pub use config::{Config, PoolConfig};
pub use database::{Database, DatabaseBuilder};
pub use driver::{ConnectOptions, Cursor, Driver, DriverConnection, DriverError, FailureClass};
pub use error::{Error, Result};
pub use executor::{Executor, OperationRequest, Outcome, ResultMode};
pub use factory::ConnectionFactory;
pub use instrumentation::{Observer, PoolEvent, TracingObserver};
pub use lifecycle::{ConnectionMetadata, ConnectionOrigin};
pub use pool::{Pool, PoolStatus, PooledConnection};
pub use retry::{Backoff, RetryPolicy, Sleep, ThreadSleep};
pub use value::{FromValue, Row, Value};

/// Build a `Vec<Value>` of positional parameters.
///
/// ```rust
/// use sqlpool::{Value, params};
///
/// let p = params![1, "two", None::<i64>];
/// assert_eq!(p, vec![Value::Int(1), Value::from("two"), Value::Null]);
/// ```
#[macro_export]
macro_rules! params {
    () => { ::std::vec::Vec::<$crate::Value>::new() };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::Value::from($value)),+]
    };
}
