//! Connection establishment with retry.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::driver::{ConnectOptions, Driver, DriverError, FailureClass};
use crate::error::{Error, Result};
use crate::instrumentation::{Observer, PoolEvent, TracingObserver};
use crate::retry::{RetryPolicy, Sleep, ThreadSleep};

/// The sole producer of new connections.
///
/// Connectivity-class failures are retried with exponential backoff up to
/// `RetryPolicy::max_retries` attempts; any other connect failure (for
/// example rejected credentials) is returned immediately.
pub struct ConnectionFactory<D: Driver> {
    driver: Arc<D>,
    options: ConnectOptions,
    retry: RetryPolicy,
    sleep: Arc<dyn Sleep>,
    observer: Arc<dyn Observer>,
    created: AtomicU64,
}

impl<D: Driver> ConnectionFactory<D> {
    /// Create a factory for the given driver and endpoint.
    pub fn new(driver: D, options: ConnectOptions, retry: RetryPolicy) -> Self {
        Self {
            driver: Arc::new(driver),
            options,
            retry,
            sleep: Arc::new(ThreadSleep),
            observer: Arc::new(TracingObserver),
            created: AtomicU64::new(0),
        }
    }

    /// Replace the sleeper used between attempts.
    #[must_use]
    pub fn with_sleep(mut self, sleep: Arc<dyn Sleep>) -> Self {
        self.sleep = sleep;
        self
    }

    /// Replace the event observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Open a new connection, retrying connectivity failures.
    pub fn create(&self) -> Result<D::Connection> {
        let max_attempts = self.retry.max_retries.max(1);
        let mut backoff = self.retry.backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.driver.connect(&self.options) {
                Ok(conn) => {
                    let total = self.created.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::debug!(
                        host = %self.options.host,
                        port = self.options.port,
                        attempt = attempt,
                        total_created = total,
                        "opened database connection"
                    );
                    return Ok(conn);
                }
                Err(err) => err,
            };

            if err.class() != FailureClass::Connectivity {
                self.observer.error(&self.connect_event(attempt, 0, None, &err));
                return Err(Error::Driver(err));
            }

            let remaining = max_attempts - attempt;
            if remaining == 0 {
                self.observer.error(&self.connect_event(attempt, 0, None, &err));
                return Err(Error::Connection {
                    host: self.options.host.clone(),
                    port: self.options.port,
                    attempts: attempt,
                    source: err,
                });
            }

            let delay = backoff.next_delay();
            self.observer
                .warn(&self.connect_event(attempt, remaining, Some(delay), &err));
            self.sleep.sleep(delay);
        }
    }

    fn connect_event(
        &self,
        attempt: u32,
        remaining: u32,
        delay: Option<Duration>,
        err: &DriverError,
    ) -> PoolEvent {
        PoolEvent::ConnectFailed {
            host: self.options.host.clone(),
            port: self.options.port,
            attempt,
            remaining,
            delay,
            error: err.to_string(),
        }
    }

    pub(crate) fn observer(&self) -> &Arc<dyn Observer> {
        &self.observer
    }

    pub(crate) fn sleeper(&self) -> &Arc<dyn Sleep> {
        &self.sleep
    }

    /// Number of connections successfully opened so far.
    #[must_use]
    pub fn connections_created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Options used for every connect.
    #[must_use]
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// The retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The underlying driver.
    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }
}

impl<D: Driver> fmt::Debug for ConnectionFactory<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("host", &self.options.host)
            .field("port", &self.options.port)
            .field("retry", &self.retry)
            .field("created", &self.connections_created())
            .finish()
    }
}
