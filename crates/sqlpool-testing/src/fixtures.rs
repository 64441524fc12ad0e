//! Test fixture utilities.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sqlpool::{Config, Database, Observer, PoolEvent, RetryPolicy, Sleep, Value};

use crate::mock_driver::MockDriver;

/// [`Sleep`] that records requested delays and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleep {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleep {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested, in order.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }

    /// Sum of all requested delays.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.delays.lock().iter().sum()
    }

    /// Forget recorded delays.
    pub fn clear(&self) {
        self.delays.lock().clear();
    }
}

impl Sleep for RecordingSleep {
    fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
    }
}

/// Severity an event was reported at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    /// Reported through [`Observer::warn`].
    Warn,
    /// Reported through [`Observer::error`].
    Error,
}

/// [`Observer`] that keeps every event for later assertions.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<(EventLevel, PoolEvent)>>,
}

impl RecordingObserver {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event, in order.
    #[must_use]
    pub fn events(&self) -> Vec<(EventLevel, PoolEvent)> {
        self.events.lock().clone()
    }

    /// Events reported as warnings.
    #[must_use]
    pub fn warnings(&self) -> Vec<PoolEvent> {
        self.at(EventLevel::Warn)
    }

    /// Events reported as errors.
    #[must_use]
    pub fn errors(&self) -> Vec<PoolEvent> {
        self.at(EventLevel::Error)
    }

    /// Number of events with the given [`PoolEvent::name`].
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(_, e)| e.name() == name)
            .count()
    }

    fn at(&self, level: EventLevel) -> Vec<PoolEvent> {
        self.events
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, e)| e.clone())
            .collect()
    }
}

impl Observer for RecordingObserver {
    fn warn(&self, event: &PoolEvent) {
        self.events.lock().push((EventLevel::Warn, event.clone()));
    }

    fn error(&self, event: &PoolEvent) {
        self.events.lock().push((EventLevel::Error, event.clone()));
    }
}

/// Configuration pointing at the mock server with the given pool size.
///
/// Uses a backoff base of 2 so delays are 2s, 4s, 8s...
#[must_use]
pub fn test_config(pool_size: usize) -> Config {
    Config::new()
        .host("mock")
        .port(3306)
        .user("test")
        .password("secret")
        .database("testdb")
        .pool_size(pool_size)
        .retry(RetryPolicy::from_backoff_base(2.0))
}

/// `n` records of `(name, email)` for a `users` table.
#[must_use]
pub fn sample_users(n: usize) -> Vec<Vec<Value>> {
    (1..=n)
        .map(|i| {
            vec![
                Value::from(format!("user{i}")),
                Value::from(format!("user{i}@example.com")),
            ]
        })
        .collect()
}

/// A database over a [`MockDriver`] with recording collaborators.
#[derive(Debug)]
pub struct Harness {
    /// The database under test.
    pub db: Database<MockDriver>,
    /// Handle to the driver the database uses.
    pub driver: MockDriver,
    /// Backoff delays requested.
    pub sleep: Arc<RecordingSleep>,
    /// Events reported.
    pub observer: Arc<RecordingObserver>,
}

impl Harness {
    /// Build a harness with a default mock driver.
    pub fn new(pool_size: usize) -> sqlpool::Result<Self> {
        Self::with_driver(MockDriver::new(), test_config(pool_size))
    }

    /// Build a harness over `driver` with `config`.
    pub fn with_driver(driver: MockDriver, config: Config) -> sqlpool::Result<Self> {
        let sleep = Arc::new(RecordingSleep::new());
        let observer = Arc::new(RecordingObserver::new());
        let db = Database::builder(config, driver.clone())
            .sleep(Arc::clone(&sleep) as Arc<dyn Sleep>)
            .observer(Arc::clone(&observer) as Arc<dyn Observer>)
            .build()?;
        Ok(Self {
            db,
            driver,
            sleep,
            observer,
        })
    }

    /// Number of idle connections queued in the pool.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.db.status().idle
    }
}
