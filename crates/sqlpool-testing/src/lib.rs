//! # sqlpool-testing
//!
//! Test infrastructure for sqlpool.
//!
//! ## Features
//!
//! - In-memory mock driver with scriptable responses and failures
//! - Statement log and connection counters for assertions
//! - Recording sleeper and observer, so backoff and events can be checked
//!   without waiting
//! - Sample records and a ready-made [`fixtures::Harness`]
//!
//! ## Example
//!
//! ```rust
//! use sqlpool_testing::Harness;
//! use sqlpool_testing::mock_driver::MockFailure;
//!
//! let h = Harness::new(2).unwrap();
//! h.driver.fail_next_executes(1, MockFailure::ConnectionLost);
//!
//! h.db.execute("UPDATE counters SET n = n + 1", &[]).unwrap();
//! assert_eq!(h.sleep.delays().len(), 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock_driver;

pub use fixtures::{
    EventLevel, Harness, RecordingObserver, RecordingSleep, sample_users, test_config,
};
pub use mock_driver::{
    ExecutedStatement, MockConnection, MockCursor, MockDriver, MockDriverBuilder, MockFailure,
    MockResponse,
};
