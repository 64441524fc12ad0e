//! Connection pool behaviour tests.
//!
//! Run with:
//! ```bash
//! cargo test -p sqlpool-testing --test pool
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use proptest::prelude::*;
use sqlpool::{
    ConnectionFactory, ConnectionOrigin, Database, Driver, DriverError, Error, Observer, Pool,
    PoolConfig, PoolEvent, RetryPolicy, Sleep,
};
use sqlpool_testing::{
    Harness, MockDriver, MockFailure, RecordingObserver, RecordingSleep, test_config,
};

// =============================================================================
// Construction
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn test_pool_prefilled_to_size(size in 1usize..12) {
        let h = Harness::new(size).unwrap();

        prop_assert_eq!(h.idle(), size);
        prop_assert_eq!(h.driver.connections_opened(), size as u64);
        prop_assert_eq!(h.db.status().total, size);
        prop_assert_eq!(h.db.status().in_use, 0);
    }
}

#[test]
fn test_prefill_uses_config_endpoint() {
    let driver = MockDriver::new();
    let config = test_config(1).host("db.internal").port(3307).charset("latin1");
    let _db = Database::connect(config, driver.clone()).unwrap();

    let options = driver.last_options().unwrap();
    assert_eq!(options.host, "db.internal");
    assert_eq!(options.port, 3307);
    assert_eq!(options.user, "test");
    assert_eq!(options.database, "testdb");
    assert_eq!(options.charset, "latin1");
}

#[test]
fn test_prefill_connections_are_not_pinged() {
    let h = Harness::new(3).unwrap();
    assert_eq!(h.driver.pings(), 0);
}

#[test]
fn test_zero_size_rejected() {
    let driver = MockDriver::new();
    let err = Database::connect(test_config(0), driver.clone()).unwrap_err();

    assert!(matches!(err, Error::Config(_)));
    assert_eq!(driver.connect_attempts(), 0);
}

// =============================================================================
// Acquire and release
// =============================================================================

#[test]
fn test_acquire_release_restores_queue() {
    let h = Harness::new(3).unwrap();
    let pool = h.db.pool();

    let conn = pool.acquire().unwrap();
    assert_eq!(h.idle(), 2);
    assert_eq!(pool.status().in_use, 1);
    assert_eq!(conn.metadata().origin, ConnectionOrigin::Prefill);
    assert_eq!(conn.metadata().checkout_count, 1);

    drop(conn);
    assert_eq!(h.idle(), 3);
    assert_eq!(pool.status().in_use, 0);
    assert_eq!(h.driver.connections_opened(), 3);
}

#[test]
fn test_acquire_pings_queued_connection() {
    let h = Harness::new(2).unwrap();
    let _conn = h.db.pool().acquire().unwrap();
    assert_eq!(h.driver.pings(), 1);
}

#[test]
fn test_queue_is_fifo() {
    let h = Harness::new(3).unwrap();
    let pool = h.db.pool();

    let ids: Vec<u64> = (0..3).map(|_| pool.acquire().unwrap().id()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[test]
fn test_broken_connection_replaced_from_queue() {
    let h = Harness::new(3).unwrap();
    h.driver.break_connection(1);

    let conn = h.db.pool().acquire().unwrap();

    assert_eq!(conn.id(), 2);
    assert_eq!(h.driver.connect_attempts(), 3, "no new connection opened");
    assert_eq!(h.driver.connections_closed(), 1);
    assert_eq!(h.idle(), 1);
    assert_eq!(h.observer.count("connection_lost"), 1);
    assert_eq!(h.observer.warnings().len(), 1);
}

#[test]
fn test_lone_broken_connection_replaced_by_factory() {
    let h = Harness::new(1).unwrap();
    h.driver.break_connection(1);

    let conn = h.db.pool().acquire().unwrap();

    assert_eq!(conn.id(), 2);
    assert_eq!(conn.metadata().origin, ConnectionOrigin::Replacement);
    assert_eq!(h.driver.connections_opened(), 2);
    assert_eq!(h.driver.connections_closed(), 1);
    assert_eq!(h.idle(), 0);

    drop(conn);
    assert_eq!(h.idle(), 1);
    assert_eq!(h.db.status().total, 1);
}

#[test]
fn test_all_connections_broken() {
    let h = Harness::new(3).unwrap();
    h.driver.break_all_connections();

    let conn = h.db.pool().acquire().unwrap();

    assert_eq!(conn.id(), 4);
    assert_eq!(h.driver.connections_closed(), 3);
    assert_eq!(h.observer.count("connection_lost"), 3);
    assert_eq!(h.idle(), 0);
    assert_eq!(h.db.status().total, 1);
}

#[test]
fn test_release_onto_full_pool_closes_connection() {
    let h = Harness::new(2).unwrap();
    let options = h.db.pool().factory().options().clone();
    let extra = h.driver.connect(&options).unwrap();

    h.db.pool().release(extra);

    assert_eq!(h.idle(), 2);
    assert_eq!(h.db.status().total, 2);
    assert_eq!(h.driver.connections_closed(), 1);
}

#[test]
fn test_release_with_room_queues_connection() {
    let h = Harness::new(2).unwrap();
    let pool = h.db.pool();

    let conn = pool.acquire().unwrap().detach();
    assert_eq!(pool.status().total, 1);

    pool.release(conn);
    assert_eq!(h.idle(), 2);
    assert_eq!(pool.status().total, 2);
    assert_eq!(h.driver.connections_closed(), 0);
}

#[test]
fn test_discard_closes_and_pool_heals() {
    let h = Harness::new(1).unwrap();
    let pool = h.db.pool();

    pool.acquire().unwrap().discard();
    assert_eq!(pool.status().total, 0);
    assert_eq!(h.driver.connections_closed(), 1);

    let conn = pool.acquire().unwrap();
    assert_eq!(conn.metadata().origin, ConnectionOrigin::Replacement);
    assert_eq!(h.driver.connections_opened(), 2);
}

// =============================================================================
// Drain and close
// =============================================================================

#[test]
fn test_close_all_connections_empties_queue() {
    let h = Harness::new(4).unwrap();

    assert_eq!(h.db.close_all_connections(), 4);
    assert_eq!(h.idle(), 0);
    assert_eq!(h.driver.open_connections(), 0);

    assert_eq!(h.db.close_all_connections(), 0);
}

#[test]
fn test_close_all_connections_leaves_checked_out() {
    let h = Harness::new(3).unwrap();
    let conn = h.db.pool().acquire().unwrap();

    assert_eq!(h.db.close_all_connections(), 2);
    assert!(conn.is_open());

    drop(conn);
    assert_eq!(h.idle(), 1);
}

#[test]
fn test_pool_usable_after_drain() {
    let h = Harness::new(2).unwrap();
    h.db.close_all_connections();

    let affected = h.db.execute("DELETE FROM sessions", &[]).unwrap();
    assert_eq!(affected, 1);
    assert_eq!(h.driver.connections_opened(), 3);
    assert_eq!(h.idle(), 1);
}

#[test]
fn test_close_rejects_acquire() {
    let h = Harness::new(2).unwrap();
    h.db.close();

    assert!(h.db.pool().is_closed());
    assert!(matches!(h.db.pool().acquire(), Err(Error::PoolClosed)));
    assert_eq!(h.driver.open_connections(), 0);
}

#[test]
fn test_connection_returned_after_close_is_closed() {
    let h = Harness::new(1).unwrap();
    let conn = h.db.pool().acquire().unwrap();

    h.db.close();
    assert_eq!(h.driver.open_connections(), 1);

    drop(conn);
    assert_eq!(h.driver.open_connections(), 0);
}

#[test]
fn test_close_wakes_blocked_acquire() {
    let h = Harness::new(1).unwrap();
    let pool = h.db.pool();
    let held = pool.acquire().unwrap();

    thread::scope(|s| {
        let waiter = s.spawn(|| pool.acquire().map(|c| c.id()));
        thread::sleep(Duration::from_millis(50));
        pool.close();
        assert!(matches!(waiter.join().unwrap(), Err(Error::PoolClosed)));
    });

    drop(held);
}

#[test]
fn test_acquire_timeout() {
    let config = test_config(1).pool(
        PoolConfig::new()
            .size(1)
            .acquire_timeout(Some(Duration::from_millis(50))),
    );
    let h = Harness::with_driver(MockDriver::new(), config).unwrap();
    let _held = h.db.pool().acquire().unwrap();

    let err = h.db.pool().acquire().unwrap_err();
    assert!(matches!(err, Error::AcquisitionTimeout(d) if d == Duration::from_millis(50)));
}

#[test]
fn test_blocked_acquire_gets_released_connection() {
    let h = Harness::new(1).unwrap();
    let pool = h.db.pool();
    let held = pool.acquire().unwrap();

    thread::scope(|s| {
        let waiter = s.spawn(|| pool.acquire().map(|c| c.id()));
        thread::sleep(Duration::from_millis(20));
        drop(held);
        assert_eq!(waiter.join().unwrap().unwrap(), 1);
    });

    assert_eq!(h.driver.connections_opened(), 1);
}

// =============================================================================
// Connection factory
// =============================================================================

#[test]
fn test_factory_retries_connectivity_failures() {
    let driver = MockDriver::new();
    driver.fail_next_connects(2, MockFailure::Timeout);
    let h = Harness::with_driver(driver, test_config(1)).unwrap();

    assert_eq!(h.driver.connect_attempts(), 3);
    assert_eq!(
        h.sleep.delays(),
        vec![Duration::from_secs(2), Duration::from_secs(4)]
    );
    assert_eq!(h.observer.count("connect_failed"), 2);
    assert!(h.observer.errors().is_empty());
}

#[test]
fn test_factory_gives_up_after_max_retries() {
    let driver = MockDriver::new();
    driver.fail_next_connects(3, MockFailure::Refused);
    let sleep = Arc::new(RecordingSleep::new());
    let observer = Arc::new(RecordingObserver::new());

    let err = Database::builder(test_config(2), driver.clone())
        .sleep(Arc::clone(&sleep) as Arc<dyn Sleep>)
        .observer(Arc::clone(&observer) as Arc<dyn Observer>)
        .build()
        .unwrap_err();

    match err {
        Error::Connection {
            host,
            port,
            attempts,
            source,
        } => {
            assert_eq!(host, "mock");
            assert_eq!(port, 3306);
            assert_eq!(attempts, 3);
            assert!(matches!(source, DriverError::Connect(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(driver.connect_attempts(), 3);
    assert_eq!(sleep.delays().len(), 2, "no sleep after the final attempt");
    assert_eq!(observer.warnings().len(), 2);
    assert_eq!(observer.errors().len(), 1);
}

#[test]
fn test_factory_does_not_retry_rejected_login() {
    let driver = MockDriver::new();
    driver.fail_next_connects(1, MockFailure::AccessDenied);
    let sleep = Arc::new(RecordingSleep::new());

    let err = Database::builder(test_config(1), driver.clone())
        .sleep(Arc::clone(&sleep) as Arc<dyn Sleep>)
        .build()
        .unwrap_err();

    assert!(matches!(err, Error::Driver(DriverError::Authentication(_))));
    assert_eq!(driver.connect_attempts(), 1);
    assert!(sleep.delays().is_empty());
}

#[test]
fn test_factory_failure_during_replacement() {
    let h = Harness::new(1).unwrap();
    h.driver.break_connection(1);
    h.driver.fail_next_connects(3, MockFailure::Refused);

    let err = h.db.pool().acquire().unwrap_err();
    assert!(matches!(err, Error::Connection { attempts: 3, .. }));
    assert_eq!(h.db.status().total, 0);

    let conn = h.db.pool().acquire().unwrap();
    assert_eq!(conn.metadata().origin, ConnectionOrigin::Replacement);
}

#[test]
fn test_standalone_pool_over_factory() {
    let driver = MockDriver::new();
    let config = test_config(2);
    let factory = ConnectionFactory::new(
        driver.clone(),
        config.connect_options(),
        RetryPolicy::new().max_retries(1),
    )
    .with_sleep(Arc::new(RecordingSleep::new()));

    let pool = Pool::new(factory, PoolConfig::new().size(2)).unwrap();
    assert_eq!(pool.factory().connections_created(), 2);
    assert_eq!(pool.status().idle, 2);

    let clone = pool.clone();
    drop(clone.acquire().unwrap());
    assert_eq!(pool.status().idle, 2);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_acquire_never_exceeds_size() {
    let h = Harness::new(4).unwrap();
    let pool = h.db.pool();

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..50 {
                    let conn = pool.acquire().unwrap();
                    assert!(pool.status().total <= 4);
                    drop(conn);
                }
            });
        }
    });

    assert_eq!(h.idle(), 4);
    assert_eq!(h.driver.connections_opened(), 4);
}

#[test]
fn test_concurrent_acquire_with_broken_connections() {
    let h = Harness::new(4).unwrap();
    h.driver.break_connection(2);
    h.driver.break_connection(3);
    let pool = h.db.pool();

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..20 {
                    drop(pool.acquire().unwrap());
                }
            });
        }
    });

    let status = pool.status();
    assert!(status.total <= 4);
    assert_eq!(status.in_use, 0);
    assert_eq!(h.driver.connections_closed(), 2);
    assert_eq!(
        h.observer
            .warnings()
            .iter()
            .filter(|e| matches!(e, PoolEvent::ConnectionLost { .. }))
            .count(),
        2
    );
}
