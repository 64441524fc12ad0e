//! Batch insert and update tests.
//!
//! Run with:
//! ```bash
//! cargo test -p sqlpool-testing --test batch
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use proptest::prelude::*;
use sqlpool::{BatchSummary, DEFAULT_CHUNK_SIZE, Error, Value, params};
use sqlpool_testing::{Harness, MockDriver, MockFailure, MockResponse, sample_users, test_config};

const COLUMNS: &[&str] = &["name", "email"];

/// Reports one affected row per inserted tuple.
fn counting_driver() -> MockDriver {
    MockDriver::builder()
        .with_response(
            "INSERT",
            MockResponse::custom(|_, params| MockResponse::Affected(params.len() as u64 / 2)),
        )
        .build()
}

// =============================================================================
// Batch insert
// =============================================================================

#[test]
fn test_batch_insert_chunks() {
    let h = Harness::with_driver(counting_driver(), test_config(2)).unwrap();

    let summary = h
        .db
        .batch_insert("users", COLUMNS, &sample_users(5), 2)
        .unwrap();

    assert_eq!(
        summary,
        BatchSummary {
            statements: 3,
            rows_affected: 5,
        }
    );

    let log = h.driver.executed_matching("INSERT INTO users");
    assert_eq!(log.len(), 3);
    let sizes: Vec<usize> = log.iter().map(|s| s.params.len() / COLUMNS.len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert_eq!(
        log[0].sql,
        "INSERT INTO users (name, email) VALUES (?, ?), (?, ?)"
    );
    assert_eq!(log[2].sql, "INSERT INTO users (name, email) VALUES (?, ?)");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_batch_insert_chunk_sizes(records in 0usize..40, chunk in 1usize..10) {
        let h = Harness::new(1).unwrap();

        let summary = h.db.batch_insert("users", COLUMNS, &sample_users(records), chunk).unwrap();

        prop_assert_eq!(summary.statements, records.div_ceil(chunk));
        let sizes: Vec<usize> = h
            .driver
            .executed()
            .iter()
            .map(|s| s.params.len() / COLUMNS.len())
            .collect();
        prop_assert!(sizes.iter().all(|&n| n >= 1 && n <= chunk));
        prop_assert_eq!(sizes.iter().sum::<usize>(), records);
    }
}

#[test]
fn test_batch_insert_preserves_record_order() {
    let h = Harness::new(1).unwrap();
    let records = sample_users(3);

    h.db.batch_insert("users", COLUMNS, &records, 2).unwrap();

    let sent: Vec<Value> = h
        .driver
        .executed()
        .into_iter()
        .flat_map(|s| s.params)
        .collect();
    let expected: Vec<Value> = records.into_iter().flatten().collect();
    assert_eq!(sent, expected);
}

#[test]
fn test_batch_insert_single_chunk() {
    let h = Harness::new(1).unwrap();

    let summary = h
        .db
        .batch_insert("users", COLUMNS, &sample_users(10), DEFAULT_CHUNK_SIZE)
        .unwrap();

    assert_eq!(summary.statements, 1);
    assert_eq!(h.driver.executed()[0].params.len(), 20);
}

#[test]
fn test_batch_insert_empty_records() {
    let h = Harness::new(1).unwrap();

    let summary = h.db.batch_insert("users", COLUMNS, &[], 100).unwrap();

    assert_eq!(summary, BatchSummary::default());
    assert!(h.driver.executed().is_empty());
}

#[test]
fn test_batch_insert_rejects_bad_identifiers() {
    let h = Harness::new(1).unwrap();

    let err = h
        .db
        .batch_insert("users; DROP TABLE users", COLUMNS, &sample_users(1), 10)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidIdentifier(_)));

    let err = h
        .db
        .batch_insert("users", &["name", "email)"], &sample_users(1), 10)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidIdentifier(_)));

    let err = h.db.batch_insert("users", &["bad col"], &[], 10).unwrap_err();
    assert!(matches!(err, Error::InvalidIdentifier(_)));

    assert!(h.driver.executed().is_empty());
}

#[test]
fn test_batch_insert_rejects_ragged_records() {
    let h = Harness::new(1).unwrap();
    let mut records = sample_users(4);
    records[3].pop();

    let err = h.db.batch_insert("users", COLUMNS, &records, 2).unwrap_err();

    assert!(matches!(err, Error::InvalidBatch(_)));
    assert!(h.driver.executed().is_empty(), "validated before sending");
}

#[test]
fn test_batch_insert_rejects_zero_chunk_size() {
    let h = Harness::new(1).unwrap();
    let err = h
        .db
        .batch_insert("users", COLUMNS, &sample_users(2), 0)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidBatch(_)));
}

#[test]
fn test_batch_insert_stops_at_failed_chunk() {
    let driver = MockDriver::builder()
        .with_response(
            "INSERT",
            MockResponse::custom(|_, params| {
                if params.contains(&Value::from("user3")) {
                    MockResponse::Fail(MockFailure::syntax())
                } else {
                    MockResponse::Affected(2)
                }
            }),
        )
        .build();
    let h = Harness::with_driver(driver, test_config(1)).unwrap();

    let err = h
        .db
        .batch_insert("users", COLUMNS, &sample_users(6), 2)
        .unwrap_err();

    assert!(matches!(err, Error::OperationFailed { attempts: 1, .. }));
    assert_eq!(h.driver.executed().len(), 2);
    assert_eq!(h.driver.commits(), 1, "first chunk stays committed");
}

#[test]
fn test_batch_insert_retries_chunk_on_connectivity_failure() {
    let h = Harness::new(1).unwrap();
    h.driver.fail_next_executes(1, MockFailure::ConnectionLost);

    let summary = h
        .db
        .batch_insert("users", COLUMNS, &sample_users(3), 2)
        .unwrap();

    assert_eq!(summary.statements, 2);
    assert_eq!(h.driver.executed().len(), 3);
    assert_eq!(h.sleep.delays(), vec![Duration::from_secs(2)]);
}

#[test]
fn test_batch_insert_schema_qualified_table() {
    let h = Harness::new(1).unwrap();

    h.db
        .batch_insert("shop.orders", &["total"], &[params![9.5]], 10)
        .unwrap();

    assert_eq!(
        h.driver.executed()[0].sql,
        "INSERT INTO shop.orders (total) VALUES (?)"
    );
}

// =============================================================================
// Batch update
// =============================================================================

#[test]
fn test_batch_update_one_statement_per_record() {
    let h = Harness::new(2).unwrap();
    let records = vec![
        params!["a@example.com", 1],
        params!["b@example.com", 2],
        params!["c@example.com", 3],
    ];

    let summary = h
        .db
        .batch_update("users", &["email"], &records, "id", 2)
        .unwrap();

    assert_eq!(summary.statements, 3);
    assert_eq!(summary.rows_affected, 3);

    let log = h.driver.executed();
    assert!(
        log.iter()
            .all(|s| s.sql == "UPDATE users SET email = ? WHERE id = ?")
    );
    assert_eq!(log[2].params, params!["c@example.com", 3]);
}

#[test]
fn test_batch_update_requires_key_value() {
    let h = Harness::new(1).unwrap();

    let err = h
        .db
        .batch_update("users", &["email"], &[params!["a@example.com"]], "id", 10)
        .unwrap_err();

    assert!(matches!(err, Error::InvalidBatch(_)));
    assert!(h.driver.executed().is_empty());
}

#[test]
fn test_batch_update_rejects_bad_key_column() {
    let h = Harness::new(1).unwrap();

    let err = h
        .db
        .batch_update("users", &["email"], &[params!["x", 1]], "id OR 1=1", 10)
        .unwrap_err();

    assert!(matches!(err, Error::InvalidIdentifier(_)));
}
