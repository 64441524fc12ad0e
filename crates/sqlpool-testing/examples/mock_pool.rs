//! Connection pool walkthrough over the mock driver.
//!
//! Shows pre-fill, retry with backoff, broken-connection replacement and
//! chunked inserts, with the `tracing` output of each step.
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=sqlpool=debug cargo run -p sqlpool-testing --example mock_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use sqlpool::{Config, Database, RetryPolicy, params};
use sqlpool_testing::{MockDriver, MockFailure, MockResponse, sample_users};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Connection Pool over Mock Driver ===\n");

    let driver = MockDriver::builder()
        .with_response("INSERT INTO orders", MockResponse::InsertId(1001))
        .build();

    let config = Config::from_connection_string(
        "host=mock;user=demo;password=demo;database=shop;pool size=3",
    )?
    .retry(RetryPolicy::from_backoff_base(2.0).base_delay(Duration::from_millis(50)));

    let db = Database::connect(config, driver.clone())?;
    println!("Pool ready: {:?}", db.status());

    let id = db.insert("INSERT INTO orders (total) VALUES (?)", &params![19.99])?;
    println!("Inserted order {id}");

    driver.fail_next_executes(2, MockFailure::ConnectionLost);
    let updated = db.execute("UPDATE orders SET status = ? WHERE id = ?", &params!["paid", id])?;
    println!("Updated {updated} row(s) after two connectivity failures");

    driver.break_connection(1);
    db.execute("DELETE FROM carts WHERE expired = ?", &params![true])?;
    println!(
        "Broken connection replaced: opened {}, closed {}",
        driver.connections_opened(),
        driver.connections_closed()
    );

    let summary = db.batch_insert("users", &["name", "email"], &sample_users(250), 100)?;
    println!(
        "Batch insert: {} statement(s), {} row(s) reported",
        summary.statements, summary.rows_affected
    );

    let closed = db.close_all_connections();
    println!("\nClosed {closed} idle connection(s)");

    Ok(())
}
